//! Canonical entity model for indexed chain data.
//!
//! `Block`, `Transaction`, and `Log` are the shapes that flow between the
//! upstream adapter, the persistent store, and the shared cache. The serde
//! representation here *is* the cache wire format, so field names and
//! skipping rules are part of the contract:
//!
//! ```ignore
//! {"block_num":100,"block_hash":"0x..","block_time":1700000000,
//!  "parent_hash":"0x..","transactions":["0x..","0x.."]}
//! ```
//!
//! A block's embedded transactions never serialize; only their hash
//! projection does, under the `transactions` key.

#![allow(clippy::must_use_candidate)]

use alloy::{
    consensus::{Transaction as _, TxReceipt as _},
    network::TransactionResponse as _,
    primitives::TxKind,
    rpc::types::{Block as RpcBlock, Log as RpcLog, Transaction as RpcTransaction,
        TransactionReceipt as RpcReceipt},
};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Errors produced when decoding a serialized entity.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to decode entity: {0}")]
    Decode(#[from] serde_json::Error),
}

/// A canonical block. Identity is `block_num`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub block_num: u64,
    pub block_hash: String,
    pub block_time: u64,
    pub parent_hash: String,
    /// Owned transactions, hydrated only when the block came from upstream.
    #[serde(skip)]
    pub transactions: Vec<Transaction>,
    /// Hash projection of `transactions`, in block order.
    #[serde(
        rename = "transactions",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub tx_hashes: Vec<String>,
}

impl Block {
    /// Build a block (and its owned transactions) from the upstream RPC shape.
    pub fn from_rpc(block: &RpcBlock) -> Self {
        let number = block.header.inner.number;
        let transactions: Vec<Transaction> = block
            .transactions
            .txns()
            .map(|tx| {
                let mut tx = Transaction::from_rpc(tx);
                tx.block_num = number;
                tx
            })
            .collect();
        let tx_hashes = transactions.iter().map(|tx| tx.tx_hash.clone()).collect();

        Self {
            block_num: number,
            block_hash: block.header.hash.to_string(),
            block_time: block.header.inner.timestamp,
            parent_hash: block.header.inner.parent_hash.to_string(),
            transactions,
            tx_hashes,
        }
    }

    /// Refresh `tx_hashes` from the owned transactions. Blocks loaded from
    /// the store or the cache carry no hydrated transactions; their existing
    /// projection is left untouched.
    pub fn project_tx_hashes(&mut self) {
        if !self.transactions.is_empty() {
            self.tx_hashes = self
                .transactions
                .iter()
                .map(|tx| tx.tx_hash.clone())
                .collect();
        }
    }

    /// Cache wire encoding.
    pub fn to_cache_json(&self) -> String {
        serde_json::to_string(self).expect("block serialization is infallible")
    }

    /// Decode the cache wire encoding.
    pub fn from_cache_json(raw: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// A canonical transaction. Identity is `tx_hash`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub tx_hash: String,
    /// Height of the containing block. Not part of the wire encoding; the
    /// cache key and the store column carry it.
    #[serde(skip)]
    pub block_num: u64,
    #[serde(rename = "from")]
    pub from_addr: String,
    /// Empty for contract creations.
    #[serde(rename = "to")]
    pub to_addr: String,
    pub nonce: u64,
    pub data: String,
    /// Decimal rendering of the 256-bit amount, preserved verbatim.
    pub value: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub logs: Vec<Log>,
}

impl Transaction {
    /// Build a transaction from the upstream RPC shape. The sender address
    /// is whatever the node recovered; a failed recovery surfaces as an
    /// empty string rather than an error.
    pub fn from_rpc(tx: &RpcTransaction) -> Self {
        let to_addr = match tx.kind() {
            TxKind::Call(addr) => addr.to_string(),
            TxKind::Create => String::new(),
        };
        Self {
            tx_hash: tx.tx_hash().to_string(),
            block_num: tx.block_number.unwrap_or_default(),
            from_addr: tx.from().to_string(),
            to_addr,
            nonce: tx.nonce(),
            data: hex_digest32(tx.input()),
            value: tx.value().to_string(),
            logs: Vec::new(),
        }
    }

    /// The sentinel cached for hashes upstream has confirmed unknown.
    pub fn negative_entry() -> Self {
        Self::default()
    }

    /// A cached entry with an empty hash denotes a confirmed miss.
    pub fn is_negative_entry(&self) -> bool {
        self.tx_hash.is_empty()
    }

    /// Cache wire encoding.
    pub fn to_cache_json(&self) -> String {
        serde_json::to_string(self).expect("transaction serialization is infallible")
    }

    /// Decode the cache wire encoding.
    pub fn from_cache_json(raw: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// A receipt log, stored inline with its transaction. Ordered by `index`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub index: u64,
    pub data: String,
}

impl Log {
    /// Map a receipt log into the canonical form. Logs missing an index on
    /// the wire fall back to their position in the receipt.
    pub fn from_receipt(log: &RpcLog, position: usize) -> Self {
        Self {
            index: log.log_index.unwrap_or(position as u64),
            data: hex_digest32(&log.inner.data.data),
        }
    }
}

/// Extract the ordered logs out of a transaction receipt.
pub fn logs_from_receipt(receipt: &RpcReceipt) -> Vec<Log> {
    receipt
        .inner
        .logs()
        .iter()
        .enumerate()
        .map(|(position, log)| Log::from_receipt(log, position))
        .collect()
}

/// Canonicalize an arbitrary payload to a fixed 32-byte hex digest: keep the
/// last 32 bytes, left-pad shorter payloads with zeros, and render as
/// 0x-prefixed lowercase hex. Payloads longer than 32 bytes lose their
/// prefix. TODO: confirm with stakeholders whether full payload hex should
/// replace this truncating form; downstream consumers currently rely on the
/// fixed width.
pub fn hex_digest32(payload: &[u8]) -> String {
    let mut digest = [0u8; 32];
    if payload.len() >= 32 {
        digest.copy_from_slice(&payload[payload.len() - 32..]);
    } else {
        digest[32 - payload.len()..].copy_from_slice(payload);
    }
    format!("0x{}", alloy::hex::encode(digest))
}

/// Accept `null` where an empty log list is meant; older writers emitted it.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Log>, D::Error>
where
    D: Deserializer<'de>,
{
    let logs: Option<Vec<Log>> = Option::deserialize(deserializer)?;
    Ok(logs.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> Block {
        Block {
            block_num: 100,
            block_hash: "0x11".into(),
            block_time: 1_700_000_000,
            parent_hash: "0x10".into(),
            transactions: vec![
                Transaction {
                    tx_hash: "0xaa".into(),
                    block_num: 100,
                    from_addr: "0xF1".into(),
                    to_addr: "0xF2".into(),
                    nonce: 1,
                    data: hex_digest32(b"hello"),
                    value: "1000".into(),
                    logs: Vec::new(),
                },
                Transaction {
                    tx_hash: "0xbb".into(),
                    block_num: 100,
                    from_addr: "0xF3".into(),
                    to_addr: String::new(),
                    nonce: 2,
                    data: hex_digest32(&[]),
                    value: "0".into(),
                    logs: Vec::new(),
                },
            ],
            tx_hashes: vec!["0xaa".into(), "0xbb".into()],
        }
    }

    #[test]
    fn digest_pads_short_payloads_on_the_left() {
        let digest = hex_digest32(&[0xab, 0xcd]);
        assert_eq!(digest.len(), 66);
        assert!(digest.starts_with("0x"));
        assert!(digest.ends_with("abcd"));
        assert_eq!(&digest[2..62], "0".repeat(60));
    }

    #[test]
    fn digest_keeps_the_last_32_bytes_of_long_payloads() {
        let mut payload = vec![0xff; 8];
        payload.extend_from_slice(&[0x01; 32]);
        assert_eq!(hex_digest32(&payload), format!("0x{}", "01".repeat(32)));
    }

    #[test]
    fn digest_of_empty_payload_is_all_zeros() {
        assert_eq!(hex_digest32(&[]), format!("0x{}", "00".repeat(32)));
    }

    #[test]
    fn block_wire_format_projects_tx_hashes() {
        let block = sample_block();
        let raw = block.to_cache_json();

        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["block_num"], 100);
        assert_eq!(value["block_hash"], "0x11");
        assert_eq!(value["block_time"], 1_700_000_000u64);
        assert_eq!(value["parent_hash"], "0x10");
        assert_eq!(value["transactions"][0], "0xaa");
        assert_eq!(value["transactions"][1], "0xbb");
        // The embedded transaction objects must not leak into the wire form.
        assert!(value["transactions"][0].is_string());
    }

    #[test]
    fn block_round_trips_modulo_hydrated_transactions() {
        let block = sample_block();
        let decoded = Block::from_cache_json(&block.to_cache_json()).unwrap();

        assert_eq!(decoded.block_num, block.block_num);
        assert_eq!(decoded.block_hash, block.block_hash);
        assert_eq!(decoded.block_time, block.block_time);
        assert_eq!(decoded.parent_hash, block.parent_hash);
        assert_eq!(decoded.tx_hashes, block.tx_hashes);
        assert!(decoded.transactions.is_empty());
    }

    #[test]
    fn empty_projection_is_omitted_from_the_wire_form() {
        let block = Block {
            block_num: 7,
            block_hash: "0x07".into(),
            block_time: 0,
            parent_hash: "0x06".into(),
            ..Block::default()
        };
        let value: serde_json::Value = serde_json::from_str(&block.to_cache_json()).unwrap();
        assert!(value.get("transactions").is_none());
    }

    #[test]
    fn projection_matches_owned_transactions_in_order() {
        let mut block = sample_block();
        block.tx_hashes.clear();
        block.project_tx_hashes();
        let expected: Vec<String> = block
            .transactions
            .iter()
            .map(|tx| tx.tx_hash.clone())
            .collect();
        assert_eq!(block.tx_hashes, expected);
    }

    #[test]
    fn projection_is_preserved_when_transactions_are_not_hydrated() {
        let mut block = sample_block();
        block.transactions.clear();
        block.project_tx_hashes();
        assert_eq!(block.tx_hashes, vec!["0xaa".to_string(), "0xbb".to_string()]);
    }

    #[test]
    fn transaction_wire_format_uses_from_and_to() {
        let tx = Transaction {
            tx_hash: "0xcc".into(),
            block_num: 5,
            from_addr: "0xF1".into(),
            to_addr: "0xF2".into(),
            nonce: 9,
            data: hex_digest32(b"payload"),
            value: "115792089237316195423570985008687907853269984665640564039457584007913129639935".into(),
            logs: vec![
                Log { index: 0, data: hex_digest32(b"a") },
                Log { index: 1, data: hex_digest32(b"b") },
            ],
        };
        let value: serde_json::Value = serde_json::from_str(&tx.to_cache_json()).unwrap();
        assert_eq!(value["tx_hash"], "0xcc");
        assert_eq!(value["from"], "0xF1");
        assert_eq!(value["to"], "0xF2");
        assert_eq!(value["nonce"], 9);
        assert_eq!(value["logs"][1]["index"], 1);
        assert!(value.get("block_num").is_none());

        let decoded = Transaction::from_cache_json(&tx.to_cache_json()).unwrap();
        assert_eq!(decoded.value, tx.value);
        assert_eq!(decoded.logs, tx.logs);
    }

    #[test]
    fn null_logs_decode_as_empty() {
        let raw = r#"{"tx_hash":"0xdd","from":"","to":"","nonce":0,"data":"","value":"0","logs":null}"#;
        let decoded = Transaction::from_cache_json(raw).unwrap();
        assert!(decoded.logs.is_empty());
    }

    #[test]
    fn negative_entry_round_trips() {
        let entry = Transaction::negative_entry();
        assert!(entry.is_negative_entry());
        let decoded = Transaction::from_cache_json(&entry.to_cache_json()).unwrap();
        assert!(decoded.is_negative_entry());
    }
}
