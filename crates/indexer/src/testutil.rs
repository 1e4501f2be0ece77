//! In-memory fakes for the store and the upstream node, plus chain
//! builders shared across the coordinator, ingest, and transport tests.
//! The cache side runs against `chain_cache::memory::MemoryBackend` so
//! tests exercise the real gateway, key shapes, and lock semantics.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use chain_cache::{memory::MemoryBackend, ChainCache};
use chain_model::{hex_digest32, Block, Log, Transaction};
use chain_rpc::{RpcError, Upstream};
use chain_store::{ChainStore, StoreError};

use crate::coordinator::Coordinator;

pub(crate) fn block_hash(num: u64) -> String {
    format!("0x{num:064x}")
}

/// A block whose parent hash chains to `block_hash(num - 1)`.
pub(crate) fn chained_block(num: u64) -> Block {
    Block {
        block_num: num,
        block_hash: block_hash(num),
        block_time: 1_700_000_000 + num,
        parent_hash: block_hash(num.wrapping_sub(1)),
        transactions: Vec::new(),
        tx_hashes: Vec::new(),
    }
}

/// A contiguous chain covering `from..=to`.
pub(crate) fn chain(from: u64, to: u64) -> Vec<Block> {
    (from..=to).map(chained_block).collect()
}

pub(crate) fn tx_hash(seed: u8) -> String {
    format!("0x{}", format!("{seed:02x}").repeat(32))
}

pub(crate) fn transaction(hash: &str, block_num: u64) -> Transaction {
    Transaction {
        tx_hash: hash.to_string(),
        block_num,
        from_addr: "0xF1aa000000000000000000000000000000000001".into(),
        to_addr: "0xF1aa000000000000000000000000000000000002".into(),
        nonce: 1,
        data: hex_digest32(b"payload"),
        value: "1000000000000000000".into(),
        logs: Vec::new(),
    }
}

#[derive(Clone, Default)]
pub(crate) struct FakeStore {
    blocks: Arc<Mutex<BTreeMap<u64, Block>>>,
    txs: Arc<Mutex<HashMap<String, Transaction>>>,
}

impl FakeStore {
    pub fn block_count(&self) -> usize {
        self.blocks.lock().unwrap().len()
    }

    pub fn stored_tx(&self, hash: &str) -> Option<Transaction> {
        self.txs.lock().unwrap().get(hash).cloned()
    }

    pub fn seed_blocks(&self, blocks: Vec<Block>) {
        let mut stored = self.blocks.lock().unwrap();
        for block in blocks {
            stored.insert(block.block_num, block);
        }
    }

    pub fn seed_transaction(&self, tx: Transaction) {
        self.txs.lock().unwrap().insert(tx.tx_hash.clone(), tx);
    }
}

/// The error a real store raises when a transaction row references an
/// absent block.
fn foreign_key_violation(block_num: u64) -> StoreError {
    StoreError::Database(sqlx::Error::Protocol(format!(
        "insert on \"transactions\" violates foreign key constraint: block_num={block_num}"
    )))
}

impl ChainStore for FakeStore {
    async fn upsert_blocks(&self, blocks: &[Block]) -> Result<(), StoreError> {
        let mut stored_blocks = self.blocks.lock().unwrap();
        let mut stored_txs = self.txs.lock().unwrap();
        // block rows land before their transactions, as the batch does
        for block in blocks {
            let mut bare = block.clone();
            bare.transactions = Vec::new();
            bare.tx_hashes = Vec::new();
            stored_blocks.insert(block.block_num, bare);
        }
        for block in blocks {
            for tx in &block.transactions {
                if !stored_blocks.contains_key(&tx.block_num) {
                    return Err(foreign_key_violation(tx.block_num));
                }
                stored_txs.insert(tx.tx_hash.clone(), tx.clone());
            }
        }
        Ok(())
    }

    async fn get_block(&self, num: u64) -> Result<Option<Block>, StoreError> {
        let Some(mut block) = self.blocks.lock().unwrap().get(&num).cloned() else {
            return Ok(None);
        };
        let mut hashes: Vec<String> = self
            .txs
            .lock()
            .unwrap()
            .values()
            .filter(|tx| tx.block_num == num)
            .map(|tx| tx.tx_hash.clone())
            .collect();
        hashes.sort();
        block.tx_hashes = hashes;
        Ok(Some(block))
    }

    async fn get_transaction(&self, tx_hash: &str) -> Result<Option<Transaction>, StoreError> {
        Ok(self.txs.lock().unwrap().get(tx_hash).cloned())
    }

    async fn upsert_transaction(&self, tx: &Transaction) -> Result<(), StoreError> {
        if !self.blocks.lock().unwrap().contains_key(&tx.block_num) {
            return Err(foreign_key_violation(tx.block_num));
        }
        self.txs
            .lock()
            .unwrap()
            .insert(tx.tx_hash.clone(), tx.clone());
        Ok(())
    }

    async fn update_transaction_logs(
        &self,
        tx_hash: &str,
        logs: &[Log],
    ) -> Result<(), StoreError> {
        if let Some(tx) = self.txs.lock().unwrap().get_mut(tx_hash) {
            tx.logs = logs.to_vec();
        }
        Ok(())
    }

    async fn list_blocks(&self, from_num: u64, to_num: u64) -> Result<Vec<Block>, StoreError> {
        let stored = self.blocks.lock().unwrap();
        Ok(stored
            .range(from_num..=to_num)
            .rev()
            .map(|(_, block)| block.clone())
            .collect())
    }
}

#[derive(Clone, Default)]
pub(crate) struct FakeUpstream {
    head: Arc<Mutex<u64>>,
    blocks: Arc<Mutex<HashMap<u64, Block>>>,
    txs: Arc<Mutex<HashMap<String, Transaction>>>,
    receipts: Arc<Mutex<HashMap<String, Vec<Log>>>>,
    pub head_calls: Arc<AtomicUsize>,
    pub block_calls: Arc<AtomicUsize>,
    pub tx_calls: Arc<AtomicUsize>,
    pub receipt_calls: Arc<AtomicUsize>,
}

impl FakeUpstream {
    pub fn with_chain(head: u64, blocks: Vec<Block>) -> Self {
        let upstream = Self::default();
        upstream.replace_chain(head, blocks);
        upstream
    }

    pub fn add_transaction(&self, tx: Transaction, receipt_logs: Option<Vec<Log>>) {
        if let Some(logs) = receipt_logs {
            self.receipts
                .lock()
                .unwrap()
                .insert(tx.tx_hash.clone(), logs);
        }
        self.txs.lock().unwrap().insert(tx.tx_hash.clone(), tx);
    }

    pub fn replace_chain(&self, head: u64, blocks: Vec<Block>) {
        *self.head.lock().unwrap() = head;
        let mut map = self.blocks.lock().unwrap();
        map.clear();
        for block in blocks {
            map.insert(block.block_num, block);
        }
    }
}

impl Upstream for FakeUpstream {
    async fn head_number(&self) -> Result<u64, RpcError> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        Ok(*self.head.lock().unwrap())
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<Block>, RpcError> {
        self.block_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.blocks.lock().unwrap().get(&number).cloned())
    }

    async fn transaction_by_hash(&self, tx_hash: &str) -> Result<Option<Transaction>, RpcError> {
        self.tx_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.txs.lock().unwrap().get(tx_hash).cloned())
    }

    async fn receipt_logs(&self, tx_hash: &str) -> Result<Option<Vec<Log>>, RpcError> {
        self.receipt_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.receipts.lock().unwrap().get(tx_hash).cloned())
    }
}

pub(crate) type TestCoordinator = Coordinator<FakeStore, MemoryBackend, FakeUpstream>;

pub(crate) struct Harness {
    pub coordinator: Arc<TestCoordinator>,
    pub store: FakeStore,
    pub backend: MemoryBackend,
    pub upstream: FakeUpstream,
}

impl Harness {
    /// A cache gateway over the same backend the coordinator uses, for
    /// seeding and asserting on cache state.
    pub fn cache(&self) -> ChainCache<MemoryBackend> {
        ChainCache::new(self.backend.clone())
    }
}

/// Wire a coordinator over the fakes and an in-memory cache.
pub(crate) fn harness(upstream: FakeUpstream) -> Harness {
    let store = FakeStore::default();
    let backend = MemoryBackend::default();
    let coordinator = Arc::new(Coordinator::new(
        store.clone(),
        ChainCache::new(backend.clone()),
        upstream.clone(),
    ));
    Harness {
        coordinator,
        store,
        backend,
        upstream,
    }
}
