//! Postgres-backed implementation of the store gateway.

use chain_model::{Block, Log, Transaction};
use sqlx::{
    postgres::{PgPool, PgPoolOptions},
    FromRow, Postgres, QueryBuilder,
};
use tracing::debug;

use crate::{ChainStore, StoreError};

/// Upper bound on rows per insert round-trip.
const BATCH_SIZE: usize = 1000;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../db/migrations");

/// Store gateway over a shared Postgres pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `dsn` and bring the schema up to date.
    pub async fn connect(dsn: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(dsn)
            .await?;
        MIGRATOR.run(&pool).await?;
        Ok(Self::new(pool))
    }
}

#[derive(Debug, FromRow)]
struct BlockRow {
    block_num: i64,
    block_hash: String,
    block_time: i64,
    parent_hash: String,
}

impl From<BlockRow> for Block {
    fn from(row: BlockRow) -> Self {
        Block {
            block_num: row.block_num as u64,
            block_hash: row.block_hash,
            block_time: row.block_time as u64,
            parent_hash: row.parent_hash,
            transactions: Vec::new(),
            tx_hashes: Vec::new(),
        }
    }
}

#[derive(Debug, FromRow)]
struct TransactionRow {
    tx_hash: String,
    block_num: i64,
    from_addr: String,
    to_addr: String,
    nonce: i64,
    data: String,
    value: String,
    logs: Option<serde_json::Value>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, StoreError> {
        let logs: Vec<Log> = match row.logs {
            Some(raw) => serde_json::from_value(raw)?,
            None => Vec::new(),
        };
        Ok(Transaction {
            tx_hash: row.tx_hash,
            block_num: row.block_num as u64,
            from_addr: row.from_addr,
            to_addr: row.to_addr,
            nonce: row.nonce as u64,
            data: row.data,
            value: row.value,
            logs,
        })
    }
}

fn db_int(value: u64, column: &str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::OutOfRange(format!("{column}={value}")))
}

fn logs_column(logs: &[Log]) -> Result<Option<serde_json::Value>, StoreError> {
    if logs.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::to_value(logs)?))
}

impl ChainStore for PgStore {
    async fn upsert_blocks(&self, blocks: &[Block]) -> Result<(), StoreError> {
        if blocks.is_empty() {
            return Ok(());
        }

        let mut dbtx = self.pool.begin().await?;

        for chunk in blocks.chunks(BATCH_SIZE) {
            let rows = chunk
                .iter()
                .map(|block| {
                    Ok((
                        db_int(block.block_num, "block_num")?,
                        block.block_hash.as_str(),
                        db_int(block.block_time, "block_time")?,
                        block.parent_hash.as_str(),
                    ))
                })
                .collect::<Result<Vec<_>, StoreError>>()?;

            let mut builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO blocks (block_num, block_hash, block_time, parent_hash) ",
            );
            builder.push_values(rows, |mut row, (num, hash, time, parent)| {
                row.push_bind(num)
                    .push_bind(hash)
                    .push_bind(time)
                    .push_bind(parent);
            });
            builder.push(
                " ON CONFLICT (block_num) DO UPDATE SET \
                 block_hash = EXCLUDED.block_hash, \
                 block_time = EXCLUDED.block_time, \
                 parent_hash = EXCLUDED.parent_hash",
            );
            builder.build().execute(&mut *dbtx).await?;
        }

        let transactions: Vec<&Transaction> =
            blocks.iter().flat_map(|block| &block.transactions).collect();
        for chunk in transactions.chunks(BATCH_SIZE) {
            insert_transactions(&mut dbtx, chunk).await?;
        }

        dbtx.commit().await?;
        debug!(blocks = blocks.len(), "upserted block batch");
        Ok(())
    }

    async fn get_block(&self, num: u64) -> Result<Option<Block>, StoreError> {
        let row = sqlx::query_as::<_, BlockRow>(
            "SELECT block_num, block_hash, block_time, parent_hash \
             FROM blocks WHERE block_num = $1",
        )
        .bind(db_int(num, "block_num")?)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let mut block = Block::from(row);
        let hashes: Vec<(String,)> = sqlx::query_as(
            "SELECT tx_hash FROM transactions WHERE block_num = $1 ORDER BY tx_hash",
        )
        .bind(db_int(num, "block_num")?)
        .fetch_all(&self.pool)
        .await?;
        block.tx_hashes = hashes.into_iter().map(|(hash,)| hash).collect();
        Ok(Some(block))
    }

    async fn get_transaction(&self, tx_hash: &str) -> Result<Option<Transaction>, StoreError> {
        let row = sqlx::query_as::<_, TransactionRow>(
            "SELECT tx_hash, block_num, from_addr, to_addr, nonce, data, value, logs \
             FROM transactions WHERE tx_hash = $1",
        )
        .bind(tx_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Transaction::try_from).transpose()
    }

    async fn upsert_transaction(&self, tx: &Transaction) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO transactions (tx_hash, block_num, from_addr, to_addr, nonce, data, value, logs) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (tx_hash) DO UPDATE SET \
             block_num = EXCLUDED.block_num, \
             from_addr = EXCLUDED.from_addr, \
             to_addr = EXCLUDED.to_addr, \
             nonce = EXCLUDED.nonce, \
             data = EXCLUDED.data, \
             value = EXCLUDED.value, \
             logs = EXCLUDED.logs",
        )
        .bind(&tx.tx_hash)
        .bind(db_int(tx.block_num, "block_num")?)
        .bind(&tx.from_addr)
        .bind(&tx.to_addr)
        .bind(db_int(tx.nonce, "nonce")?)
        .bind(&tx.data)
        .bind(&tx.value)
        .bind(logs_column(&tx.logs)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_transaction_logs(
        &self,
        tx_hash: &str,
        logs: &[Log],
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE transactions SET logs = $2 WHERE tx_hash = $1")
            .bind(tx_hash)
            .bind(logs_column(logs)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_blocks(&self, from_num: u64, to_num: u64) -> Result<Vec<Block>, StoreError> {
        let rows = sqlx::query_as::<_, BlockRow>(
            "SELECT block_num, block_hash, block_time, parent_hash \
             FROM blocks WHERE block_num BETWEEN $1 AND $2 \
             ORDER BY block_num DESC",
        )
        .bind(db_int(from_num, "from_num")?)
        .bind(db_int(to_num, "to_num")?)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Block::from).collect())
    }
}

async fn insert_transactions(
    dbtx: &mut sqlx::Transaction<'_, Postgres>,
    chunk: &[&Transaction],
) -> Result<(), StoreError> {
    if chunk.is_empty() {
        return Ok(());
    }
    let rows = chunk
        .iter()
        .map(|tx| {
            Ok((
                tx.tx_hash.as_str(),
                db_int(tx.block_num, "block_num")?,
                tx.from_addr.as_str(),
                tx.to_addr.as_str(),
                db_int(tx.nonce, "nonce")?,
                tx.data.as_str(),
                tx.value.as_str(),
                logs_column(&tx.logs)?,
            ))
        })
        .collect::<Result<Vec<_>, StoreError>>()?;

    let mut builder = QueryBuilder::<Postgres>::new(
        "INSERT INTO transactions (tx_hash, block_num, from_addr, to_addr, nonce, data, value, logs) ",
    );
    builder.push_values(rows, |mut row, (hash, num, from, to, nonce, data, value, logs)| {
        row.push_bind(hash)
            .push_bind(num)
            .push_bind(from)
            .push_bind(to)
            .push_bind(nonce)
            .push_bind(data)
            .push_bind(value)
            .push_bind(logs);
    });
    builder.push(
        " ON CONFLICT (tx_hash) DO UPDATE SET \
         block_num = EXCLUDED.block_num, \
         from_addr = EXCLUDED.from_addr, \
         to_addr = EXCLUDED.to_addr, \
         nonce = EXCLUDED.nonce, \
         data = EXCLUDED.data, \
         value = EXCLUDED.value, \
         logs = EXCLUDED.logs",
    );
    builder.build().execute(&mut **dbtx).await?;
    Ok(())
}
