//! Periodic ingest loop: head poll, sliding-window warmup, reorg repair.
//!
//! One long-lived task per process. Every tick it refreshes the cached head,
//! walks a growing window of recent blocks through the coordinator (which
//! persists and caches anything new), re-validates the parent-hash chain
//! over the unstable zone, and trims the sorted block index. Errors are
//! logged and the loop moves on; one bad tick must never stall the next.
//! No progress is checkpointed — a restart rebuilds from upstream.

use std::{sync::Arc, time::Duration};

use chain_cache::CacheBackend;
use chain_model::Block;
use chain_rpc::Upstream;
use chain_store::ChainStore;
use metrics::{counter, histogram};
use tokio::{sync::broadcast, time::MissedTickBehavior};
use tracing::{info, warn};

use crate::{coordinator::Coordinator, error::IndexerError};

#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Delay between ticks.
    pub tick: Duration,
    /// How much the warmup window grows per tick.
    pub ramp_step: u64,
    /// Ceiling on the warmup window.
    pub ramp_ceiling: u64,
    /// Number of most-recent blocks re-validated for reorgs each tick.
    pub unstable_zone: usize,
    /// How far below head the sorted block index is retained.
    pub index_retention: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(3),
            ramp_step: 100,
            ramp_ceiling: 1000,
            unstable_zone: 20,
            index_retention: 10_000,
        }
    }
}

/// Drive the ingest loop until the shutdown channel fires.
pub async fn run<S, B, U>(
    coordinator: Arc<Coordinator<S, B, U>>,
    config: IngestConfig,
    mut shutdown: broadcast::Receiver<()>,
) where
    S: ChainStore,
    B: CacheBackend,
    U: Upstream,
{
    let mut ticker = tokio::time::interval(config.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut limit: u64 = 0;

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!("shutdown signal received, stopping ingest loop");
                return;
            }
            _ = ticker.tick() => {}
        }

        if limit < config.ramp_ceiling {
            limit += config.ramp_step;
        }

        if let Err(err) = tick(&coordinator, &config, limit).await {
            warn!(error = %err, "ingest tick failed");
        }
    }
}

async fn tick<S, B, U>(
    coordinator: &Arc<Coordinator<S, B, U>>,
    config: &IngestConfig,
    limit: u64,
) -> Result<(), IndexerError>
where
    S: ChainStore,
    B: CacheBackend,
    U: Upstream,
{
    let started = std::time::Instant::now();

    let head = coordinator.refresh_head().await?;
    let blocks = coordinator.latest(limit as usize).await?;

    let zone = &blocks[..blocks.len().min(config.unstable_zone)];
    repair_reorg(coordinator, config, zone).await?;

    coordinator.prune_index(head, config.index_retention).await?;

    histogram!("indexer_ingest_tick_seconds").record(started.elapsed().as_secs_f64());
    Ok(())
}

/// Position of the first parent-hash discontinuity in a newest-first
/// window: `i` such that `window[i].parent_hash != window[i + 1].block_hash`.
/// Holes in the window skip the check for the pairs they touch.
pub(crate) fn find_reorg_point(window: &[Option<Block>]) -> Option<usize> {
    for i in 0..window.len().saturating_sub(1) {
        let (Some(newer), Some(older)) = (&window[i], &window[i + 1]) else {
            continue;
        };
        if newer.parent_hash != older.block_hash {
            return Some(i);
        }
    }
    None
}

/// On a chain discontinuity at position `i`, drop cache entries for the
/// blocks above it and re-fetch the unstable zone. The store is left alone;
/// the next upsert of those heights overwrites every column anyway.
pub(crate) async fn repair_reorg<S, B, U>(
    coordinator: &Arc<Coordinator<S, B, U>>,
    config: &IngestConfig,
    zone: &[Option<Block>],
) -> Result<(), IndexerError>
where
    S: ChainStore,
    B: CacheBackend,
    U: Upstream,
{
    let Some(point) = find_reorg_point(zone) else {
        return Ok(());
    };

    let nums: Vec<u64> = zone[..=point]
        .iter()
        .flatten()
        .map(|block| block.block_num)
        .collect();
    warn!(point, ?nums, "reorganization detected, repairing cache");
    counter!("indexer_reorgs_total").increment(1);

    coordinator.invalidate_blocks(&nums).await?;
    coordinator.latest(config.unstable_zone).await?;
    Ok(())
}
