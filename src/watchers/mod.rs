use eyre::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::config::Config;
use crate::source::RpcEventSource;
use crate::types::DepositEventKind;

pub mod backfill;

pub use backfill::{BackfillWatcher, ScanSummary};

/// Runs the L1 and L2 backfills side by side
pub struct WatcherManager {
    watchers: Vec<BackfillWatcher>,
}

impl WatcherManager {
    /// Create one RPC-backed watcher per chain
    pub fn new(config: &Config, db: SqlitePool) -> Result<Self> {
        let l1_source = Arc::new(RpcEventSource::new(&config.l1.rpc_url)?);
        let l2_source = Arc::new(RpcEventSource::new(&config.l2.rpc_url)?);

        let watchers = vec![
            BackfillWatcher::new(
                l1_source,
                db.clone(),
                DepositEventKind::EthDepositInitiated,
                config.l1.bridge_address()?,
                config.scan.chunk_size,
            ),
            BackfillWatcher::new(
                l2_source,
                db,
                DepositEventKind::DepositFinalized,
                config.l2.bridge_address()?,
                config.scan.chunk_size,
            ),
        ];

        info!(watchers = watchers.len(), "Watcher manager created");
        Ok(Self { watchers })
    }

    pub fn from_watchers(watchers: Vec<BackfillWatcher>) -> Self {
        Self { watchers }
    }

    /// Run all watchers concurrently.
    ///
    /// Returns every summary once all watchers are done. The first watcher
    /// error aborts the others and is returned; their open chunk transactions
    /// are rolled back.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<Vec<ScanSummary>> {
        let mut join_set = JoinSet::new();

        for watcher in self.watchers {
            let shutdown = shutdown.clone();
            join_set.spawn(async move { watcher.run(shutdown).await });
        }

        let mut summaries = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(summary)) => {
                    info!(
                        event = %summary.kind,
                        chunks = summary.chunks_processed,
                        cancelled = summary.cancelled,
                        "Watcher completed"
                    );
                    summaries.push(summary);
                }
                Ok(Err(e)) => {
                    error!(error = %e, "A watcher stopped with error, aborting the others");
                    join_set.abort_all();
                    return Err(e.into());
                }
                Err(e) => {
                    error!("A watcher task panicked: {:?}", e);
                    join_set.abort_all();
                    return Err(eyre::eyre!("watcher task panicked: {}", e));
                }
            }
        }

        Ok(summaries)
    }
}
