//! Backward block-range scanner
//!
//! Walks one (chain, event) pair from the resume point down to genesis in
//! fixed-size chunks. Each chunk is stored, matched and checkpointed in a
//! single transaction, so a crash leaves the lowest pointer at the last
//! committed chunk and a restart picks up from there.

use alloy::primitives::{Address, B256};
use alloy::sol_types::SolEvent;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, error, info, Instrument};

use crate::contracts::{DepositFinalized, ETHDepositInitiated};
use crate::db;
use crate::error::ScanError;
use crate::events::{DepositLog, NewDeposit};
use crate::matcher;
use crate::metrics;
use crate::source::EventSource;
use crate::types::{BlockRange, DepositEventKind, ScanContext};

/// Outcome of a finished or cancelled scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSummary {
    pub kind: DepositEventKind,
    pub chunks_processed: u64,
    pub events_inserted: u64,
    pub matches: u64,
    /// Lowest block covered when the scan stopped; 0 once genesis is reached
    pub final_cursor: u64,
    pub cancelled: bool,
}

/// Counts from one committed chunk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkOutcome {
    pub events_inserted: u64,
    pub matches: u64,
}

/// The chunk below `cursor`, or `None` once the cursor reached genesis.
///
/// The range ends just below the cursor and spans at most `chunk_size` blocks.
pub fn next_chunk(cursor: u64, chunk_size: u64) -> Option<BlockRange> {
    if cursor == 0 {
        return None;
    }
    Some(BlockRange {
        from_block: cursor.saturating_sub(chunk_size),
        to_block: cursor - 1,
    })
}

/// Backfill scanner for one bridge event on one chain
pub struct BackfillWatcher {
    source: Arc<dyn EventSource>,
    db: SqlitePool,
    ctx: ScanContext,
    chunk_size: u64,
    lowest_pointer: String,
    last_pointer: String,
}

impl BackfillWatcher {
    pub fn new(
        source: Arc<dyn EventSource>,
        db: SqlitePool,
        kind: DepositEventKind,
        bridge_address: Address,
        chunk_size: u64,
    ) -> Self {
        Self {
            source,
            db,
            ctx: ScanContext::new(kind, bridge_address),
            chunk_size,
            lowest_pointer: kind.lowest_pointer_name(),
            last_pointer: kind.last_pointer_name(),
        }
    }

    pub fn kind(&self) -> DepositEventKind {
        self.ctx.kind
    }

    fn event_topic(&self) -> B256 {
        match self.ctx.kind {
            DepositEventKind::EthDepositInitiated => ETHDepositInitiated::SIGNATURE_HASH,
            DepositEventKind::DepositFinalized => DepositFinalized::SIGNATURE_HASH,
        }
    }

    /// Scan backward until genesis, an error, or a shutdown request.
    ///
    /// Shutdown is only observed between chunks; a chunk in progress always
    /// finishes (or fails) first.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<ScanSummary, ScanError> {
        let span = self.ctx.span();
        self.scan(shutdown).instrument(span).await
    }

    async fn scan(&self, shutdown: watch::Receiver<bool>) -> Result<ScanSummary, ScanError> {
        let chain = self.ctx.chain().as_str();

        let mut cursor = match self.resume_point().await {
            Ok(cursor) => cursor,
            Err(e) => {
                metrics::record_error(chain, e.kind());
                error!(error = %e, "Failed to determine backfill start");
                return Err(e);
            }
        };

        info!(cursor, chunk_size = self.chunk_size, "Starting backfill");

        let mut summary = ScanSummary {
            kind: self.ctx.kind,
            chunks_processed: 0,
            events_inserted: 0,
            matches: 0,
            final_cursor: cursor,
            cancelled: false,
        };

        while let Some(range) = next_chunk(cursor, self.chunk_size) {
            let stop = *shutdown.borrow();
            if stop {
                info!(cursor, "Shutdown requested, stopping backfill");
                summary.cancelled = true;
                break;
            }

            let started = Instant::now();
            let outcome = match self.process_chunk(range).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    metrics::record_error(chain, e.kind());
                    error!(
                        from_block = range.from_block,
                        to_block = range.to_block,
                        error = %e,
                        "Chunk failed, aborting backfill"
                    );
                    return Err(e);
                }
            };

            metrics::record_chunk_processed(
                chain,
                self.ctx.kind.pointer_prefix(),
                range.from_block,
                started.elapsed().as_secs_f64(),
            );

            summary.chunks_processed += 1;
            summary.events_inserted += outcome.events_inserted;
            summary.matches += outcome.matches;
            cursor = range.from_block;
            summary.final_cursor = cursor;
        }

        info!(
            chunks = summary.chunks_processed,
            events = summary.events_inserted,
            matches = summary.matches,
            cursor = summary.final_cursor,
            cancelled = summary.cancelled,
            "Backfill finished"
        );

        Ok(summary)
    }

    /// Stored lowest pointer, or the chain head on a fresh database
    async fn resume_point(&self) -> Result<u64, ScanError> {
        let stored = db::get_block_pointer(&self.db, &self.lowest_pointer).await?;
        if let Some(block_number) = stored.and_then(|p| p.block_number) {
            debug!(block_number, "Resuming from stored pointer");
            return Ok(block_number as u64);
        }

        let head = self.source.current_block_height().await?;
        debug!(head, "No stored pointer, starting from chain head");
        Ok(head)
    }

    /// Fetch, store, match and checkpoint one range.
    ///
    /// Everything that can fail without touching storage (RPC calls, parsing)
    /// happens before the transaction is opened. Any error after that drops the
    /// transaction, which rolls back the inserts, links and pointers together.
    pub async fn process_chunk(&self, range: BlockRange) -> Result<ChunkOutcome, ScanError> {
        let kind = self.ctx.kind;
        let chain = self.ctx.chain().as_str();

        let logs = self
            .source
            .filter_logs(
                self.ctx.bridge_address,
                self.event_topic(),
                range.from_block,
                range.to_block,
            )
            .await?;

        let mut parsed = Vec::with_capacity(logs.len());
        for log in logs {
            let event = DepositLog::parse(kind, &log).map_err(|source| ScanError::Parse {
                block_number: log.block_number,
                tx_hash: log.transaction_hash,
                log_index: log.log_index,
                source,
            })?;
            parsed.push((log, event));
        }

        // One lookup per distinct block
        let mut timestamps = BTreeMap::new();
        let blocks = [range.from_block, range.to_block]
            .into_iter()
            .chain(parsed.iter().map(|(log, _)| log.block_number));
        for block in blocks {
            if !timestamps.contains_key(&block) {
                let ts = self.source.block_timestamp(block).await?;
                timestamps.insert(block, ts);
            }
        }
        let timestamp_of = |block: u64| timestamps.get(&block).copied().unwrap_or_default();

        let mut deposits = Vec::with_capacity(parsed.len());
        for (log, event) in parsed {
            let block_timestamp = timestamp_of(log.block_number);
            deposits.push(NewDeposit::new(&log, event, block_timestamp)?);
        }

        let mut outcome = ChunkOutcome::default();
        let mut tx = self.db.begin().await?;

        for deposit in &deposits {
            let id = db::insert_deposit(&mut *tx, deposit).await?;
            outcome.events_inserted += 1;

            if let Some(pair) = matcher::match_deposit(
                &mut *tx,
                kind,
                id,
                deposit.matching_hash.as_slice(),
                deposit.block_timestamp,
            )
            .await?
            {
                outcome.matches += 1;
                info!(
                    l1_id = pair.l1_id,
                    l2_id = pair.l2_id,
                    time_difference_seconds = pair.time_difference_seconds,
                    tx_hash = %deposit.tx_hash,
                    amount = deposit.amount,
                    "Matched deposit"
                );
            }
        }

        db::set_block_pointer(
            &mut *tx,
            &self.lowest_pointer,
            range.from_block,
            timestamp_of(range.from_block),
        )
        .await?;
        let ceiling_set = db::set_block_pointer_if_null(
            &mut *tx,
            &self.last_pointer,
            range.to_block,
            timestamp_of(range.to_block),
        )
        .await?;

        tx.commit().await?;

        metrics::record_events_inserted(chain, kind.pointer_prefix(), outcome.events_inserted);
        metrics::record_matches(chain, outcome.matches);

        debug!(
            from_block = range.from_block,
            to_block = range.to_block,
            events = outcome.events_inserted,
            matches = outcome.matches,
            ceiling_set,
            "Processed chunk"
        );

        Ok(outcome)
    }
}
