//! Cross-chain deposit matching
//!
//! Runs inside the chunk transaction right after a deposit is inserted. SQLite
//! allows a single writer, and the chunk has already written by the time the
//! matcher reads, so the lookup and the link cannot interleave with the other
//! chain's transaction.

use sqlx::SqliteConnection;

use crate::db;
use crate::error::StoreError;
use crate::types::DepositEventKind;

/// A freshly linked L1/L2 pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchedPair {
    pub l1_id: i64,
    pub l2_id: i64,
    /// L2 block timestamp minus L1 block timestamp
    pub time_difference_seconds: i64,
}

/// Try to pair the just-inserted event `id` of type `kind` with an unmatched
/// event of the opposite type.
///
/// Returns `None` when no counterpart exists yet; the pairing then happens
/// when the counterpart itself is inserted.
pub async fn match_deposit(
    conn: &mut SqliteConnection,
    kind: DepositEventKind,
    id: i64,
    matching_hash: &[u8],
    block_timestamp: u64,
) -> Result<Option<MatchedPair>, StoreError> {
    let candidate =
        match db::find_match_candidate(&mut *conn, kind, matching_hash, block_timestamp).await? {
            Some(candidate) => candidate,
            None => return Ok(None),
        };

    let own_timestamp = block_timestamp as i64;
    let pair = match kind {
        DepositEventKind::EthDepositInitiated => MatchedPair {
            l1_id: id,
            l2_id: candidate.id,
            time_difference_seconds: candidate.block_timestamp - own_timestamp,
        },
        DepositEventKind::DepositFinalized => MatchedPair {
            l1_id: candidate.id,
            l2_id: id,
            time_difference_seconds: own_timestamp - candidate.block_timestamp,
        },
    };

    db::link_match(conn, pair.l1_id, pair.l2_id).await?;

    tracing::debug!(
        l1_id = pair.l1_id,
        l2_id = pair.l2_id,
        time_difference_seconds = pair.time_difference_seconds,
        "Linked deposit pair"
    );

    Ok(Some(pair))
}
