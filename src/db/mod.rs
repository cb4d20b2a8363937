use eyre::{Result, WrapErr};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use sqlx::SqliteExecutor;
use std::str::FromStr;
use std::time::Duration;

use crate::error::StoreError;
use crate::events::NewDeposit;
use crate::types::DepositEventKind;

pub mod models;

pub use models::*;

const NOW: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

/// Create a database connection pool.
///
/// The database file is created if missing and opened in WAL mode with foreign
/// keys enforced. Writers wait on each other through the busy timeout.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .wrap_err("Invalid DATABASE_URL")?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(30))
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .wrap_err("Failed to connect to database")
}

/// Single-connection in-memory database with the schema applied
pub async fn create_memory_pool() -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    // One connection that never recycles, otherwise the database disappears
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;
    Ok(pool)
}

/// Run pending migrations (uses the migration files in migrations/)
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Block pointers
// ---------------------------------------------------------------------------

/// Get a block pointer by name, `None` when it was never written
pub async fn get_block_pointer<'e, E>(db: E, name: &str) -> Result<Option<BlockPointer>, StoreError>
where
    E: SqliteExecutor<'e>,
{
    let pointer = sqlx::query_as::<_, BlockPointer>(
        r#"SELECT name, block_number, block_time, updated_at FROM block_pointers WHERE name = ?"#,
    )
    .bind(name)
    .fetch_optional(db)
    .await?;

    Ok(pointer)
}

/// Upsert a block pointer unconditionally
pub async fn set_block_pointer<'e, E>(
    db: E,
    name: &str,
    block_number: u64,
    block_time: u64,
) -> Result<(), StoreError>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!(
        r#"
        INSERT INTO block_pointers (name, block_number, block_time, updated_at)
        VALUES (?, ?, ?, {now})
        ON CONFLICT(name) DO UPDATE SET
            block_number = excluded.block_number,
            block_time = excluded.block_time,
            updated_at = excluded.updated_at
        "#,
        now = NOW
    );

    sqlx::query(&sql)
        .bind(name)
        .bind(block_number as i64)
        .bind(block_time as i64)
        .execute(db)
        .await?;

    Ok(())
}

/// Write a block pointer only if it is absent or its block number is NULL.
///
/// Returns whether the pointer was written.
pub async fn set_block_pointer_if_null<'e, E>(
    db: E,
    name: &str,
    block_number: u64,
    block_time: u64,
) -> Result<bool, StoreError>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!(
        r#"
        INSERT INTO block_pointers (name, block_number, block_time, updated_at)
        VALUES (?, ?, ?, {now})
        ON CONFLICT(name) DO UPDATE SET
            block_number = excluded.block_number,
            block_time = excluded.block_time,
            updated_at = excluded.updated_at
        WHERE block_pointers.block_number IS NULL
        "#,
        now = NOW
    );

    let result = sqlx::query(&sql)
        .bind(name)
        .bind(block_number as i64)
        .bind(block_time as i64)
        .execute(db)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// All block pointers, ordered by name
pub async fn list_block_pointers(pool: &SqlitePool) -> Result<Vec<BlockPointer>> {
    sqlx::query_as::<_, BlockPointer>(
        r#"SELECT name, block_number, block_time, updated_at FROM block_pointers ORDER BY name"#,
    )
    .fetch_all(pool)
    .await
    .wrap_err("Failed to list block pointers")
}

// ---------------------------------------------------------------------------
// Deposit events
// ---------------------------------------------------------------------------

/// Insert a parsed deposit into the table of its kind, returning the new row id.
///
/// A second insert of the same `(tx_hash, log_index)` fails with a unique
/// constraint violation.
pub async fn insert_deposit<'e, E>(db: E, deposit: &NewDeposit) -> Result<i64, StoreError>
where
    E: SqliteExecutor<'e>,
{
    let id = match deposit.kind {
        DepositEventKind::EthDepositInitiated => {
            sqlx::query_scalar::<_, i64>(
                r#"
                INSERT INTO l1_eth_deposits_initiated (block_number, block_timestamp, tx_hash,
                    log_index, from_address, to_address, amount, amount_wei, extra_data, event,
                    matching_hash)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING id
                "#,
            )
            .bind(deposit.block_number as i64)
            .bind(deposit.block_timestamp as i64)
            .bind(deposit.tx_hash.as_slice())
            .bind(deposit.log_index as i64)
            .bind(deposit.from.as_slice())
            .bind(deposit.to.as_slice())
            .bind(deposit.amount)
            .bind(deposit.amount_wei.to_string())
            .bind(&deposit.extra_data[..])
            .bind(&deposit.event)
            .bind(deposit.matching_hash.as_slice())
            .fetch_one(db)
            .await?
        }
        DepositEventKind::DepositFinalized => {
            let l1_token = deposit.l1_token.unwrap_or_default();
            let l2_token = deposit.l2_token.unwrap_or_default();

            sqlx::query_scalar::<_, i64>(
                r#"
                INSERT INTO l2_deposits_finalized (block_number, block_timestamp, tx_hash,
                    log_index, l1_token, l2_token, from_address, to_address, amount, amount_wei,
                    extra_data, event, matching_hash)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING id
                "#,
            )
            .bind(deposit.block_number as i64)
            .bind(deposit.block_timestamp as i64)
            .bind(deposit.tx_hash.as_slice())
            .bind(deposit.log_index as i64)
            .bind(l1_token.as_slice())
            .bind(l2_token.as_slice())
            .bind(deposit.from.as_slice())
            .bind(deposit.to.as_slice())
            .bind(deposit.amount)
            .bind(deposit.amount_wei.to_string())
            .bind(&deposit.extra_data[..])
            .bind(&deposit.event)
            .bind(deposit.matching_hash.as_slice())
            .fetch_one(db)
            .await?
        }
    };

    Ok(id)
}

/// Find the best unmatched counterpart of a `kind` event with the given hash
/// and block timestamp.
///
/// For an L1 event: the earliest L2 row at or after `block_timestamp`.
/// For an L2 event: the latest L1 row at or before `block_timestamp`.
/// Ties on timestamp go to the lowest id.
pub async fn find_match_candidate<'e, E>(
    db: E,
    kind: DepositEventKind,
    matching_hash: &[u8],
    block_timestamp: u64,
) -> Result<Option<MatchCandidate>, StoreError>
where
    E: SqliteExecutor<'e>,
{
    let sql = match kind {
        DepositEventKind::EthDepositInitiated => {
            r#"
            SELECT id, block_timestamp FROM l2_deposits_finalized
            WHERE matching_hash = ? AND matched_l1_id IS NULL AND block_timestamp >= ?
            ORDER BY block_timestamp ASC, id ASC
            LIMIT 1
            "#
        }
        DepositEventKind::DepositFinalized => {
            r#"
            SELECT id, block_timestamp FROM l1_eth_deposits_initiated
            WHERE matching_hash = ? AND matched_l2_id IS NULL AND block_timestamp <= ?
            ORDER BY block_timestamp DESC, id ASC
            LIMIT 1
            "#
        }
    };

    let candidate = sqlx::query_as::<_, MatchCandidate>(sql)
        .bind(matching_hash)
        .bind(block_timestamp as i64)
        .fetch_optional(db)
        .await?;

    Ok(candidate)
}

/// Link an L1 row and an L2 row to each other.
///
/// Each update only applies to a row that is still unmatched; if either touches
/// no row the link is refused with [`StoreError::LinkConflict`] and the caller's
/// transaction must be rolled back.
pub async fn link_match(
    conn: &mut SqliteConnection,
    l1_id: i64,
    l2_id: i64,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"UPDATE l1_eth_deposits_initiated SET matched_l2_id = ? WHERE id = ? AND matched_l2_id IS NULL"#,
    )
    .bind(l2_id)
    .bind(l1_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() != 1 {
        return Err(StoreError::LinkConflict {
            table: DepositEventKind::EthDepositInitiated.table(),
            id: l1_id,
        });
    }

    let result = sqlx::query(
        r#"UPDATE l2_deposits_finalized SET matched_l1_id = ? WHERE id = ? AND matched_l1_id IS NULL"#,
    )
    .bind(l1_id)
    .bind(l2_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() != 1 {
        return Err(StoreError::LinkConflict {
            table: DepositEventKind::DepositFinalized.table(),
            id: l2_id,
        });
    }

    Ok(())
}

/// Get an L1 deposit by id
pub async fn get_l1_deposit(pool: &SqlitePool, id: i64) -> Result<Option<L1Deposit>> {
    sqlx::query_as::<_, L1Deposit>(
        r#"SELECT id, block_number, block_timestamp, tx_hash, log_index, from_address,
                  to_address, amount, amount_wei, extra_data, event, matching_hash, matched_l2_id
           FROM l1_eth_deposits_initiated WHERE id = ?"#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .wrap_err_with(|| format!("Failed to get L1 deposit {}", id))
}

/// Get an L2 deposit by id
pub async fn get_l2_deposit(pool: &SqlitePool, id: i64) -> Result<Option<L2Deposit>> {
    sqlx::query_as::<_, L2Deposit>(
        r#"SELECT id, block_number, block_timestamp, tx_hash, log_index, l1_token, l2_token,
                  from_address, to_address, amount, amount_wei, extra_data, event,
                  matching_hash, matched_l1_id
           FROM l2_deposits_finalized WHERE id = ?"#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .wrap_err_with(|| format!("Failed to get L2 deposit {}", id))
}

/// Count rows of one event table
pub async fn count_deposits(pool: &SqlitePool, kind: DepositEventKind) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM {}", kind.table());
    sqlx::query_scalar::<_, i64>(&sql)
        .fetch_one(pool)
        .await
        .wrap_err_with(|| format!("Failed to count {} rows", kind))
}

// ---------------------------------------------------------------------------
// Reporting
// ---------------------------------------------------------------------------

/// Matched pairs, newest L1 deposit first
pub async fn get_matched_deposits(
    pool: &SqlitePool,
    limit: i64,
    offset: i64,
) -> Result<Vec<MatchedDeposit>> {
    sqlx::query_as::<_, MatchedDeposit>(
        r#"
        SELECT l1.id AS id,
               l1.from_address AS from_address,
               l2.to_address AS to_address,
               l1.amount AS amount,
               l1.block_number AS l1_block_number,
               l2.block_number AS l2_block_number,
               l1.block_timestamp AS l1_timestamp,
               l2.block_timestamp AS l2_timestamp,
               l2.block_timestamp - l1.block_timestamp AS time_diff_seconds,
               l1.tx_hash AS tx_hash_l1,
               l2.tx_hash AS tx_hash_l2
        FROM l1_eth_deposits_initiated l1
        JOIN l2_deposits_finalized l2 ON l1.matched_l2_id = l2.id
        ORDER BY l1.block_timestamp DESC, l1.id DESC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
    .wrap_err("Failed to get matched deposits")
}

/// Number of matched pairs
pub async fn count_matched_deposits(pool: &SqlitePool) -> Result<i64> {
    sqlx::query_scalar::<_, i64>(
        r#"SELECT COUNT(*) FROM l1_eth_deposits_initiated WHERE matched_l2_id IS NOT NULL"#,
    )
    .fetch_one(pool)
    .await
    .wrap_err("Failed to count matched deposits")
}

/// L1 deposits still waiting for their L2 counterpart, newest first
pub async fn get_unmatched_deposits(
    pool: &SqlitePool,
    limit: i64,
    offset: i64,
) -> Result<Vec<UnmatchedDeposit>> {
    sqlx::query_as::<_, UnmatchedDeposit>(
        r#"
        SELECT id, from_address, to_address, amount, block_number, block_timestamp, tx_hash
        FROM l1_eth_deposits_initiated
        WHERE matched_l2_id IS NULL
        ORDER BY block_timestamp DESC, id DESC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
    .wrap_err("Failed to get unmatched deposits")
}

/// Number of L1 deposits without an L2 counterpart
pub async fn count_unmatched_deposits(pool: &SqlitePool) -> Result<i64> {
    sqlx::query_scalar::<_, i64>(
        r#"SELECT COUNT(*) FROM l1_eth_deposits_initiated WHERE matched_l2_id IS NULL"#,
    )
    .fetch_one(pool)
    .await
    .wrap_err("Failed to count unmatched deposits")
}

/// Latency and volume aggregates over all matched pairs
pub async fn get_match_stats(pool: &SqlitePool) -> Result<MatchStats> {
    sqlx::query_as::<_, MatchStats>(
        r#"
        SELECT COUNT(*) AS total_matched,
               CAST(AVG(l2.block_timestamp - l1.block_timestamp) AS REAL) AS avg_time_diff,
               CAST(MIN(l2.block_timestamp - l1.block_timestamp) AS REAL) AS min_time_diff,
               CAST(MAX(l2.block_timestamp - l1.block_timestamp) AS REAL) AS max_time_diff,
               CAST(SUM(l1.amount) AS REAL) AS total_bridged_eth
        FROM l1_eth_deposits_initiated l1
        JOIN l2_deposits_finalized l2 ON l1.matched_l2_id = l2.id
        "#,
    )
    .fetch_one(pool)
    .await
    .wrap_err("Failed to get bridge stats")
}

/// Highest stored block of the given event table
pub async fn get_latest_block(
    pool: &SqlitePool,
    kind: DepositEventKind,
) -> Result<Option<LatestBlock>> {
    let sql = format!(
        "SELECT block_number, block_timestamp FROM {} ORDER BY block_number DESC LIMIT 1",
        kind.table()
    );
    sqlx::query_as::<_, LatestBlock>(&sql)
        .fetch_optional(pool)
        .await
        .wrap_err_with(|| format!("Failed to get latest {} block", kind.layer()))
}

/// The `limit` most recent matched pairs as (L1 timestamp, latency), oldest first
pub async fn get_latency_series(pool: &SqlitePool, limit: i64) -> Result<Vec<LatencyPoint>> {
    let mut points = sqlx::query_as::<_, LatencyPoint>(
        r#"
        SELECT l1.block_timestamp AS timestamp,
               CAST(l2.block_timestamp - l1.block_timestamp AS REAL) AS time_diff_seconds
        FROM l1_eth_deposits_initiated l1
        JOIN l2_deposits_finalized l2 ON l1.matched_l2_id = l2.id
        ORDER BY l1.block_timestamp DESC, l1.id DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .wrap_err("Failed to get latency series")?;

    points.reverse();
    Ok(points)
}
