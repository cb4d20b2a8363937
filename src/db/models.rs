use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// Addresses and hashes are stored as raw bytes (BLOB). Amounts are stored twice:
// `amount` as REAL in ETH for aggregation, `amount_wei` as the exact decimal
// integer. Aggregates are CAST to REAL in SQL so they always decode as f64.

/// A named scan cursor
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct BlockPointer {
    pub name: String,
    pub block_number: Option<i64>,
    /// Unix timestamp (seconds) of `block_number`
    pub block_time: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

/// Unmatched row in the opposite table that a new event can pair with
#[derive(Debug, Clone, Copy, FromRow, PartialEq, Eq)]
pub struct MatchCandidate {
    pub id: i64,
    pub block_timestamp: i64,
}

/// A stored L1 `ETHDepositInitiated`
#[derive(Debug, Clone, FromRow)]
pub struct L1Deposit {
    pub id: i64,
    pub block_number: i64,
    pub block_timestamp: i64,
    pub tx_hash: Vec<u8>,
    pub log_index: i64,
    pub from_address: Vec<u8>,
    pub to_address: Vec<u8>,
    pub amount: f64,
    pub amount_wei: String,
    pub extra_data: Vec<u8>,
    pub event: String,
    pub matching_hash: Vec<u8>,
    pub matched_l2_id: Option<i64>,
}

/// A stored L2 `DepositFinalized`
#[derive(Debug, Clone, FromRow)]
pub struct L2Deposit {
    pub id: i64,
    pub block_number: i64,
    pub block_timestamp: i64,
    pub tx_hash: Vec<u8>,
    pub log_index: i64,
    pub l1_token: Vec<u8>,
    pub l2_token: Vec<u8>,
    pub from_address: Vec<u8>,
    pub to_address: Vec<u8>,
    pub amount: f64,
    pub amount_wei: String,
    pub extra_data: Vec<u8>,
    pub event: String,
    pub matching_hash: Vec<u8>,
    pub matched_l1_id: Option<i64>,
}

/// A linked L1/L2 pair with its bridging latency
#[derive(Debug, Clone, FromRow)]
pub struct MatchedDeposit {
    /// L1 row id
    pub id: i64,
    pub from_address: Vec<u8>,
    /// L2 recipient
    pub to_address: Vec<u8>,
    pub amount: f64,
    pub l1_block_number: i64,
    pub l2_block_number: i64,
    pub l1_timestamp: i64,
    pub l2_timestamp: i64,
    pub time_diff_seconds: i64,
    pub tx_hash_l1: Vec<u8>,
    pub tx_hash_l2: Vec<u8>,
}

/// An L1 deposit with no L2 counterpart yet
#[derive(Debug, Clone, FromRow)]
pub struct UnmatchedDeposit {
    pub id: i64,
    pub from_address: Vec<u8>,
    pub to_address: Vec<u8>,
    pub amount: f64,
    pub block_number: i64,
    pub block_timestamp: i64,
    pub tx_hash: Vec<u8>,
}

/// Aggregates over matched pairs; every value is NULL when nothing is matched
#[derive(Debug, Clone, FromRow, PartialEq)]
pub struct MatchStats {
    pub total_matched: i64,
    pub avg_time_diff: Option<f64>,
    pub min_time_diff: Option<f64>,
    pub max_time_diff: Option<f64>,
    pub total_bridged_eth: Option<f64>,
}

/// Highest stored block of one event table
#[derive(Debug, Clone, Copy, FromRow, PartialEq, Eq)]
pub struct LatestBlock {
    pub block_number: i64,
    pub block_timestamp: i64,
}

/// One point of the latency time series
#[derive(Debug, Clone, Copy, FromRow, PartialEq)]
pub struct LatencyPoint {
    /// L1 block timestamp of the pair
    pub timestamp: i64,
    pub time_diff_seconds: f64,
}
