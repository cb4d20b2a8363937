//! Bridge deposit reconciler
//!
//! Backfills L1StandardBridge `ETHDepositInitiated` and L2StandardBridge
//! `DepositFinalized` events into SQLite and links each L1 deposit to the L2
//! finalization that completes it.

pub mod api;
pub mod config;
pub mod contracts;
pub mod db;
pub mod error;
pub mod events;
pub mod hash;
pub mod matcher;
pub mod metrics;
pub mod source;
pub mod types;
pub mod watchers;
