//! Common types shared by the scanner, the matcher and the store

use alloy::primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two ledgers of the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainLayer {
    L1,
    L2,
}

impl ChainLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainLayer::L1 => "l1",
            ChainLayer::L2 => "l2",
        }
    }
}

impl fmt::Display for ChainLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Bridge event types tracked by the reconciler.
///
/// `EthDepositInitiated` is the source side (emitted by the L1StandardBridge),
/// `DepositFinalized` is the destination side (emitted by the L2StandardBridge).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositEventKind {
    EthDepositInitiated,
    DepositFinalized,
}

impl DepositEventKind {
    pub fn layer(&self) -> ChainLayer {
        match self {
            DepositEventKind::EthDepositInitiated => ChainLayer::L1,
            DepositEventKind::DepositFinalized => ChainLayer::L2,
        }
    }

    /// The event type whose rows this kind is matched against
    pub fn opposite(&self) -> DepositEventKind {
        match self {
            DepositEventKind::EthDepositInitiated => DepositEventKind::DepositFinalized,
            DepositEventKind::DepositFinalized => DepositEventKind::EthDepositInitiated,
        }
    }

    /// Table holding rows of this kind
    pub fn table(&self) -> &'static str {
        match self {
            DepositEventKind::EthDepositInitiated => "l1_eth_deposits_initiated",
            DepositEventKind::DepositFinalized => "l2_deposits_finalized",
        }
    }

    /// Stable `{chain}_{eventType}` prefix of the persisted pointer names
    pub fn pointer_prefix(&self) -> &'static str {
        match self {
            DepositEventKind::EthDepositInitiated => "l1_standard_bridge_eth_deposit_initiated",
            DepositEventKind::DepositFinalized => "l2_standard_bridge_eth_deposit_finalized",
        }
    }

    /// Name of the retreating "lowest scanned" cursor
    pub fn lowest_pointer_name(&self) -> String {
        format!("{}_lowest_processed_block", self.pointer_prefix())
    }

    /// Name of the "last seen at startup" ceiling
    pub fn last_pointer_name(&self) -> String {
        format!("{}_last_processed_block", self.pointer_prefix())
    }
}

impl fmt::Display for DepositEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepositEventKind::EthDepositInitiated => write!(f, "ETHDepositInitiated"),
            DepositEventKind::DepositFinalized => write!(f, "DepositFinalized"),
        }
    }
}

/// An inclusive block range `[from_block, to_block]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub from_block: u64,
    pub to_block: u64,
}

impl BlockRange {
    pub fn block_count(&self) -> u64 {
        self.to_block - self.from_block + 1
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.from_block, self.to_block)
    }
}

/// A log record as returned by the chain.
///
/// The JSON form of this struct is what gets stored as the raw event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<B256>,
    pub transaction_hash: B256,
    pub log_index: u64,
}

/// Per-scanner logging context.
///
/// Carried explicitly by every scheduler instead of a shared global logger; the
/// span it builds is entered for the lifetime of the scan.
#[derive(Debug, Clone)]
pub struct ScanContext {
    pub kind: DepositEventKind,
    pub bridge_address: Address,
}

impl ScanContext {
    pub fn new(kind: DepositEventKind, bridge_address: Address) -> Self {
        Self {
            kind,
            bridge_address,
        }
    }

    pub fn chain(&self) -> ChainLayer {
        self.kind.layer()
    }

    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "backfill",
            chain = %self.chain(),
            event = %self.kind,
            bridge_address = %self.bridge_address,
        )
    }
}
