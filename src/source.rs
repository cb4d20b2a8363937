//! Chain event sources
//!
//! The scheduler only talks to a chain through [`EventSource`]; one instance
//! per chain. [`RpcEventSource`] is the JSON-RPC implementation.

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, B256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{BlockTransactionsKind, Filter, Log};
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use eyre::{Result, WrapErr};

use crate::error::AdapterError;
use crate::types::RawLog;

/// Read access to one chain's blocks and logs
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Current head block number
    async fn current_block_height(&self) -> Result<u64, AdapterError>;

    /// Logs emitted by `address` with first topic `topic` in the inclusive range
    /// `[from_block, to_block]`, ascending by block number then log index
    async fn filter_logs(
        &self,
        address: Address,
        topic: B256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, AdapterError>;

    /// Unix timestamp (seconds) of block `block_number`
    async fn block_timestamp(&self, block_number: u64) -> Result<u64, AdapterError>;
}

/// [`EventSource`] backed by an HTTP JSON-RPC endpoint
pub struct RpcEventSource {
    provider: RootProvider<Http<Client>>,
}

impl RpcEventSource {
    pub fn new(rpc_url: &str) -> Result<Self> {
        let url = rpc_url.parse().wrap_err("Failed to parse RPC URL")?;
        let provider = ProviderBuilder::new().on_http(url);
        Ok(Self { provider })
    }
}

#[async_trait]
impl EventSource for RpcEventSource {
    async fn current_block_height(&self) -> Result<u64, AdapterError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| AdapterError::classify("get_block_number", e))
    }

    async fn filter_logs(
        &self,
        address: Address,
        topic: B256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, AdapterError> {
        let filter = Filter::new()
            .address(address)
            .event_signature(topic)
            .from_block(from_block)
            .to_block(to_block);

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| AdapterError::classify("get_logs", e))?;

        let mut raw = logs
            .into_iter()
            .map(raw_log_from_rpc)
            .collect::<Result<Vec<_>, _>>()?;
        raw.sort_by_key(|log| (log.block_number, log.log_index));
        Ok(raw)
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<u64, AdapterError> {
        let block = self
            .provider
            .get_block_by_number(
                BlockNumberOrTag::Number(block_number),
                BlockTransactionsKind::Hashes,
            )
            .await
            .map_err(|e| AdapterError::classify("get_block_by_number", e))?
            .ok_or_else(|| {
                AdapterError::permanent(
                    "get_block_by_number",
                    format!("block {} not found", block_number),
                )
            })?;

        Ok(block.header.timestamp)
    }
}

/// Logs returned by `eth_getLogs` for mined blocks always carry their position
fn raw_log_from_rpc(log: Log) -> Result<RawLog, AdapterError> {
    let missing = |field: &str| AdapterError::permanent("get_logs", format!("log without {}", field));

    Ok(RawLog {
        address: log.address(),
        topics: log.topics().to_vec(),
        data: log.data().data.clone(),
        block_number: log.block_number.ok_or_else(|| missing("block number"))?,
        block_hash: log.block_hash,
        transaction_hash: log.transaction_hash.ok_or_else(|| missing("transaction hash"))?,
        log_index: log.log_index.ok_or_else(|| missing("log index"))?,
    })
}
