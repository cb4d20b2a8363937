//! Shared helpers for the backfill tests

#![allow(dead_code)]

use alloy::primitives::{address, Address, Bytes, B256, U256};
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

use bridge_reconciler::contracts::{DepositFinalized, ETHDepositInitiated};
use bridge_reconciler::error::AdapterError;
use bridge_reconciler::source::EventSource;
use bridge_reconciler::types::RawLog;

pub const L1_BRIDGE: Address = address!("54d6c1435ac7b90a5d46d01ee2f22ed6ff270ed3");
pub const L2_BRIDGE: Address = address!("4200000000000000000000000000000000000010");
pub const L2_ETH: Address = address!("deaddeaddeaddeaddeaddeaddeaddeaddead0000");

/// In-memory chain: fixed head, a list of logs and linear block times
pub struct MockEventSource {
    head: u64,
    genesis_time: u64,
    block_time: u64,
    logs: Vec<RawLog>,
    /// Every `filter_logs` range requested, in order
    requested: Mutex<Vec<(u64, u64)>>,
    /// `filter_logs` fails for ranges containing this block
    fail_at: Mutex<Option<u64>>,
    /// Fails `current_block_height`
    fail_head: bool,
    /// Flipped to true on the first `filter_logs` call
    shutdown_on_first_fetch: Option<watch::Sender<bool>>,
    delay: Option<Duration>,
}

impl MockEventSource {
    pub fn new(head: u64, genesis_time: u64, block_time: u64) -> Self {
        Self {
            head,
            genesis_time,
            block_time,
            logs: Vec::new(),
            requested: Mutex::new(Vec::new()),
            fail_at: Mutex::new(None),
            fail_head: false,
            shutdown_on_first_fetch: None,
            delay: None,
        }
    }

    pub fn with_logs(mut self, mut logs: Vec<RawLog>) -> Self {
        logs.sort_by_key(|l| (l.block_number, l.log_index));
        self.logs = logs;
        self
    }

    pub fn failing_at(self, block: u64) -> Self {
        *self.fail_at.lock().unwrap() = Some(block);
        self
    }

    pub fn failing_head(mut self) -> Self {
        self.fail_head = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn shutdown_after_first_fetch(mut self, tx: watch::Sender<bool>) -> Self {
        self.shutdown_on_first_fetch = Some(tx);
        self
    }

    pub fn clear_failure(&self) {
        *self.fail_at.lock().unwrap() = None;
    }

    pub fn requested(&self) -> Vec<(u64, u64)> {
        self.requested.lock().unwrap().clone()
    }

    pub fn time_of(&self, block: u64) -> u64 {
        self.genesis_time + block * self.block_time
    }
}

#[async_trait]
impl EventSource for MockEventSource {
    async fn current_block_height(&self) -> Result<u64, AdapterError> {
        if self.fail_head {
            return Err(AdapterError::classify("get_block_number", "connection refused"));
        }
        Ok(self.head)
    }

    async fn filter_logs(
        &self,
        address: Address,
        topic: B256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, AdapterError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.requested.lock().unwrap().push((from_block, to_block));

        if let Some(tx) = &self.shutdown_on_first_fetch {
            let _ = tx.send(true);
        }

        let fail_at = *self.fail_at.lock().unwrap();
        if let Some(block) = fail_at {
            if (from_block..=to_block).contains(&block) {
                return Err(AdapterError::permanent("get_logs", "injected failure"));
            }
        }

        Ok(self
            .logs
            .iter()
            .filter(|l| l.address == address)
            .filter(|l| l.topics.first() == Some(&topic))
            .filter(|l| (from_block..=to_block).contains(&l.block_number))
            .cloned()
            .collect())
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<u64, AdapterError> {
        Ok(self.time_of(block_number))
    }
}

pub fn eth(n: u64) -> U256 {
    U256::from(n) * U256::from(10u64).pow(U256::from(18u64))
}

fn tx_hash(seed: u64, layer: u8) -> B256 {
    let mut bytes = [0u8; 32];
    bytes[0] = layer;
    bytes[24..].copy_from_slice(&seed.to_be_bytes());
    B256::from(bytes)
}

/// An `ETHDepositInitiated` log emitted by the L1 bridge
pub fn l1_deposit_log(block: u64, log_index: u64, sender: Address, amount: U256) -> RawLog {
    let event = ETHDepositInitiated {
        from: sender,
        to: sender,
        amount,
        extraData: Bytes::new(),
    };
    let data = event.encode_log_data();
    RawLog {
        address: L1_BRIDGE,
        topics: data.topics().to_vec(),
        data: data.data,
        block_number: block,
        block_hash: None,
        transaction_hash: tx_hash(block * 1000 + log_index, 1),
        log_index,
    }
}

/// A `DepositFinalized` log emitted by the L2 bridge
pub fn l2_finalized_log(block: u64, log_index: u64, sender: Address, amount: U256) -> RawLog {
    let event = DepositFinalized {
        l1Token: Address::ZERO,
        l2Token: L2_ETH,
        from: sender,
        to: sender,
        amount,
        extraData: Bytes::new(),
    };
    let data = event.encode_log_data();
    RawLog {
        address: L2_BRIDGE,
        topics: data.topics().to_vec(),
        data: data.data,
        block_number: block,
        block_hash: None,
        transaction_hash: tx_hash(block * 1000 + log_index, 2),
        log_index,
    }
}

/// A bridge log that does not decode as `ETHDepositInitiated` (missing `to` topic)
pub fn malformed_l1_log(block: u64, log_index: u64) -> RawLog {
    let mut log = l1_deposit_log(block, log_index, Address::repeat_byte(0xee), eth(1));
    log.topics.truncate(2);
    log
}

pub fn sender(n: u8) -> Address {
    Address::repeat_byte(n)
}
