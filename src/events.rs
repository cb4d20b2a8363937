//! Bridge log parsing
//!
//! Turns raw logs into typed deposit events and derives everything the store
//! needs from them: parsed fields, the matching hash, the normalized amount and
//! the raw JSON payload.

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::SolEvent;
use bigdecimal::num_bigint::{BigInt, Sign};
use bigdecimal::{BigDecimal, ToPrimitive};

use crate::contracts::{DepositFinalized, ETHDepositInitiated};
use crate::error::{ParseError, ScanError};
use crate::hash::{deposit_matching_hash, NATIVE_ASSET};
use crate::types::{DepositEventKind, RawLog};

/// Decimals of the native asset
const ETH_DECIMALS: u32 = 18;

/// A parsed standard bridge deposit event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepositLog {
    /// L1 `ETHDepositInitiated`
    Initiated {
        from: Address,
        to: Address,
        amount: U256,
        extra_data: Bytes,
    },
    /// L2 `DepositFinalized`
    Finalized {
        l1_token: Address,
        l2_token: Address,
        from: Address,
        to: Address,
        amount: U256,
        extra_data: Bytes,
    },
}

impl DepositLog {
    /// Parse `log` as an event of the given kind
    pub fn parse(kind: DepositEventKind, log: &RawLog) -> Result<Self, ParseError> {
        match kind {
            DepositEventKind::EthDepositInitiated => parse_eth_deposit_initiated(log),
            DepositEventKind::DepositFinalized => parse_deposit_finalized(log),
        }
    }

    pub fn kind(&self) -> DepositEventKind {
        match self {
            DepositLog::Initiated { .. } => DepositEventKind::EthDepositInitiated,
            DepositLog::Finalized { .. } => DepositEventKind::DepositFinalized,
        }
    }

    /// Asset identity used for matching: native ETH on L1, the L1 token on L2
    pub fn asset(&self) -> Address {
        match self {
            DepositLog::Initiated { .. } => NATIVE_ASSET,
            DepositLog::Finalized { l1_token, .. } => *l1_token,
        }
    }

    pub fn from(&self) -> Address {
        match self {
            DepositLog::Initiated { from, .. } | DepositLog::Finalized { from, .. } => *from,
        }
    }

    pub fn to(&self) -> Address {
        match self {
            DepositLog::Initiated { to, .. } | DepositLog::Finalized { to, .. } => *to,
        }
    }

    pub fn amount(&self) -> U256 {
        match self {
            DepositLog::Initiated { amount, .. } | DepositLog::Finalized { amount, .. } => *amount,
        }
    }

    pub fn extra_data(&self) -> &Bytes {
        match self {
            DepositLog::Initiated { extra_data, .. }
            | DepositLog::Finalized { extra_data, .. } => extra_data,
        }
    }

    /// Matching hash over (asset, sender, wei amount, extra data)
    pub fn matching_hash(&self) -> B256 {
        deposit_matching_hash(
            &self.asset(),
            &self.from(),
            &self.amount(),
            self.extra_data(),
        )
    }
}

/// Parse an L1StandardBridge `ETHDepositInitiated` log.
///
/// Topics: `[signature, from, to]`; data: `(uint256 amount, bytes extraData)`.
pub fn parse_eth_deposit_initiated(log: &RawLog) -> Result<DepositLog, ParseError> {
    check_topics(log, 3, ETHDepositInitiated::SIGNATURE_HASH)?;

    let (amount, extra_data) = ETHDepositInitiated::abi_decode_data(&log.data, true)
        .map_err(|e| ParseError::Decode(e.to_string()))?;

    Ok(DepositLog::Initiated {
        from: topic_address(&log.topics[1]),
        to: topic_address(&log.topics[2]),
        amount,
        extra_data,
    })
}

/// Parse an L2StandardBridge `DepositFinalized` log.
///
/// Topics: `[signature, l1Token, l2Token, from]`;
/// data: `(address to, uint256 amount, bytes extraData)`.
pub fn parse_deposit_finalized(log: &RawLog) -> Result<DepositLog, ParseError> {
    check_topics(log, 4, DepositFinalized::SIGNATURE_HASH)?;

    let (to, amount, extra_data) = DepositFinalized::abi_decode_data(&log.data, true)
        .map_err(|e| ParseError::Decode(e.to_string()))?;

    Ok(DepositLog::Finalized {
        l1_token: topic_address(&log.topics[1]),
        l2_token: topic_address(&log.topics[2]),
        from: topic_address(&log.topics[3]),
        to,
        amount,
        extra_data,
    })
}

fn check_topics(log: &RawLog, expected: usize, signature: B256) -> Result<(), ParseError> {
    if log.topics.len() != expected {
        return Err(ParseError::TopicCount {
            expected,
            got: log.topics.len(),
        });
    }
    if log.topics[0] != signature {
        return Err(ParseError::UnexpectedSignature(log.topics[0]));
    }
    Ok(())
}

/// Indexed addresses are right-aligned in their 32-byte topic
fn topic_address(topic: &B256) -> Address {
    Address::from_slice(&topic[12..32])
}

/// Convert a wei amount to ETH, exactly
pub fn wei_to_eth(wei: &U256) -> BigDecimal {
    let digits = BigInt::from_bytes_be(Sign::Plus, &wei.to_be_bytes::<32>());
    BigDecimal::new(digits, ETH_DECIMALS as i64)
}

/// A deposit ready to be inserted into the event store
#[derive(Debug, Clone)]
pub struct NewDeposit {
    pub kind: DepositEventKind,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub tx_hash: B256,
    pub log_index: u64,
    pub from: Address,
    pub to: Address,
    /// Only set for `DepositFinalized`
    pub l1_token: Option<Address>,
    /// Only set for `DepositFinalized`
    pub l2_token: Option<Address>,
    pub amount_wei: U256,
    /// Amount normalized to ETH
    pub amount: f64,
    pub extra_data: Bytes,
    pub matching_hash: B256,
    /// Raw log as JSON, kept for audit and replay
    pub event: String,
}

impl NewDeposit {
    pub fn new(
        log: &RawLog,
        parsed: DepositLog,
        block_timestamp: u64,
    ) -> Result<Self, ScanError> {
        let event = serde_json::to_string(log)?;
        let matching_hash = parsed.matching_hash();
        let amount_wei = parsed.amount();
        let amount = wei_to_eth(&amount_wei)
            .to_f64()
            .filter(|eth| eth.is_finite())
            .ok_or_else(|| ScanError::Parse {
                block_number: log.block_number,
                tx_hash: log.transaction_hash,
                log_index: log.log_index,
                source: ParseError::Amount(amount_wei.to_string()),
            })?;

        let (l1_token, l2_token) = match &parsed {
            DepositLog::Initiated { .. } => (None, None),
            DepositLog::Finalized {
                l1_token, l2_token, ..
            } => (Some(*l1_token), Some(*l2_token)),
        };

        Ok(Self {
            kind: parsed.kind(),
            block_number: log.block_number,
            block_timestamp,
            tx_hash: log.transaction_hash,
            log_index: log.log_index,
            from: parsed.from(),
            to: parsed.to(),
            l1_token,
            l2_token,
            amount_wei,
            amount,
            extra_data: parsed.extra_data().clone(),
            matching_hash,
            event,
        })
    }
}
