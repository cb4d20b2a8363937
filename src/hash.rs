//! Deposit matching hash
//!
//! An L1 `ETHDepositInitiated` and the L2 `DepositFinalized` that completes it
//! carry the same asset, sender, amount and extra data. Hashing those four
//! fields in a fixed order gives a join key that is bit-identical on both sides.

use alloy::primitives::{Address, B256, U256};
use tiny_keccak::{Hasher, Keccak};

/// Asset identifier used for native ETH deposits
pub const NATIVE_ASSET: Address = Address::ZERO;

/// Compute keccak256 hash of data
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

/// Big-endian bytes of `amount` with leading zero bytes stripped.
///
/// Zero encodes as the empty slice.
pub fn amount_bytes(amount: &U256) -> Vec<u8> {
    let bytes = amount.to_be_bytes::<32>();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[first..].to_vec()
}

/// Compute the deposit matching hash:
/// keccak256(asset ‖ sender ‖ amount ‖ extraData)
///
/// `asset` and `sender` are the raw 20-byte addresses, `amount` is the
/// smallest-unit integer encoded by [`amount_bytes`].
pub fn deposit_matching_hash(
    asset: &Address,
    sender: &Address,
    amount: &U256,
    extra_data: &[u8],
) -> B256 {
    let amount = amount_bytes(amount);
    let mut data = Vec::with_capacity(20 + 20 + amount.len() + extra_data.len());
    data.extend_from_slice(asset.as_slice());
    data.extend_from_slice(sender.as_slice());
    data.extend_from_slice(&amount);
    data.extend_from_slice(extra_data);

    B256::from(keccak256(&data))
}

/// Convert bytes to hex string with 0x prefix
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}
