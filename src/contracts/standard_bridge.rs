//! Standard bridge event ABI definitions
//!
//! Uses alloy's sol! macro to generate type-safe bindings for the two events the
//! reconciler follows.

use alloy::sol;

sol! {
    /// L1StandardBridge: emitted when ETH is deposited into the bridge on L1
    event ETHDepositInitiated(
        address indexed from,
        address indexed to,
        uint256 amount,
        bytes extraData
    );

    /// L2StandardBridge: emitted when a deposit has been credited on L2
    event DepositFinalized(
        address indexed l1Token,
        address indexed l2Token,
        address indexed from,
        address to,
        uint256 amount,
        bytes extraData
    );
}
