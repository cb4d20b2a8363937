pub mod standard_bridge;

pub use standard_bridge::{DepositFinalized, ETHDepositInitiated};
