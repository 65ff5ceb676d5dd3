//! Mirror transaction submission with nonce management and gas selection

mod executor;
mod gas;
mod nonce;

pub use executor::RelayExecutor;
pub use gas::GasEstimator;
pub use nonce::NonceTracker;
