//! Relay coordination
//!
//! The relay engine, per pass and per chain role:
//! 1. Scans a trailing block window for bridge events
//! 2. Admits each event through the dedup ledger
//! 3. Submits the mirror call on the counterpart chain
//! 4. Records the outcome and reports a summary

pub mod engine;
pub mod summary;

pub use engine::RelayEngine;
pub use summary::PassSummary;
