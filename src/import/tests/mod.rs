//! Import Scenario Tests
//!
//! End-to-end sessions against a temporary filesystem: duplicate skipping,
//! rollback after a failed placement, leave-in-place purity, cancellation
//! latency and the chunk memory bound.

#[cfg(test)]
pub mod session_scenarios;
