//! Wire models for the agent deployer's callable endpoint.
//!
//! The endpoint follows the callable-function convention: requests carry their
//! payload under `data`, successful responses under `result`, and failures
//! under `error` with a canonical status string.

pub mod models;

pub use models::*;
