//! # Call Records
//!
//! Canonical per-call data and the flat-file store that holds it.

pub mod model;
pub mod store;

pub use store::{DataDir, StoreError};
