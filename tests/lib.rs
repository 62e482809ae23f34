//! Crate-level test suite for xml-model-validator
//!
//! - `unit`: public API checks of the individual components against the
//!   fixture resources under `tests/fixtures/resources`
//! - integration files next to this one drive whole validations, the
//!   catalog machinery, concurrent use and the command line binary
//!
//! Run with output:
//! ```bash
//! cargo test -- --nocapture
//! ```

// Common test utilities and helpers
pub mod common;

pub mod unit;

pub use common::test_helpers::*;
