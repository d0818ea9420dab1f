//! Integration test crate for the aula payment core.
//!
//! This crate has no library code — it only contains integration tests
//! that exercise end-to-end purchase flows across multiple workspace
//! crates.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p aula-integration-tests
//! ```
