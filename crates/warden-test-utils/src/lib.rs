#![deny(unsafe_code)]

//! Shared test utilities for the Warden workspace.
//!
//! Provides identity and policy fixtures, config builders, temporary policy
//! catalogues and tracing helpers so that individual crate tests stay concise
//! and consistent.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member that does
//! not itself sit below `warden-config`:
//!
//! ```toml
//! [dev-dependencies]
//! warden-test-utils = { workspace = true }
//! ```

pub mod catalogue;
pub mod config;
pub mod fixtures;
pub mod tracing_setup;
