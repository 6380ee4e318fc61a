//! Test modules for the plugin system
//!
//! Lifecycle, concurrency and bootstrap suites for the plugin manager.

pub(crate) mod utils;
