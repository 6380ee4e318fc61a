//! Core services and infrastructure

pub mod config;
pub mod logging;
pub mod shutdown;
pub mod sync;
