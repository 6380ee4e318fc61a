//! Plugin System Module
//!
//! Registry of plugin types and implementations, lazy single-flight
//! construction of configured instances, the related-plugin graph built
//! from their configuration, and commands exposed by live instances.

// Internal modules - all access should go through api module
pub(crate) mod builtin;
pub(crate) mod cache;
pub(crate) mod commands;
pub(crate) mod error;
pub(crate) mod events;
pub(crate) mod lock;
pub(crate) mod manager;
pub(crate) mod permission;
pub(crate) mod registry;
pub(crate) mod schema;
pub(crate) mod traits;
pub(crate) mod types;

// Public API module - the only public interface for the plugin system
pub mod api;

#[cfg(test)]
pub(crate) mod tests;
