//! Scheduler Module
//!
//! Stored schedules run plugin commands at cron or interval fire times.
//! The schedule manager registers a job for every enabled schedule whose
//! plugin is loaded and drops it again when either side goes away.

// Internal modules - all access should go through api module
pub(crate) mod error;
pub(crate) mod manager;
pub(crate) mod runner;
pub(crate) mod trigger;
pub(crate) mod types;

// Public API module - the only public interface for the scheduler
pub mod api;

#[cfg(test)]
pub(crate) mod tests;
