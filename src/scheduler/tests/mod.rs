//! Test modules for the scheduler
//!
//! Job index maintenance and scheduled command execution.

pub(crate) mod utils;
