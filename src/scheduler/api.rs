//! Public API for the scheduler
//!
//! External modules should import from here rather than directly from
//! internal modules.

// Schedule manager
pub use crate::scheduler::manager::{ScheduleManager, TriggerOutcome, DEFAULT_JOB_ID_PREFIX};

// Error handling
pub use crate::scheduler::error::{ScheduleParseError, SchedulerError, SchedulerResult};

// Stored schedules
pub use crate::scheduler::types::{NewSchedule, Schedule, ScheduleId};

// Triggers
pub use crate::scheduler::trigger::{
    parse_schedule_trigger, CronTrigger, IntervalTrigger, ScheduleMethod, Trigger,
};

// Job execution
pub use crate::scheduler::runner::{JobCallback, JobHandle, JobScheduler, TokioScheduler};
