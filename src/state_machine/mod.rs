mod job;
mod machine;
mod state;

pub use job::{
    Auditor, AuditorId, FailureReason, Job, JobId, JobInput, JobResult, JobStatus, LogEntry,
    LogLevel, TargetIdentity,
};
pub use machine::{JobStateMachine, StateError};
pub use state::{
    Event, EventKind, InvalidTransition, ResubmitPolicy, Transition, advance_progress, apply,
};
