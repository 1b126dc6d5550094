use arbiter_contracts::{ApprovalStatus, JobStatus};

/// Terminal job states admit no further transitions.
pub fn job_is_terminal(status: JobStatus) -> bool {
    matches!(
        status,
        JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
    )
}

/// Job transition table. A job comes into existence with `started`; running
/// jobs may heartbeat repeatedly until a terminal state.
pub fn job_transition_allowed(current: Option<JobStatus>, next: JobStatus) -> bool {
    match current {
        None => next == JobStatus::Started,
        Some(current) if job_is_terminal(current) => false,
        Some(JobStatus::Started) | Some(JobStatus::Heartbeat) => next != JobStatus::Started,
        Some(_) => false,
    }
}

pub fn approval_is_terminal(status: ApprovalStatus) -> bool {
    matches!(
        status,
        ApprovalStatus::Approved | ApprovalStatus::Rejected | ApprovalStatus::Expired
    )
}

/// Approval transition table. Expiry is only ever reached through an explicit
/// `expired` event, never by clock.
pub fn approval_transition_allowed(current: Option<ApprovalStatus>, next: ApprovalStatus) -> bool {
    match current {
        None => next == ApprovalStatus::Requested,
        Some(ApprovalStatus::Requested) => next != ApprovalStatus::Requested,
        Some(_) => false,
    }
}
