//! Key-indexed persistence behind the pipeline.
//!
//! The whole backend sits behind one `tokio::sync::Mutex` owned by the app
//! state, which serializes every key domain at once: first-writer races on an
//! idempotency key, room/pending coupling, and tenant-rate increments all
//! commit atomically with respect to each other.

use arbiter_contracts::{
    ActionResultState, ApprovalState, ApprovalStatus, JobState, JobStatus, PlanEnvelope,
};
use arbiter_kernel::RoomState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(String),
    #[error("encode stored value: {0}")]
    Encode(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Sqlite(err.to_string())
    }
}

/// Cached response for one `(tenant_id, event_id)`; immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub payload_fingerprint: String,
    pub plan: PlanEnvelope,
}

/// Outstanding generation request, keyed by `(tenant_id, action_id)` and
/// consumed exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingGeneration {
    pub tenant_id: String,
    pub room_id: String,
    pub plan_id: String,
    pub action_id: String,
    pub intent: String,
    pub reply_to: Option<String>,
}

/// Outcome of a state-machine compare-and-apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Apply {
    Applied,
    InvalidTransition,
}

/// Outcome of an action-result write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirstWrite {
    Written,
    Duplicate,
    Mismatch { existing_fingerprint: String },
}

pub enum StoreBackend {
    Memory(Box<MemoryStore>),
    Sqlite(SqliteStore),
}

impl StoreBackend {
    pub fn get_idempotency(
        &self,
        tenant_id: &str,
        event_id: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        match self {
            StoreBackend::Memory(s) => Ok(s.get_idempotency(tenant_id, event_id)),
            StoreBackend::Sqlite(s) => s.get_idempotency(tenant_id, event_id),
        }
    }

    /// Stores the record unless one already exists; the existing record is
    /// returned on a lost race so the caller can treat it as a replay.
    pub fn put_idempotency_if_absent(
        &mut self,
        tenant_id: &str,
        event_id: &str,
        record: IdempotencyRecord,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        match self {
            StoreBackend::Memory(s) => Ok(s.put_idempotency_if_absent(tenant_id, event_id, record)),
            StoreBackend::Sqlite(s) => s.put_idempotency_if_absent(tenant_id, event_id, record),
        }
    }

    /// Room state for `(tenant, room)`; a default room when never referenced.
    pub fn get_room_state(&self, tenant_id: &str, room_id: &str) -> Result<RoomState, StoreError> {
        match self {
            StoreBackend::Memory(s) => Ok(s.get_room_state(tenant_id, room_id)),
            StoreBackend::Sqlite(s) => s.get_room_state(tenant_id, room_id),
        }
    }

    /// Inserts a pending generation and, in the same commit, marks the room
    /// generating and grows its queue so `pending_queue_size` always equals
    /// the number of pending entries for the room.
    pub fn put_pending(&mut self, pending: PendingGeneration) -> Result<(), StoreError> {
        match self {
            StoreBackend::Memory(s) => {
                s.put_pending(pending);
                Ok(())
            }
            StoreBackend::Sqlite(s) => s.put_pending(pending),
        }
    }

    /// Consumes a pending generation: shrinks the room queue, clears
    /// `generating` when the queue empties, and stamps `last_send_at`.
    pub fn take_pending(
        &mut self,
        tenant_id: &str,
        action_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<PendingGeneration>, StoreError> {
        match self {
            StoreBackend::Memory(s) => Ok(s.take_pending(tenant_id, action_id, at)),
            StoreBackend::Sqlite(s) => s.take_pending(tenant_id, action_id, at),
        }
    }

    pub fn tenant_rate_count(&self, tenant_id: &str, bucket: i64) -> Result<usize, StoreError> {
        match self {
            StoreBackend::Memory(s) => Ok(s.tenant_rate_count(tenant_id, bucket)),
            StoreBackend::Sqlite(s) => s.tenant_rate_count(tenant_id, bucket),
        }
    }

    /// Increments the bucket and evicts buckets older than `bucket - 5`
    /// best-effort.
    pub fn tenant_rate_increment(&mut self, tenant_id: &str, bucket: i64) -> Result<(), StoreError> {
        match self {
            StoreBackend::Memory(s) => {
                s.tenant_rate_increment(tenant_id, bucket);
                Ok(())
            }
            StoreBackend::Sqlite(s) => s.tenant_rate_increment(tenant_id, bucket),
        }
    }

    /// Fingerprint of a previously accepted lifecycle ingest
    /// `(tenant_id, event_id)`, if any.
    pub fn get_ingest_fingerprint(
        &self,
        tenant_id: &str,
        event_id: &str,
    ) -> Result<Option<String>, StoreError> {
        match self {
            StoreBackend::Memory(s) => Ok(s.get_ingest_fingerprint(tenant_id, event_id)),
            StoreBackend::Sqlite(s) => s.get_ingest_fingerprint(tenant_id, event_id),
        }
    }

    pub fn put_ingest_fingerprint(
        &mut self,
        tenant_id: &str,
        event_id: &str,
        fingerprint: &str,
    ) -> Result<(), StoreError> {
        match self {
            StoreBackend::Memory(s) => {
                s.put_ingest_fingerprint(tenant_id, event_id, fingerprint);
                Ok(())
            }
            StoreBackend::Sqlite(s) => s.put_ingest_fingerprint(tenant_id, event_id, fingerprint),
        }
    }

    pub fn get_job(&self, tenant_id: &str, job_id: &str) -> Result<Option<JobState>, StoreError> {
        match self {
            StoreBackend::Memory(s) => Ok(s.get_job(tenant_id, job_id)),
            StoreBackend::Sqlite(s) => s.get_job(tenant_id, job_id),
        }
    }

    /// Applies the transition if the kernel's job table allows it from the
    /// currently stored status.
    pub fn compare_and_apply_job(
        &mut self,
        tenant_id: &str,
        job_id: &str,
        next: JobStatus,
        reason_code: Option<String>,
        updated_at: &str,
    ) -> Result<Apply, StoreError> {
        let current = self.get_job(tenant_id, job_id)?.map(|s| s.status);
        if !arbiter_kernel::job_transition_allowed(current, next) {
            return Ok(Apply::InvalidTransition);
        }
        let state = JobState {
            status: next,
            reason_code,
            updated_at: updated_at.to_string(),
        };
        match self {
            StoreBackend::Memory(s) => {
                s.put_job(tenant_id, job_id, state);
                Ok(Apply::Applied)
            }
            StoreBackend::Sqlite(s) => {
                s.put_job(tenant_id, job_id, &state)?;
                Ok(Apply::Applied)
            }
        }
    }

    pub fn get_approval(
        &self,
        tenant_id: &str,
        approval_id: &str,
    ) -> Result<Option<ApprovalState>, StoreError> {
        match self {
            StoreBackend::Memory(s) => Ok(s.get_approval(tenant_id, approval_id)),
            StoreBackend::Sqlite(s) => s.get_approval(tenant_id, approval_id),
        }
    }

    pub fn compare_and_apply_approval(
        &mut self,
        tenant_id: &str,
        approval_id: &str,
        next: ApprovalStatus,
        reason_code: Option<String>,
        updated_at: &str,
    ) -> Result<Apply, StoreError> {
        let current = self.get_approval(tenant_id, approval_id)?.map(|s| s.status);
        if !arbiter_kernel::approval_transition_allowed(current, next) {
            return Ok(Apply::InvalidTransition);
        }
        let state = ApprovalState {
            status: next,
            reason_code,
            updated_at: updated_at.to_string(),
        };
        match self {
            StoreBackend::Memory(s) => {
                s.put_approval(tenant_id, approval_id, state);
                Ok(Apply::Applied)
            }
            StoreBackend::Sqlite(s) => {
                s.put_approval(tenant_id, approval_id, &state)?;
                Ok(Apply::Applied)
            }
        }
    }

    pub fn get_action_result(
        &self,
        tenant_id: &str,
        plan_id: &str,
        action_id: &str,
    ) -> Result<Option<ActionResultState>, StoreError> {
        match self {
            StoreBackend::Memory(s) => Ok(s.get_action_result(tenant_id, plan_id, action_id)),
            StoreBackend::Sqlite(s) => s.get_action_result(tenant_id, plan_id, action_id),
        }
    }

    /// First write wins: an identical fingerprint is a duplicate success, a
    /// differing one is a mismatch and never overwrites.
    pub fn action_result_first_write(
        &mut self,
        tenant_id: &str,
        plan_id: &str,
        action_id: &str,
        state: ActionResultState,
    ) -> Result<FirstWrite, StoreError> {
        if let Some(existing) = self.get_action_result(tenant_id, plan_id, action_id)? {
            if existing.payload_fingerprint == state.payload_fingerprint {
                return Ok(FirstWrite::Duplicate);
            }
            return Ok(FirstWrite::Mismatch {
                existing_fingerprint: existing.payload_fingerprint,
            });
        }
        match self {
            StoreBackend::Memory(s) => {
                s.put_action_result(tenant_id, plan_id, action_id, state);
                Ok(FirstWrite::Written)
            }
            StoreBackend::Sqlite(s) => {
                s.put_action_result(tenant_id, plan_id, action_id, &state)?;
                Ok(FirstWrite::Written)
            }
        }
    }
}

pub(crate) fn scoped_key(tenant_id: &str, id: &str) -> String {
    format!("{tenant_id}:{id}")
}

pub(crate) fn action_result_key(tenant_id: &str, plan_id: &str, action_id: &str) -> String {
    format!("{tenant_id}:{plan_id}:{action_id}")
}
