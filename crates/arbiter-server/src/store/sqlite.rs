use super::{action_result_key, scoped_key, IdempotencyRecord, PendingGeneration, StoreError};
use arbiter_contracts::{
    ActionResultState, ActionResultStatus, ApprovalState, ApprovalStatus, JobState, JobStatus,
};
use arbiter_kernel::RoomState;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS idempotency (
                key TEXT PRIMARY KEY,
                payload_fingerprint TEXT NOT NULL,
                plan_json TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS rooms (
                key TEXT PRIMARY KEY,
                generating INTEGER NOT NULL,
                pending_queue_size INTEGER NOT NULL,
                last_send_at TEXT
            );
            CREATE TABLE IF NOT EXISTS pending_generations (
                key TEXT PRIMARY KEY,
                record_json TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS tenant_rate (
                tenant_id TEXT NOT NULL,
                bucket INTEGER NOT NULL,
                count INTEGER NOT NULL,
                PRIMARY KEY (tenant_id, bucket)
            );
            CREATE TABLE IF NOT EXISTS lifecycle_ingests (
                key TEXT PRIMARY KEY,
                payload_fingerprint TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS jobs (
                key TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                reason_code TEXT,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS approvals (
                key TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                reason_code TEXT,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS action_results (
                key TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                occurred_at TEXT NOT NULL,
                evidence_json TEXT NOT NULL,
                payload_fingerprint TEXT NOT NULL
            );
            ",
        )?;
        Ok(Self { conn })
    }

    pub fn get_idempotency(
        &self,
        tenant_id: &str,
        event_id: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT payload_fingerprint, plan_json FROM idempotency WHERE key=?1",
                params![scoped_key(tenant_id, event_id)],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        row.map(|(payload_fingerprint, plan_json)| {
            serde_json::from_str(&plan_json)
                .map(|plan| IdempotencyRecord {
                    payload_fingerprint,
                    plan,
                })
                .map_err(|err| StoreError::Encode(err.to_string()))
        })
        .transpose()
    }

    pub fn put_idempotency_if_absent(
        &mut self,
        tenant_id: &str,
        event_id: &str,
        record: IdempotencyRecord,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        if let Some(existing) = self.get_idempotency(tenant_id, event_id)? {
            return Ok(Some(existing));
        }
        let plan_json = serde_json::to_string(&record.plan)
            .map_err(|err| StoreError::Encode(err.to_string()))?;
        self.conn.execute(
            "INSERT INTO idempotency(key, payload_fingerprint, plan_json) VALUES(?1, ?2, ?3)",
            params![
                scoped_key(tenant_id, event_id),
                record.payload_fingerprint,
                plan_json
            ],
        )?;
        Ok(None)
    }

    pub fn get_room_state(&self, tenant_id: &str, room_id: &str) -> Result<RoomState, StoreError> {
        let row: Option<(bool, i64, Option<String>)> = self
            .conn
            .query_row(
                "SELECT generating, pending_queue_size, last_send_at FROM rooms WHERE key=?1",
                params![scoped_key(tenant_id, room_id)],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;
        Ok(match row {
            Some((generating, queue, last_send_at)) => RoomState {
                generating,
                pending_queue_size: queue.max(0) as usize,
                last_send_at: last_send_at.as_deref().and_then(arbiter_kernel::parse_rfc3339),
            },
            None => RoomState::default(),
        })
    }

    fn put_room_state(
        &mut self,
        tenant_id: &str,
        room_id: &str,
        room: &RoomState,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO rooms(key, generating, pending_queue_size, last_send_at)
             VALUES(?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                 generating=excluded.generating,
                 pending_queue_size=excluded.pending_queue_size,
                 last_send_at=excluded.last_send_at",
            params![
                scoped_key(tenant_id, room_id),
                room.generating,
                room.pending_queue_size as i64,
                room.last_send_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn put_pending(&mut self, pending: PendingGeneration) -> Result<(), StoreError> {
        let mut room = self.get_room_state(&pending.tenant_id, &pending.room_id)?;
        room.generating = true;
        room.pending_queue_size += 1;
        self.put_room_state(&pending.tenant_id, &pending.room_id, &room)?;

        let record_json = serde_json::to_string(&pending)
            .map_err(|err| StoreError::Encode(err.to_string()))?;
        self.conn.execute(
            "INSERT INTO pending_generations(key, record_json) VALUES(?1, ?2)",
            params![scoped_key(&pending.tenant_id, &pending.action_id), record_json],
        )?;
        Ok(())
    }

    pub fn take_pending(
        &mut self,
        tenant_id: &str,
        action_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<PendingGeneration>, StoreError> {
        let key = scoped_key(tenant_id, action_id);
        let record_json: Option<String> = self
            .conn
            .query_row(
                "SELECT record_json FROM pending_generations WHERE key=?1",
                params![key],
                |r| r.get(0),
            )
            .optional()?;
        let Some(record_json) = record_json else {
            return Ok(None);
        };
        let pending: PendingGeneration = serde_json::from_str(&record_json)
            .map_err(|err| StoreError::Encode(err.to_string()))?;
        self.conn
            .execute("DELETE FROM pending_generations WHERE key=?1", params![key])?;

        let mut room = self.get_room_state(tenant_id, &pending.room_id)?;
        if room.pending_queue_size > 0 {
            room.pending_queue_size -= 1;
        }
        room.generating = room.pending_queue_size > 0;
        room.last_send_at = Some(at);
        self.put_room_state(tenant_id, &pending.room_id, &room)?;

        Ok(Some(pending))
    }

    pub fn tenant_rate_count(&self, tenant_id: &str, bucket: i64) -> Result<usize, StoreError> {
        let count: Option<i64> = self
            .conn
            .query_row(
                "SELECT count FROM tenant_rate WHERE tenant_id=?1 AND bucket=?2",
                params![tenant_id, bucket],
                |r| r.get(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0).max(0) as usize)
    }

    pub fn tenant_rate_increment(&mut self, tenant_id: &str, bucket: i64) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO tenant_rate(tenant_id, bucket, count) VALUES(?1, ?2, 1)
             ON CONFLICT(tenant_id, bucket) DO UPDATE SET count = count + 1",
            params![tenant_id, bucket],
        )?;
        // best-effort cleanup of old buckets
        self.conn.execute(
            "DELETE FROM tenant_rate WHERE tenant_id=?1 AND bucket < ?2",
            params![tenant_id, bucket - 5],
        )?;
        Ok(())
    }

    pub fn get_ingest_fingerprint(
        &self,
        tenant_id: &str,
        event_id: &str,
    ) -> Result<Option<String>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT payload_fingerprint FROM lifecycle_ingests WHERE key=?1",
                params![scoped_key(tenant_id, event_id)],
                |r| r.get(0),
            )
            .optional()?)
    }

    pub fn put_ingest_fingerprint(
        &mut self,
        tenant_id: &str,
        event_id: &str,
        fingerprint: &str,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO lifecycle_ingests(key, payload_fingerprint) VALUES(?1, ?2)",
            params![scoped_key(tenant_id, event_id), fingerprint],
        )?;
        Ok(())
    }

    pub fn get_job(&self, tenant_id: &str, job_id: &str) -> Result<Option<JobState>, StoreError> {
        let row: Option<(String, Option<String>, String)> = self
            .conn
            .query_row(
                "SELECT status, reason_code, updated_at FROM jobs WHERE key=?1",
                params![scoped_key(tenant_id, job_id)],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;
        row.map(|(status, reason_code, updated_at)| {
            JobStatus::parse(&status)
                .map(|status| JobState {
                    status,
                    reason_code,
                    updated_at,
                })
                .ok_or_else(|| StoreError::Encode(format!("unknown job status `{status}`")))
        })
        .transpose()
    }

    pub fn put_job(&mut self, tenant_id: &str, job_id: &str, state: &JobState) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO jobs(key, status, reason_code, updated_at) VALUES(?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                 status=excluded.status,
                 reason_code=excluded.reason_code,
                 updated_at=excluded.updated_at",
            params![
                scoped_key(tenant_id, job_id),
                state.status.as_str(),
                state.reason_code,
                state.updated_at
            ],
        )?;
        Ok(())
    }

    pub fn get_approval(
        &self,
        tenant_id: &str,
        approval_id: &str,
    ) -> Result<Option<ApprovalState>, StoreError> {
        let row: Option<(String, Option<String>, String)> = self
            .conn
            .query_row(
                "SELECT status, reason_code, updated_at FROM approvals WHERE key=?1",
                params![scoped_key(tenant_id, approval_id)],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;
        row.map(|(status, reason_code, updated_at)| {
            ApprovalStatus::parse(&status)
                .map(|status| ApprovalState {
                    status,
                    reason_code,
                    updated_at,
                })
                .ok_or_else(|| StoreError::Encode(format!("unknown approval status `{status}`")))
        })
        .transpose()
    }

    pub fn put_approval(
        &mut self,
        tenant_id: &str,
        approval_id: &str,
        state: &ApprovalState,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO approvals(key, status, reason_code, updated_at) VALUES(?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                 status=excluded.status,
                 reason_code=excluded.reason_code,
                 updated_at=excluded.updated_at",
            params![
                scoped_key(tenant_id, approval_id),
                state.status.as_str(),
                state.reason_code,
                state.updated_at
            ],
        )?;
        Ok(())
    }

    pub fn get_action_result(
        &self,
        tenant_id: &str,
        plan_id: &str,
        action_id: &str,
    ) -> Result<Option<ActionResultState>, StoreError> {
        let row: Option<(String, String, String, String)> = self
            .conn
            .query_row(
                "SELECT status, occurred_at, evidence_json, payload_fingerprint
                 FROM action_results WHERE key=?1",
                params![action_result_key(tenant_id, plan_id, action_id)],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .optional()?;
        row.map(|(status, occurred_at, evidence_json, payload_fingerprint)| {
            let status = ActionResultStatus::parse(&status).ok_or_else(|| {
                StoreError::Encode(format!("unknown action-result status `{status}`"))
            })?;
            let evidence = serde_json::from_str(&evidence_json)
                .map_err(|err| StoreError::Encode(err.to_string()))?;
            Ok(ActionResultState {
                status,
                occurred_at,
                evidence,
                payload_fingerprint,
            })
        })
        .transpose()
    }

    pub fn put_action_result(
        &mut self,
        tenant_id: &str,
        plan_id: &str,
        action_id: &str,
        state: &ActionResultState,
    ) -> Result<(), StoreError> {
        let evidence_json = serde_json::to_string(&state.evidence)
            .map_err(|err| StoreError::Encode(err.to_string()))?;
        self.conn.execute(
            "INSERT INTO action_results(key, status, occurred_at, evidence_json, payload_fingerprint)
             VALUES(?1, ?2, ?3, ?4, ?5)",
            params![
                action_result_key(tenant_id, plan_id, action_id),
                state.status.as_str(),
                state.occurred_at,
                evidence_json,
                state.payload_fingerprint
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> SqliteStore {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!("arbiter-store-test-{nanos}.db"));
        SqliteStore::open(&path.to_string_lossy()).unwrap()
    }

    #[test]
    fn room_state_round_trips() {
        let mut store = open_temp();
        assert_eq!(store.get_room_state("t1", "r1").unwrap().pending_queue_size, 0);

        store
            .put_pending(PendingGeneration {
                tenant_id: "t1".to_string(),
                room_id: "r1".to_string(),
                plan_id: "plan_x".to_string(),
                action_id: "act_x".to_string(),
                intent: "MESSAGE".to_string(),
                reply_to: Some("m-9".to_string()),
            })
            .unwrap();

        let room = store.get_room_state("t1", "r1").unwrap();
        assert!(room.generating);
        assert_eq!(room.pending_queue_size, 1);

        let at = chrono::Utc::now();
        let pending = store.take_pending("t1", "act_x", at).unwrap().unwrap();
        assert_eq!(pending.reply_to.as_deref(), Some("m-9"));

        let room = store.get_room_state("t1", "r1").unwrap();
        assert!(!room.generating);
        assert_eq!(room.pending_queue_size, 0);
        assert!(room.last_send_at.is_some());
    }

    #[test]
    fn rate_counts_accumulate_and_evict() {
        let mut store = open_temp();
        store.tenant_rate_increment("t1", 10).unwrap();
        store.tenant_rate_increment("t1", 10).unwrap();
        assert_eq!(store.tenant_rate_count("t1", 10).unwrap(), 2);

        store.tenant_rate_increment("t1", 16).unwrap();
        assert_eq!(store.tenant_rate_count("t1", 10).unwrap(), 0);
    }

    #[test]
    fn job_status_round_trips() {
        let mut store = open_temp();
        assert!(store.get_job("t1", "j1").unwrap().is_none());
        store
            .put_job(
                "t1",
                "j1",
                &JobState {
                    status: JobStatus::Started,
                    reason_code: None,
                    updated_at: "2026-02-14T00:00:00Z".to_string(),
                },
            )
            .unwrap();
        let state = store.get_job("t1", "j1").unwrap().unwrap();
        assert_eq!(state.status, JobStatus::Started);
    }
}
