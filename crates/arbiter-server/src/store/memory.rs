use super::{action_result_key, scoped_key, IdempotencyRecord, PendingGeneration};
use arbiter_contracts::{ActionResultState, ApprovalState, JobState};
use arbiter_kernel::RoomState;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Default)]
pub struct MemoryStore {
    idempotency: HashMap<String, IdempotencyRecord>,
    rooms: HashMap<String, RoomState>,
    pending: HashMap<String, PendingGeneration>,
    tenant_rate: HashMap<String, HashMap<i64, usize>>,
    ingests: HashMap<String, String>,
    jobs: HashMap<String, JobState>,
    approvals: HashMap<String, ApprovalState>,
    action_results: HashMap<String, ActionResultState>,
}

impl MemoryStore {
    pub fn get_idempotency(&self, tenant_id: &str, event_id: &str) -> Option<IdempotencyRecord> {
        self.idempotency
            .get(&scoped_key(tenant_id, event_id))
            .cloned()
    }

    pub fn put_idempotency_if_absent(
        &mut self,
        tenant_id: &str,
        event_id: &str,
        record: IdempotencyRecord,
    ) -> Option<IdempotencyRecord> {
        let key = scoped_key(tenant_id, event_id);
        if let Some(existing) = self.idempotency.get(&key) {
            return Some(existing.clone());
        }
        self.idempotency.insert(key, record);
        None
    }

    pub fn get_room_state(&self, tenant_id: &str, room_id: &str) -> RoomState {
        self.rooms
            .get(&scoped_key(tenant_id, room_id))
            .cloned()
            .unwrap_or_default()
    }

    pub fn put_pending(&mut self, pending: PendingGeneration) {
        let room = self
            .rooms
            .entry(scoped_key(&pending.tenant_id, &pending.room_id))
            .or_default();
        room.generating = true;
        room.pending_queue_size += 1;

        self.pending
            .insert(scoped_key(&pending.tenant_id, &pending.action_id), pending);
    }

    pub fn take_pending(
        &mut self,
        tenant_id: &str,
        action_id: &str,
        at: DateTime<Utc>,
    ) -> Option<PendingGeneration> {
        let pending = self.pending.remove(&scoped_key(tenant_id, action_id))?;

        let room = self
            .rooms
            .entry(scoped_key(tenant_id, &pending.room_id))
            .or_default();
        if room.pending_queue_size > 0 {
            room.pending_queue_size -= 1;
        }
        room.generating = room.pending_queue_size > 0;
        room.last_send_at = Some(at);

        Some(pending)
    }

    pub fn tenant_rate_count(&self, tenant_id: &str, bucket: i64) -> usize {
        self.tenant_rate
            .get(tenant_id)
            .and_then(|buckets| buckets.get(&bucket))
            .copied()
            .unwrap_or(0)
    }

    pub fn tenant_rate_increment(&mut self, tenant_id: &str, bucket: i64) {
        let buckets = self.tenant_rate.entry(tenant_id.to_string()).or_default();
        *buckets.entry(bucket).or_insert(0) += 1;
        // best-effort cleanup of old buckets
        buckets.retain(|b, _| *b >= bucket - 5);
    }

    pub fn get_ingest_fingerprint(&self, tenant_id: &str, event_id: &str) -> Option<String> {
        self.ingests.get(&scoped_key(tenant_id, event_id)).cloned()
    }

    pub fn put_ingest_fingerprint(&mut self, tenant_id: &str, event_id: &str, fingerprint: &str) {
        self.ingests
            .insert(scoped_key(tenant_id, event_id), fingerprint.to_string());
    }

    pub fn get_job(&self, tenant_id: &str, job_id: &str) -> Option<JobState> {
        self.jobs.get(&scoped_key(tenant_id, job_id)).cloned()
    }

    pub fn put_job(&mut self, tenant_id: &str, job_id: &str, state: JobState) {
        self.jobs.insert(scoped_key(tenant_id, job_id), state);
    }

    pub fn get_approval(&self, tenant_id: &str, approval_id: &str) -> Option<ApprovalState> {
        self.approvals
            .get(&scoped_key(tenant_id, approval_id))
            .cloned()
    }

    pub fn put_approval(&mut self, tenant_id: &str, approval_id: &str, state: ApprovalState) {
        self.approvals
            .insert(scoped_key(tenant_id, approval_id), state);
    }

    pub fn get_action_result(
        &self,
        tenant_id: &str,
        plan_id: &str,
        action_id: &str,
    ) -> Option<ActionResultState> {
        self.action_results
            .get(&action_result_key(tenant_id, plan_id, action_id))
            .cloned()
    }

    pub fn put_action_result(
        &mut self,
        tenant_id: &str,
        plan_id: &str,
        action_id: &str,
        state: ActionResultState,
    ) {
        self.action_results
            .insert(action_result_key(tenant_id, plan_id, action_id), state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(action_id: &str) -> PendingGeneration {
        PendingGeneration {
            tenant_id: "t1".to_string(),
            room_id: "r1".to_string(),
            plan_id: "plan_x".to_string(),
            action_id: action_id.to_string(),
            intent: "REPLY".to_string(),
            reply_to: None,
        }
    }

    #[test]
    fn pending_queue_tracks_room_state() {
        let mut store = MemoryStore::default();
        store.put_pending(pending("a1"));
        store.put_pending(pending("a2"));

        let room = store.get_room_state("t1", "r1");
        assert!(room.generating);
        assert_eq!(room.pending_queue_size, 2);

        let at = chrono::Utc::now();
        assert!(store.take_pending("t1", "a1", at).is_some());
        let room = store.get_room_state("t1", "r1");
        assert!(room.generating);
        assert_eq!(room.pending_queue_size, 1);

        assert!(store.take_pending("t1", "a2", at).is_some());
        let room = store.get_room_state("t1", "r1");
        assert!(!room.generating);
        assert_eq!(room.pending_queue_size, 0);
        assert_eq!(room.last_send_at, Some(at));

        assert!(store.take_pending("t1", "a2", at).is_none());
    }

    #[test]
    fn rate_buckets_evict_old_entries() {
        let mut store = MemoryStore::default();
        store.tenant_rate_increment("t1", 100);
        store.tenant_rate_increment("t1", 100);
        assert_eq!(store.tenant_rate_count("t1", 100), 2);

        store.tenant_rate_increment("t1", 106);
        assert_eq!(store.tenant_rate_count("t1", 100), 0);
        assert_eq!(store.tenant_rate_count("t1", 106), 1);
    }

    #[test]
    fn idempotency_if_absent_returns_existing() {
        let mut store = MemoryStore::default();
        let record = IdempotencyRecord {
            payload_fingerprint: "fp1".to_string(),
            plan: sample_plan(),
        };
        assert!(store
            .put_idempotency_if_absent("t1", "e1", record.clone())
            .is_none());

        let second = IdempotencyRecord {
            payload_fingerprint: "fp2".to_string(),
            plan: sample_plan(),
        };
        let existing = store
            .put_idempotency_if_absent("t1", "e1", second)
            .expect("first write kept");
        assert_eq!(existing.payload_fingerprint, "fp1");
    }

    fn sample_plan() -> arbiter_contracts::PlanEnvelope {
        arbiter_contracts::PlanEnvelope {
            plan_id: "plan_0".to_string(),
            tenant_id: "t1".to_string(),
            event_id: "e1".to_string(),
            actions: vec![],
            decision: arbiter_contracts::PlanDecision {
                policy_version: "p1".to_string(),
                evaluation_time: "2026-02-14T00:00:00Z".to_string(),
            },
            approval: None,
        }
    }
}
