//! The event-processing pipeline and its sibling ingest paths.
//!
//! `process_event` applies exactly this stage order: schema validation,
//! idempotency, room state load, gate, authorization, planner, plan emission,
//! idempotency persist + audit. Any stage that denies emits a `do_nothing`
//! plan carrying the reason code, caches it, audits once, and returns.
//! Denials are plan-level, not HTTP-level.

use crate::audit::{
    AuditEvent, AuditWriter, AuthzDecisionTrace, DecisionTrace, PlannerDecisionTrace, StageDecision,
};
use crate::authz::{AuthzEngine, AuthzOutcome};
use crate::error::ApiError;
use crate::store::{
    Apply, FirstWrite, IdempotencyRecord, MemoryStore, PendingGeneration, SqliteStore,
    StoreBackend,
};
use arbiter_config::Config;
use arbiter_contracts::{
    ActionEnvelope, ActionResultEvent, ActionResultState, ActionType, ApprovalEvent,
    ApprovalState, ContractsMetadata, EventEnvelope, GenerationResult, JobCancel, JobEvent,
    JobState, JobStatus, PlanApproval, PlanDecision, PlanEnvelope, RiskLevel, CONTRACT_VERSION,
};
use arbiter_kernel::{
    action_id, decide_intent, evaluate_gate, jcs_sha256_hex, minute_bucket, parse_rfc3339,
    plan_id, planner_probability, planner_seed, GateConfig, GateDecision, Intent, PlannerConfig,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub(crate) cfg: Config,
    pub(crate) store: Arc<Mutex<StoreBackend>>,
    pub(crate) audit: Arc<AuditWriter>,
    pub(crate) authz: Arc<AuthzEngine>,
    pub(crate) contracts_metadata: Arc<ContractsMetadata>,
}

impl AppState {
    pub fn new(cfg: Config) -> Result<Self, String> {
        let store = match cfg.store.kind.as_str() {
            "memory" => StoreBackend::Memory(Box::new(MemoryStore::default())),
            "sqlite" => {
                let path = cfg.store.sqlite_path.as_deref().ok_or_else(|| {
                    "store.sqlite_path is required when store.kind=sqlite".to_string()
                })?;
                StoreBackend::Sqlite(SqliteStore::open(path).map_err(|err| err.to_string())?)
            }
            other => {
                return Err(format!(
                    "config.invalid_store_kind: unsupported store.kind `{other}`"
                ))
            }
        };
        let audit = AuditWriter::open(
            &cfg.audit.jsonl_path,
            cfg.audit.immutable_mirror_path.as_deref(),
        )
        .map_err(|err| err.to_string())?;
        let authz = AuthzEngine::new(&cfg)?;
        let contracts_metadata = crate::http::build_contracts_metadata(&cfg);

        Ok(Self {
            store: Arc::new(Mutex::new(store)),
            audit: Arc::new(audit),
            authz: Arc::new(authz),
            contracts_metadata: Arc::new(contracts_metadata),
            cfg,
        })
    }

    pub async fn process_event(&self, raw: Value) -> Result<PlanEnvelope, ApiError> {
        // Stage 1: schema validation. No store or audit side effects.
        let event: EventEnvelope = decode(raw.clone())?;
        let event_time = validate_event(&event)?;

        // Stage 2: idempotency over the payload exactly as received.
        let incoming_fp = jcs_sha256_hex(&raw).map_err(|err| ApiError::internal(err.to_string()))?;
        let existing = {
            let store = self.store.lock().await;
            store
                .get_idempotency(&event.tenant_id, &event.event_id)
                .map_err(internal)?
        };
        if let Some(existing) = existing {
            return self.diagnose_duplicate(&event, existing, &incoming_fp);
        }

        // Stages 3 and 4: room state load, then gate evaluation on event time.
        let bucket = minute_bucket(event_time);
        let gate_cfg = GateConfig {
            cooldown_ms: self.cfg.gate.cooldown_ms,
            max_queue: self.cfg.gate.max_queue,
            tenant_rate_limit_per_min: self.cfg.gate.tenant_rate_limit_per_min,
        };
        let gate_result = {
            let store = self.store.lock().await;
            let room = store
                .get_room_state(&event.tenant_id, &event.room_id)
                .map_err(internal)?;
            let tenant_count = store
                .tenant_rate_count(&event.tenant_id, bucket)
                .map_err(internal)?;
            evaluate_gate(&room, event_time, tenant_count, &gate_cfg)
        };
        if let GateDecision::Deny { reason_code } = gate_result {
            let plan = self.do_nothing_plan(&event, reason_code);
            let plan = self.cache_deny_plan(&event, &incoming_fp, plan).await?;
            self.append_audit(
                AuditEvent::new(
                    &event.tenant_id,
                    &event.event_id,
                    "gate",
                    "deny",
                    reason_code,
                    Some(plan.plan_id.clone()),
                )
                .with_trace(DecisionTrace {
                    gate: Some(StageDecision {
                        result: "deny".to_string(),
                        reason_code: reason_code.to_string(),
                    }),
                    authz: None,
                    planner: None,
                }),
            )?;
            return Ok(plan);
        }

        // Stage 5: authorization. Never reached when the gate denied.
        let authz = self.authz.authorize(&event).await;
        if !authz.allow {
            let plan = self.do_nothing_plan(&event, &authz.reason_code);
            let plan = self.cache_deny_plan(&event, &incoming_fp, plan).await?;
            self.append_audit(
                AuditEvent::new(
                    &event.tenant_id,
                    &event.event_id,
                    "authz",
                    "deny",
                    &authz.reason_code,
                    Some(plan.plan_id.clone()),
                )
                .with_trace(DecisionTrace {
                    gate: Some(gate_allow()),
                    authz: self.authz_trace(&authz, "deny"),
                    planner: None,
                }),
            )?;
            return Ok(plan);
        }

        // Stage 6: planner.
        let planner_cfg = PlannerConfig {
            reply_policy: self.cfg.planner.reply_policy.clone(),
            reply_probability: self.cfg.planner.reply_probability,
        };
        let intent = decide_intent(&event, &planner_cfg);

        // Stage 7: plan emission under governance policy.
        self.check_governance(&event)?;
        let plan = match intent {
            Intent::Ignore => self.do_nothing_plan(&event, "planner_ignore"),
            Intent::Reply | Intent::Message => self.generation_plan(&event, intent),
        };

        // Stage 8: persist, count, audit. The first writer wins the
        // idempotency slot; a loser returns the winner's plan as a replay.
        {
            let mut store = self.store.lock().await;
            let existing = store
                .put_idempotency_if_absent(
                    &event.tenant_id,
                    &event.event_id,
                    IdempotencyRecord {
                        payload_fingerprint: incoming_fp.clone(),
                        plan: plan.clone(),
                    },
                )
                .map_err(internal)?;
            if let Some(existing) = existing {
                drop(store);
                return self.diagnose_duplicate(&event, existing, &incoming_fp);
            }

            if matches!(intent, Intent::Reply | Intent::Message) {
                store
                    .put_pending(PendingGeneration {
                        tenant_id: event.tenant_id.clone(),
                        room_id: event.room_id.clone(),
                        plan_id: plan.plan_id.clone(),
                        action_id: plan.actions[0].action_id.clone(),
                        intent: intent.as_str().to_string(),
                        reply_to: event.content.reply_to.clone(),
                    })
                    .map_err(internal)?;
            }
            store
                .tenant_rate_increment(&event.tenant_id, bucket)
                .map_err(internal)?;
        }

        self.append_audit(
            AuditEvent::new(
                &event.tenant_id,
                &event.event_id,
                "process_event",
                "ok",
                plan.actions[0].action_type.as_str(),
                Some(plan.plan_id.clone()),
            )
            .with_trace(DecisionTrace {
                gate: Some(gate_allow()),
                authz: self.authz_trace(&authz, "allow"),
                planner: Some(PlannerDecisionTrace {
                    reply_policy: planner_cfg.reply_policy,
                    chosen_intent: intent.as_str().to_string(),
                    seed: planner_seed(&event.event_id),
                    sampled_probability: planner_probability(&event.event_id),
                }),
            }),
        )?;
        info!(
            tenant_id = %event.tenant_id,
            event_id = %event.event_id,
            plan_id = %plan.plan_id,
            intent = intent.as_str(),
            "event processed"
        );
        Ok(plan)
    }

    /// Replay diagnosis for a reused `(tenant_id, event_id)`: an identical
    /// fingerprint returns the stored plan, a mismatch is a conflict carrying
    /// both hashes.
    fn diagnose_duplicate(
        &self,
        event: &EventEnvelope,
        existing: IdempotencyRecord,
        incoming_fp: &str,
    ) -> Result<PlanEnvelope, ApiError> {
        if existing.payload_fingerprint == incoming_fp {
            self.append_audit(AuditEvent::new(
                &event.tenant_id,
                &event.event_id,
                "process_event",
                "idempotency_hit",
                "idempotency_hit",
                Some(existing.plan.plan_id.clone()),
            ))?;
            return Ok(existing.plan);
        }
        self.append_audit(AuditEvent::new(
            &event.tenant_id,
            &event.event_id,
            "process_event",
            "conflict",
            "conflict.payload_mismatch",
            Some(existing.plan.plan_id.clone()),
        ))?;
        Err(ApiError::payload_mismatch(
            &existing.payload_fingerprint,
            incoming_fp,
        ))
    }

    /// Caches a deny/no-op plan; on a lost race the winner's plan is
    /// diagnosed like any other replay.
    async fn cache_deny_plan(
        &self,
        event: &EventEnvelope,
        incoming_fp: &str,
        plan: PlanEnvelope,
    ) -> Result<PlanEnvelope, ApiError> {
        let mut store = self.store.lock().await;
        let existing = store
            .put_idempotency_if_absent(
                &event.tenant_id,
                &event.event_id,
                IdempotencyRecord {
                    payload_fingerprint: incoming_fp.to_string(),
                    plan: plan.clone(),
                },
            )
            .map_err(internal)?;
        drop(store);
        match existing {
            None => Ok(plan),
            Some(existing) => self.diagnose_duplicate(event, existing, incoming_fp),
        }
    }

    pub async fn process_generation(&self, raw: Value) -> Result<PlanEnvelope, ApiError> {
        let input: GenerationResult = decode(raw)?;
        if input.v != CONTRACT_VERSION {
            return Err(ApiError::schema_invalid(format!(
                "v must be {CONTRACT_VERSION}"
            )));
        }
        for (field, value) in [
            ("tenant_id", &input.tenant_id),
            ("plan_id", &input.plan_id),
            ("action_id", &input.action_id),
        ] {
            if value.trim().is_empty() {
                return Err(ApiError::schema_invalid(format!("{field} is required")));
            }
        }

        let consumed_at = Utc::now();
        let pending = {
            let mut store = self.store.lock().await;
            store
                .take_pending(&input.tenant_id, &input.action_id, consumed_at)
                .map_err(internal)?
        };

        let Some(pending) = pending else {
            let plan = self.unknown_generation_plan(&input, consumed_at);
            self.append_audit(AuditEvent::new(
                &input.tenant_id,
                &input.action_id,
                "generation_result",
                "no_pending_action",
                "generation_unknown_action",
                Some(plan.plan_id.clone()),
            ))?;
            return Ok(plan);
        };

        let plan = self.send_plan(&input, &pending, consumed_at);
        self.append_audit(AuditEvent::new(
            &input.tenant_id,
            &input.action_id,
            "generation_result",
            "ok",
            plan.actions[0].action_type.as_str(),
            Some(plan.plan_id.clone()),
        ))?;
        Ok(plan)
    }

    pub async fn process_job_event(&self, raw: Value) -> Result<(), ApiError> {
        let input: JobEvent = decode(raw.clone())?;
        require_rfc3339(&input.occurred_at)?;
        let fingerprint =
            jcs_sha256_hex(&raw).map_err(|err| ApiError::internal(err.to_string()))?;

        let mut store = self.store.lock().await;
        if let Some(stored_fp) = store
            .get_ingest_fingerprint(&input.tenant_id, &input.event_id)
            .map_err(internal)?
        {
            drop(store);
            return self.diagnose_lifecycle_duplicate(
                &input.tenant_id,
                &input.event_id,
                "job_event",
                &stored_fp,
                &fingerprint,
            );
        }

        let applied = store
            .compare_and_apply_job(
                &input.tenant_id,
                &input.job_id,
                input.status,
                input.reason_code.clone(),
                &input.occurred_at,
            )
            .map_err(internal)?;
        if applied == Apply::InvalidTransition {
            drop(store);
            self.append_audit(AuditEvent::new(
                &input.tenant_id,
                &input.event_id,
                "job_event",
                "invalid_transition",
                "conflict.invalid_transition",
                None,
            ))?;
            return Err(ApiError::invalid_transition(format!(
                "job {} cannot transition to {}",
                input.job_id,
                input.status.as_str()
            )));
        }
        store
            .put_ingest_fingerprint(&input.tenant_id, &input.event_id, &fingerprint)
            .map_err(internal)?;
        drop(store);

        self.append_audit(AuditEvent::new(
            &input.tenant_id,
            &input.event_id,
            "job_event",
            "ok",
            input.status.as_str(),
            None,
        ))
    }

    pub async fn process_job_cancel(&self, raw: Value) -> Result<(), ApiError> {
        let input: JobCancel = decode(raw)?;
        require_rfc3339(&input.occurred_at)?;

        let mut store = self.store.lock().await;
        let Some(current) = store
            .get_job(&input.tenant_id, &input.job_id)
            .map_err(internal)?
        else {
            return Err(ApiError::not_found(format!(
                "job {} is unknown",
                input.job_id
            )));
        };
        let applied = store
            .compare_and_apply_job(
                &input.tenant_id,
                &input.job_id,
                JobStatus::Cancelled,
                input.reason_code.clone(),
                &input.occurred_at,
            )
            .map_err(internal)?;
        drop(store);

        if applied == Apply::InvalidTransition {
            return Err(ApiError::invalid_transition(format!(
                "job {} is already {}",
                input.job_id,
                current.status.as_str()
            )));
        }
        self.append_audit(AuditEvent::new(
            &input.tenant_id,
            &input.job_id,
            "job_cancel",
            "ok",
            input
                .reason_code
                .as_deref()
                .unwrap_or("cancelled"),
            None,
        ))
    }

    pub async fn process_approval_event(&self, raw: Value) -> Result<(), ApiError> {
        let input: ApprovalEvent = decode(raw.clone())?;
        require_rfc3339(&input.occurred_at)?;
        let fingerprint =
            jcs_sha256_hex(&raw).map_err(|err| ApiError::internal(err.to_string()))?;

        let mut store = self.store.lock().await;
        if let Some(stored_fp) = store
            .get_ingest_fingerprint(&input.tenant_id, &input.event_id)
            .map_err(internal)?
        {
            drop(store);
            return self.diagnose_lifecycle_duplicate(
                &input.tenant_id,
                &input.event_id,
                "approval_event",
                &stored_fp,
                &fingerprint,
            );
        }

        let applied = store
            .compare_and_apply_approval(
                &input.tenant_id,
                &input.approval_id,
                input.status,
                input.reason_code.clone(),
                &input.occurred_at,
            )
            .map_err(internal)?;
        if applied == Apply::InvalidTransition {
            drop(store);
            self.append_audit(AuditEvent::new(
                &input.tenant_id,
                &input.event_id,
                "approval_event",
                "invalid_transition",
                "conflict.invalid_transition",
                None,
            ))?;
            return Err(ApiError::invalid_transition(format!(
                "approval {} cannot transition to {}",
                input.approval_id,
                input.status.as_str()
            )));
        }
        store
            .put_ingest_fingerprint(&input.tenant_id, &input.event_id, &fingerprint)
            .map_err(internal)?;
        drop(store);

        self.append_audit(AuditEvent::new(
            &input.tenant_id,
            &input.event_id,
            "approval_event",
            "ok",
            input.status.as_str(),
            None,
        ))
    }

    pub async fn process_action_result(&self, raw: Value) -> Result<(), ApiError> {
        let input: ActionResultEvent = decode(raw.clone())?;
        require_rfc3339(&input.occurred_at)?;
        let fingerprint =
            jcs_sha256_hex(&raw).map_err(|err| ApiError::internal(err.to_string()))?;

        let outcome = {
            let mut store = self.store.lock().await;
            store
                .action_result_first_write(
                    &input.tenant_id,
                    &input.plan_id,
                    &input.action_id,
                    ActionResultState {
                        status: input.status,
                        occurred_at: input.occurred_at.clone(),
                        evidence: input.evidence.clone(),
                        payload_fingerprint: fingerprint.clone(),
                    },
                )
                .map_err(internal)?
        };

        match outcome {
            FirstWrite::Written => self.append_audit(AuditEvent::new(
                &input.tenant_id,
                &input.action_id,
                "action_result",
                "recorded",
                input.status.as_str(),
                Some(input.plan_id.clone()),
            )),
            FirstWrite::Duplicate => Ok(()),
            FirstWrite::Mismatch {
                existing_fingerprint,
            } => {
                self.append_audit(AuditEvent::new(
                    &input.tenant_id,
                    &input.action_id,
                    "action_result",
                    "conflict",
                    "conflict.payload_mismatch",
                    Some(input.plan_id.clone()),
                ))?;
                Err(ApiError::payload_mismatch(
                    &existing_fingerprint,
                    &fingerprint,
                ))
            }
        }
    }

    pub async fn get_job(&self, tenant_id: &str, job_id: &str) -> Result<JobState, ApiError> {
        let store = self.store.lock().await;
        store
            .get_job(tenant_id, job_id)
            .map_err(internal)?
            .ok_or_else(|| ApiError::not_found(format!("job {job_id} is unknown")))
    }

    pub async fn get_approval(
        &self,
        tenant_id: &str,
        approval_id: &str,
    ) -> Result<ApprovalState, ApiError> {
        let store = self.store.lock().await;
        store
            .get_approval(tenant_id, approval_id)
            .map_err(internal)?
            .ok_or_else(|| ApiError::not_found(format!("approval {approval_id} is unknown")))
    }

    pub async fn get_action_result(
        &self,
        tenant_id: &str,
        plan_id: &str,
        action_id: &str,
    ) -> Result<ActionResultState, ApiError> {
        let store = self.store.lock().await;
        store
            .get_action_result(tenant_id, plan_id, action_id)
            .map_err(internal)?
            .ok_or_else(|| {
                ApiError::not_found(format!("action result {plan_id}/{action_id} is unknown"))
            })
    }

    fn diagnose_lifecycle_duplicate(
        &self,
        tenant_id: &str,
        event_id: &str,
        action: &str,
        stored_fp: &str,
        incoming_fp: &str,
    ) -> Result<(), ApiError> {
        if stored_fp == incoming_fp {
            return Ok(());
        }
        self.append_audit(AuditEvent::new(
            tenant_id,
            event_id,
            action,
            "conflict",
            "conflict.payload_mismatch",
            None,
        ))?;
        Err(ApiError::payload_mismatch(stored_fp, incoming_fp))
    }

    /// Governance checks from plan emission: the label-requested action type
    /// must be in the governed universe and the resolved provider in the
    /// allowlist.
    fn check_governance(&self, event: &EventEnvelope) -> Result<(), ApiError> {
        if let Some(requested) = event.labels.get("action_type") {
            if !matches!(
                requested.as_str(),
                "notify" | "write_external" | "start_job"
            ) {
                return Err(ApiError::action_type_not_allowed(requested));
            }
        }
        let provider = resolved_provider(event);
        if !self
            .cfg
            .governance
            .allowed_providers
            .iter()
            .any(|allowed| allowed == provider)
        {
            return Err(ApiError::provider_not_allowed(provider));
        }
        Ok(())
    }

    fn do_nothing_plan(&self, event: &EventEnvelope, reason_code: &str) -> PlanEnvelope {
        let plan_id = plan_id(&event.tenant_id, &event.event_id);
        let action_id = action_id(&plan_id, ActionType::DoNothing, 0);
        PlanEnvelope {
            plan_id: plan_id.clone(),
            tenant_id: event.tenant_id.clone(),
            event_id: event.event_id.clone(),
            actions: vec![ActionEnvelope {
                action_id: action_id.clone(),
                action_type: ActionType::DoNothing,
                provider: "internal".to_string(),
                operation: "noop".to_string(),
                params: json!({ "reason_code": reason_code }),
                risk: RiskLevel::Low,
                requires_approval: false,
                idempotency_key: idempotency_key(&event.tenant_id, &event.event_id, &action_id),
            }],
            decision: PlanDecision {
                policy_version: self.cfg.policy.version.clone(),
                evaluation_time: event.occurred_at.clone(),
            },
            approval: Some(PlanApproval {
                required: false,
                approval_id: None,
            }),
        }
    }

    fn generation_plan(&self, event: &EventEnvelope, intent: Intent) -> PlanEnvelope {
        let plan_id = plan_id(&event.tenant_id, &event.event_id);
        let action_id = action_id(&plan_id, ActionType::RequestGeneration, 0);
        let requires_approval = self.label_requires_approval(event);

        let mut params = json!({
            "intent": intent.as_str(),
            "event_id": event.event_id,
            "room_id": event.room_id,
            "text": event.content.text,
            "summary": event.summary,
            "payload_ref": event.payload_ref,
        });
        if let Some(reply_to) = event
            .content
            .reply_to
            .as_ref()
            .filter(|v| !v.is_empty())
        {
            params["reply_to"] = Value::String(reply_to.clone());
        }

        PlanEnvelope {
            plan_id: plan_id.clone(),
            tenant_id: event.tenant_id.clone(),
            event_id: event.event_id.clone(),
            actions: vec![ActionEnvelope {
                action_id: action_id.clone(),
                action_type: ActionType::RequestGeneration,
                provider: resolved_provider(event).to_string(),
                operation: event
                    .labels
                    .get("operation")
                    .cloned()
                    .unwrap_or_else(|| "generate".to_string()),
                params,
                risk: resolved_risk(event),
                requires_approval,
                idempotency_key: idempotency_key(&event.tenant_id, &event.event_id, &action_id),
            }],
            decision: PlanDecision {
                policy_version: self.cfg.policy.version.clone(),
                evaluation_time: event.occurred_at.clone(),
            },
            approval: Some(if requires_approval {
                PlanApproval {
                    required: true,
                    approval_id: Some(format!(
                        "apr_{}_{}",
                        event.tenant_id, event.event_id
                    )),
                }
            } else {
                PlanApproval {
                    required: false,
                    approval_id: None,
                }
            }),
        }
    }

    fn send_plan(
        &self,
        input: &GenerationResult,
        pending: &PendingGeneration,
        consumed_at: DateTime<Utc>,
    ) -> PlanEnvelope {
        let reply_to = pending.reply_to.as_ref().filter(|v| !v.is_empty());
        let action_type = if pending.intent == Intent::Reply.as_str() || reply_to.is_some() {
            ActionType::SendReply
        } else {
            ActionType::SendMessage
        };

        let event_id = format!("gen:{}", pending.action_id);
        let plan_id = plan_id(&pending.tenant_id, &event_id);
        let action_id = action_id(&plan_id, action_type, 0);

        let mut params = json!({
            "text": input.text,
            "room_id": pending.room_id,
            "source_action_id": pending.action_id,
            "source_plan_id": pending.plan_id,
        });
        if let Some(reply_to) = reply_to {
            params["reply_to"] = Value::String(reply_to.clone());
        }

        PlanEnvelope {
            plan_id: plan_id.clone(),
            tenant_id: pending.tenant_id.clone(),
            event_id,
            actions: vec![ActionEnvelope {
                action_id: action_id.clone(),
                action_type,
                provider: "generic".to_string(),
                operation: "send".to_string(),
                params,
                risk: RiskLevel::Low,
                requires_approval: false,
                idempotency_key: idempotency_key(
                    &pending.tenant_id,
                    &pending.action_id,
                    &action_id,
                ),
            }],
            decision: PlanDecision {
                policy_version: self.cfg.policy.version.clone(),
                evaluation_time: consumed_at.to_rfc3339(),
            },
            approval: Some(PlanApproval {
                required: false,
                approval_id: None,
            }),
        }
    }

    fn unknown_generation_plan(
        &self,
        input: &GenerationResult,
        at: DateTime<Utc>,
    ) -> PlanEnvelope {
        let plan_id = plan_id(&input.tenant_id, &input.action_id);
        let action_id = action_id(&plan_id, ActionType::DoNothing, 0);
        PlanEnvelope {
            plan_id: plan_id.clone(),
            tenant_id: input.tenant_id.clone(),
            event_id: input.action_id.clone(),
            actions: vec![ActionEnvelope {
                action_id: action_id.clone(),
                action_type: ActionType::DoNothing,
                provider: "internal".to_string(),
                operation: "noop".to_string(),
                params: json!({ "reason_code": "generation_unknown_action" }),
                risk: RiskLevel::Low,
                requires_approval: false,
                idempotency_key: idempotency_key(&input.tenant_id, &input.action_id, &action_id),
            }],
            decision: PlanDecision {
                policy_version: self.cfg.policy.version.clone(),
                evaluation_time: at.to_rfc3339(),
            },
            approval: Some(PlanApproval {
                required: false,
                approval_id: None,
            }),
        }
    }

    fn label_requires_approval(&self, event: &EventEnvelope) -> bool {
        match event.labels.get("action_type").map(String::as_str) {
            Some("notify") => self.cfg.policy.require_approval_for_notify,
            Some("write_external") => self.cfg.policy.require_approval_for_write_external,
            Some("start_job") => self.cfg.policy.require_approval_for_start_job,
            _ => false,
        }
    }

    fn authz_trace(&self, outcome: &AuthzOutcome, result: &str) -> Option<AuthzDecisionTrace> {
        if !self.cfg.audit.include_authz_decision {
            return None;
        }
        Some(AuthzDecisionTrace {
            result: result.to_string(),
            reason_code: outcome.reason_code.clone(),
            policy_version: outcome.policy_version.clone(),
        })
    }

    fn append_audit(&self, event: AuditEvent) -> Result<(), ApiError> {
        self.audit
            .append(event)
            .map_err(|err| ApiError::audit_write_failed(err.to_string()))
    }
}

fn decode<T: DeserializeOwned>(raw: Value) -> Result<T, ApiError> {
    serde_json::from_value(raw).map_err(|err| ApiError::schema_invalid(err.to_string()))
}

fn internal(err: crate::store::StoreError) -> ApiError {
    ApiError::internal(err.to_string())
}

fn validate_event(event: &EventEnvelope) -> Result<DateTime<Utc>, ApiError> {
    for (field, value) in [
        ("tenant_id", &event.tenant_id),
        ("event_id", &event.event_id),
        ("source", &event.source),
        ("kind", &event.kind),
        ("subject", &event.subject),
        ("room_id", &event.room_id),
    ] {
        if value.trim().is_empty() {
            return Err(ApiError::schema_invalid(format!("{field} is required")));
        }
    }
    if event.content.content_type != "text" {
        return Err(ApiError::schema_invalid("content.type must be text"));
    }
    if let Some(actor) = &event.actor {
        if actor.id.trim().is_empty() {
            return Err(ApiError::schema_invalid("actor.id is required"));
        }
        if !matches!(actor.actor_type.as_str(), "human" | "service" | "system") {
            return Err(ApiError::schema_invalid("actor.type is invalid"));
        }
    }
    parse_rfc3339(&event.occurred_at)
        .ok_or_else(|| ApiError::schema_invalid("occurred_at must be RFC3339"))
}

fn require_rfc3339(value: &str) -> Result<(), ApiError> {
    parse_rfc3339(value)
        .map(|_| ())
        .ok_or_else(|| ApiError::schema_invalid("occurred_at must be RFC3339"))
}

fn resolved_provider(event: &EventEnvelope) -> &str {
    event
        .labels
        .get("provider")
        .map(String::as_str)
        .unwrap_or("generic")
}

fn resolved_risk(event: &EventEnvelope) -> RiskLevel {
    match event.labels.get("risk").map(String::as_str) {
        Some("high") => RiskLevel::High,
        Some("medium") => RiskLevel::Medium,
        _ => RiskLevel::Low,
    }
}

fn idempotency_key(tenant_id: &str, scope_id: &str, action_id: &str) -> String {
    format!("{tenant_id}:{scope_id}:{action_id}")
}

fn gate_allow() -> StageDecision {
    StageDecision {
        result: "allow".to_string(),
        reason_code: "gate_allow".to_string(),
    }
}
