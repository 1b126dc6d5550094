//! Wire contracts for the arbiter decision control plane.
//!
//! Every request type rejects unknown fields; the HTTP layer decodes into
//! these types via `serde_json::from_value` so validation failures surface as
//! `request.schema_invalid` in the stable error envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const API_VERSION: &str = "v1";
pub const CONTRACT_VERSION: i64 = 1;

mod generated {
    include!(concat!(env!("OUT_DIR"), "/generated_contracts.rs"));
}

/// One schema file as hashed at build time.
#[derive(Debug, Clone, Copy)]
pub struct SchemaDigest {
    pub path: &'static str,
    pub sha256: &'static str,
    pub body: &'static str,
}

#[derive(Debug, Clone)]
pub struct ContractsManifest {
    pub openapi_sha256: &'static str,
    pub contracts_set_sha256: &'static str,
    pub generated_at: &'static str,
    pub schemas: Vec<SchemaDigest>,
}

/// Build-time manifest over `contracts/v1` and `openapi/v1.yaml`.
/// `generated_at` is build metadata and differs across builds.
pub fn contracts_manifest_v1() -> ContractsManifest {
    ContractsManifest {
        openapi_sha256: generated::GENERATED_OPENAPI_SHA256,
        contracts_set_sha256: generated::GENERATED_CONTRACTS_SET_SHA256,
        generated_at: generated::GENERATED_AT_RFC3339,
        schemas: generated::GENERATED_CONTRACT_SCHEMAS
            .iter()
            .map(|&(path, sha256, body)| SchemaDigest { path, sha256, body })
            .collect(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Actor {
    #[serde(rename = "type")]
    pub actor_type: String,
    pub id: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub claims: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventContent {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub reply_to: Option<String>,
}

/// Normalized input envelope. `event_id` is unique per tenant and scopes
/// idempotency.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventEnvelope {
    pub tenant_id: String,
    pub event_id: String,
    pub source: String,
    pub kind: String,
    pub subject: String,
    pub summary: String,
    pub payload_ref: String,
    pub room_id: String,
    pub content: EventContent,
    pub occurred_at: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub actor: Option<Actor>,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    DoNothing,
    RequestGeneration,
    SendMessage,
    SendReply,
    Notify,
    WriteExternal,
    StartJob,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::DoNothing => "do_nothing",
            ActionType::RequestGeneration => "request_generation",
            ActionType::SendMessage => "send_message",
            ActionType::SendReply => "send_reply",
            ActionType::Notify => "notify",
            ActionType::WriteExternal => "write_external",
            ActionType::StartJob => "start_job",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// A single described operation. Plans enumerate actions; nothing in this
/// system ever executes them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ActionEnvelope {
    pub action_id: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub provider: String,
    pub operation: String,
    pub params: Value,
    pub risk: RiskLevel,
    pub requires_approval: bool,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PlanDecision {
    pub policy_version: String,
    pub evaluation_time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PlanApproval {
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PlanEnvelope {
    pub plan_id: String,
    pub tenant_id: String,
    pub event_id: String,
    pub actions: Vec<ActionEnvelope>,
    pub decision: PlanDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval: Option<PlanApproval>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerationResult {
    pub v: i64,
    pub plan_id: String,
    pub action_id: String,
    pub tenant_id: String,
    pub text: String,
    #[serde(default)]
    pub trace_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Started,
    Heartbeat,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Started => "started",
            JobStatus::Heartbeat => "heartbeat",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<JobStatus> {
        match s {
            "started" => Some(JobStatus::Started),
            "heartbeat" => Some(JobStatus::Heartbeat),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobEvent {
    pub tenant_id: String,
    pub event_id: String,
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub reason_code: Option<String>,
    pub occurred_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobCancel {
    pub tenant_id: String,
    pub job_id: String,
    #[serde(default)]
    pub reason_code: Option<String>,
    pub occurred_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobState {
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Requested,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Requested => "requested",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<ApprovalStatus> {
        match s {
            "requested" => Some(ApprovalStatus::Requested),
            "approved" => Some(ApprovalStatus::Approved),
            "rejected" => Some(ApprovalStatus::Rejected),
            "expired" => Some(ApprovalStatus::Expired),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApprovalEvent {
    pub tenant_id: String,
    pub event_id: String,
    pub approval_id: String,
    pub status: ApprovalStatus,
    #[serde(default)]
    pub reason_code: Option<String>,
    pub occurred_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalState {
    pub status: ApprovalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionResultStatus {
    Succeeded,
    Failed,
    Skipped,
}

impl ActionResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionResultStatus::Succeeded => "succeeded",
            ActionResultStatus::Failed => "failed",
            ActionResultStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<ActionResultStatus> {
        match s {
            "succeeded" => Some(ActionResultStatus::Succeeded),
            "failed" => Some(ActionResultStatus::Failed),
            "skipped" => Some(ActionResultStatus::Skipped),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionResultEvent {
    pub tenant_id: String,
    pub plan_id: String,
    pub action_id: String,
    pub status: ActionResultStatus,
    pub occurred_at: String,
    #[serde(default)]
    pub evidence: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResultState {
    pub status: ActionResultStatus,
    pub occurred_at: String,
    pub evidence: Value,
    pub payload_fingerprint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthZResource {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub id: String,
    #[serde(default)]
    pub attributes: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthZReqData {
    pub action: String,
    pub resource: AuthZResource,
    #[serde(default)]
    pub context: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthZRequest {
    pub v: i64,
    pub tenant_id: String,
    pub correlation_id: String,
    pub actor: Option<Actor>,
    pub request: AuthZReqData,
}

/// External authorizer response. `reason_code` and `ttl_ms` may be absent;
/// `v`, `decision`, and `policy_version` are the contract-mandatory fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthZDecision {
    pub v: i64,
    pub decision: String,
    #[serde(default)]
    pub reason_code: String,
    pub policy_version: String,
    #[serde(default)]
    pub ttl_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalPolicySummary {
    pub required_for_types: Vec<ActionType>,
    pub defaults: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceView {
    pub allowed_action_types: Vec<ActionType>,
    pub allowed_providers: Vec<String>,
    pub approval_policy: ApprovalPolicySummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_payload_hints: Option<BTreeMap<String, i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_codes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractsMetadata {
    pub api_version: String,
    pub openapi_sha256: String,
    pub contracts_set_sha256: String,
    pub generated_at: String,
    pub schemas: BTreeMap<String, String>,
    pub governance: GovernanceView,
}
