use crate::error::ApiError;
use crate::pipeline::AppState;
use arbiter_config::Config;
use arbiter_contracts::{
    contracts_manifest_v1, ActionResultState, ActionType, ApprovalPolicySummary, ApprovalState,
    ContractsMetadata, GovernanceView, JobState, PlanEnvelope, API_VERSION,
};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use std::collections::BTreeMap;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/healthz", get(healthz))
        .route("/v1/contracts", get(contracts))
        .route("/v1/events", post(events))
        .route("/v1/generations", post(generations))
        .route("/v1/job-events", post(job_events))
        .route("/v1/job-cancel", post(job_cancel))
        .route("/v1/approval-events", post(approval_events))
        .route("/v1/action-results", post(action_results))
        .route("/v1/jobs/{tenant}/{id}", get(read_job))
        .route("/v1/approvals/{tenant}/{id}", get(read_approval))
        .route(
            "/v1/action-results/{tenant}/{plan}/{action}",
            get(read_action_result),
        )
        .with_state(state)
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn contracts(State(state): State<AppState>) -> Json<ContractsMetadata> {
    Json((*state.contracts_metadata).clone())
}

async fn events(
    State(state): State<AppState>,
    Json(raw): Json<Value>,
) -> Result<Json<PlanEnvelope>, ApiError> {
    state.process_event(raw).await.map(Json)
}

async fn generations(
    State(state): State<AppState>,
    Json(raw): Json<Value>,
) -> Result<Json<PlanEnvelope>, ApiError> {
    state.process_generation(raw).await.map(Json)
}

async fn job_events(
    State(state): State<AppState>,
    Json(raw): Json<Value>,
) -> Result<StatusCode, ApiError> {
    state.process_job_event(raw).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn job_cancel(
    State(state): State<AppState>,
    Json(raw): Json<Value>,
) -> Result<StatusCode, ApiError> {
    state.process_job_cancel(raw).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn approval_events(
    State(state): State<AppState>,
    Json(raw): Json<Value>,
) -> Result<StatusCode, ApiError> {
    state.process_approval_event(raw).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn action_results(
    State(state): State<AppState>,
    Json(raw): Json<Value>,
) -> Result<StatusCode, ApiError> {
    state.process_action_result(raw).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn read_job(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(String, String)>,
) -> Result<Json<JobState>, ApiError> {
    state.get_job(&tenant, &id).await.map(Json)
}

async fn read_approval(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(String, String)>,
) -> Result<Json<ApprovalState>, ApiError> {
    state.get_approval(&tenant, &id).await.map(Json)
}

async fn read_action_result(
    State(state): State<AppState>,
    Path((tenant, plan, action)): Path<(String, String, String)>,
) -> Result<Json<ActionResultState>, ApiError> {
    state.get_action_result(&tenant, &plan, &action).await.map(Json)
}

/// Assembles the `/v1/contracts` response from the build-time manifest and
/// the configured governance policy.
pub(crate) fn build_contracts_metadata(cfg: &Config) -> ContractsMetadata {
    let manifest = contracts_manifest_v1();
    let schemas = manifest
        .schemas
        .iter()
        .map(|v| (v.path.to_string(), v.sha256.to_string()))
        .collect::<BTreeMap<_, _>>();

    let mut defaults = BTreeMap::new();
    defaults.insert("notify".to_string(), cfg.policy.require_approval_for_notify);
    defaults.insert(
        "write_external".to_string(),
        cfg.policy.require_approval_for_write_external,
    );
    defaults.insert(
        "start_job".to_string(),
        cfg.policy.require_approval_for_start_job,
    );

    let mut required_for_types = Vec::new();
    if cfg.policy.require_approval_for_notify {
        required_for_types.push(ActionType::Notify);
    }
    if cfg.policy.require_approval_for_write_external {
        required_for_types.push(ActionType::WriteExternal);
    }
    if cfg.policy.require_approval_for_start_job {
        required_for_types.push(ActionType::StartJob);
    }

    ContractsMetadata {
        api_version: API_VERSION.to_string(),
        openapi_sha256: manifest.openapi_sha256.to_string(),
        contracts_set_sha256: manifest.contracts_set_sha256.to_string(),
        generated_at: manifest.generated_at.to_string(),
        schemas,
        governance: GovernanceView {
            allowed_action_types: vec![
                ActionType::DoNothing,
                ActionType::RequestGeneration,
                ActionType::SendMessage,
                ActionType::SendReply,
                ActionType::Notify,
                ActionType::WriteExternal,
                ActionType::StartJob,
            ],
            allowed_providers: cfg.governance.allowed_providers.clone(),
            approval_policy: ApprovalPolicySummary {
                required_for_types,
                defaults,
            },
            max_payload_hints: Some(BTreeMap::from([
                ("event_summary_max_bytes".to_string(), 4096),
                ("action_params_max_bytes".to_string(), 16384),
            ])),
            error_codes: Some("../contracts/v1/error.schema.json".to_string()),
        },
    }
}
