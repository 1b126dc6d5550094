//! Authorization capability: built-in allow-all or an external HTTP policy
//! service.
//!
//! External calls run under a per-attempt deadline with fixed-backoff
//! retries. Transport errors, non-2xx statuses, and unparseable bodies are
//! retried; responses missing a contract-mandatory field (`v`, `decision`,
//! `policy_version`) are terminal. A consecutive-failure circuit breaker
//! short-circuits calls while open; the final outcome of any unrecoverable
//! failure follows `authz.fail_mode`.

use arbiter_config::Config;
use arbiter_contracts::{
    AuthZDecision, AuthZReqData, AuthZRequest, AuthZResource, EventEnvelope, CONTRACT_VERSION,
};
use reqwest::Client;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const BUILTIN_POLICY_VERSION: &str = "builtin-v0";

#[derive(Debug, Clone)]
pub struct AuthzOutcome {
    pub allow: bool,
    pub reason_code: String,
    pub policy_version: Option<String>,
}

impl AuthzOutcome {
    fn builtin() -> Self {
        Self {
            allow: true,
            reason_code: "builtin_allow_all".to_string(),
            policy_version: Some(BUILTIN_POLICY_VERSION.to_string()),
        }
    }
}

#[derive(Clone)]
struct CachedDecision {
    outcome: AuthzOutcome,
    expires_at: Instant,
}

#[derive(Default)]
struct BreakerState {
    consecutive_failures: u64,
    open_until: Option<Instant>,
}

enum AttemptError {
    Retryable(String),
    ContractInvalid(String),
}

pub struct AuthzEngine {
    mode: String,
    endpoint: Option<String>,
    fail_mode: String,
    retry_max_attempts: usize,
    retry_backoff: Duration,
    breaker_threshold: u64,
    breaker_open: Duration,
    cache_enabled: bool,
    cache_ttl: Duration,
    cache_max_entries: usize,
    cache: Mutex<HashMap<String, CachedDecision>>,
    breaker: Mutex<BreakerState>,
    client: Client,
}

impl AuthzEngine {
    pub fn new(cfg: &Config) -> Result<Self, String> {
        let timeout = Duration::from_millis(cfg.authz.timeout_ms);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| format!("authz client init failed: {err}"))?;
        Ok(Self {
            mode: cfg.authz.mode.clone(),
            endpoint: cfg.authz.endpoint.clone(),
            fail_mode: cfg.authz.fail_mode.clone(),
            retry_max_attempts: cfg.authz.retry_max_attempts.max(1),
            retry_backoff: Duration::from_millis(cfg.authz.retry_backoff_ms),
            breaker_threshold: cfg.authz.circuit_breaker_failures,
            breaker_open: Duration::from_millis(cfg.authz.circuit_breaker_open_ms),
            cache_enabled: cfg.authz.cache.enabled,
            cache_ttl: Duration::from_millis(cfg.authz.cache.ttl_ms),
            cache_max_entries: cfg.authz.cache.max_entries,
            cache: Mutex::new(HashMap::new()),
            breaker: Mutex::new(BreakerState::default()),
            client,
        })
    }

    pub async fn authorize(&self, event: &EventEnvelope) -> AuthzOutcome {
        if self.mode == "builtin" {
            return AuthzOutcome::builtin();
        }

        let cache_key = format!(
            "{}:{}:{}:{}",
            event.tenant_id,
            event.actor.as_ref().map(|a| a.id.as_str()).unwrap_or("-"),
            event.room_id,
            event.source
        );
        if self.cache_enabled {
            let cache = self.cache.lock().await;
            if let Some(cached) = cache.get(&cache_key) {
                if cached.expires_at > Instant::now() {
                    return cached.outcome.clone();
                }
            }
        }

        if self.circuit_open().await {
            debug!(tenant_id = %event.tenant_id, "authz circuit open, short-circuiting");
            return self.failure_outcome("authz_circuit_open");
        }

        let endpoint = match self.endpoint.as_deref() {
            Some(v) if !v.is_empty() => v.to_string(),
            _ => {
                self.record_failure().await;
                return self.failure_outcome_default();
            }
        };
        let request = build_request(event);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(&endpoint, &request).await {
                Ok(decision) => {
                    self.record_success().await;
                    let (outcome, ttl) = decision_outcome(decision, self.cache_ttl);
                    if self.cache_enabled {
                        let mut cache = self.cache.lock().await;
                        if cache.len() >= self.cache_max_entries {
                            cache.clear();
                        }
                        cache.insert(
                            cache_key,
                            CachedDecision {
                                outcome: outcome.clone(),
                                expires_at: Instant::now() + ttl,
                            },
                        );
                    }
                    return outcome;
                }
                Err(AttemptError::ContractInvalid(reason)) => {
                    warn!(attempt, %reason, "authz response violates contract");
                    self.record_failure().await;
                    return self.failure_outcome_default();
                }
                Err(AttemptError::Retryable(reason)) => {
                    debug!(attempt, %reason, "authz attempt failed");
                    if attempt >= self.retry_max_attempts {
                        self.record_failure().await;
                        return self.failure_outcome_default();
                    }
                    if !self.retry_backoff.is_zero() {
                        tokio::time::sleep(self.retry_backoff).await;
                    }
                }
            }
        }
    }

    async fn attempt(
        &self,
        endpoint: &str,
        request: &AuthZRequest,
    ) -> Result<AuthZDecision, AttemptError> {
        let response = self
            .client
            .post(endpoint)
            .json(request)
            .send()
            .await
            .map_err(|err| AttemptError::Retryable(format!("transport: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptError::Retryable(format!("status {status}")));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| AttemptError::Retryable(format!("parse: {err}")))?;

        for field in ["v", "decision", "policy_version"] {
            if body.get(field).is_none() {
                return Err(AttemptError::ContractInvalid(format!("missing `{field}`")));
            }
        }
        serde_json::from_value(body)
            .map_err(|err| AttemptError::ContractInvalid(format!("shape: {err}")))
    }

    async fn circuit_open(&self) -> bool {
        let breaker = self.breaker.lock().await;
        breaker
            .open_until
            .map(|until| Instant::now() < until)
            .unwrap_or(false)
    }

    async fn record_failure(&self) {
        let mut breaker = self.breaker.lock().await;
        breaker.consecutive_failures += 1;
        if breaker.consecutive_failures >= self.breaker_threshold {
            breaker.open_until = Some(Instant::now() + self.breaker_open);
            warn!(
                failures = breaker.consecutive_failures,
                open_ms = self.breaker_open.as_millis() as u64,
                "authz circuit opened"
            );
        }
    }

    async fn record_success(&self) {
        let mut breaker = self.breaker.lock().await;
        if breaker.open_until.is_some() || breaker.consecutive_failures > 0 {
            debug!("authz circuit closed");
        }
        breaker.consecutive_failures = 0;
        breaker.open_until = None;
    }

    fn failure_outcome_default(&self) -> AuthzOutcome {
        match self.fail_mode.as_str() {
            "allow" => self.failure_outcome("authz_error_allow"),
            "fallback_builtin" => self.failure_outcome("authz_error_fallback_builtin"),
            _ => self.failure_outcome("authz_error_deny"),
        }
    }

    /// Applies `fail_mode` with an explicit reason (e.g. `authz_circuit_open`
    /// keeps its own reason while still honoring the configured mode).
    fn failure_outcome(&self, reason_code: &str) -> AuthzOutcome {
        match self.fail_mode.as_str() {
            "allow" => AuthzOutcome {
                allow: true,
                reason_code: reason_code.to_string(),
                policy_version: None,
            },
            "fallback_builtin" => AuthzOutcome {
                allow: true,
                reason_code: reason_code.to_string(),
                policy_version: Some(BUILTIN_POLICY_VERSION.to_string()),
            },
            _ => AuthzOutcome {
                allow: false,
                reason_code: reason_code.to_string(),
                policy_version: None,
            },
        }
    }
}

fn build_request(event: &EventEnvelope) -> AuthZRequest {
    let mut attributes = Map::new();
    attributes.insert("source".to_string(), Value::String(event.source.clone()));
    let mut context = Map::new();
    context.insert(
        "event_id".to_string(),
        Value::String(event.event_id.clone()),
    );

    AuthZRequest {
        v: CONTRACT_VERSION,
        tenant_id: event.tenant_id.clone(),
        correlation_id: event.event_id.clone(),
        actor: event.actor.clone(),
        request: AuthZReqData {
            action: "process_event".to_string(),
            resource: AuthZResource {
                resource_type: "room".to_string(),
                id: event.room_id.clone(),
                attributes,
            },
            context,
        },
    }
}

fn decision_outcome(decision: AuthZDecision, default_ttl: Duration) -> (AuthzOutcome, Duration) {
    let allow = decision.decision == "allow";
    let reason_code = if decision.reason_code.is_empty() {
        if allow {
            "authz_allow".to_string()
        } else {
            "authz_deny".to_string()
        }
    } else {
        decision.reason_code
    };
    let ttl = if decision.ttl_ms > 0 {
        Duration::from_millis(decision.ttl_ms as u64)
    } else {
        default_ttl
    };
    (
        AuthzOutcome {
            allow,
            reason_code,
            policy_version: Some(decision.policy_version),
        },
        ttl,
    )
}
