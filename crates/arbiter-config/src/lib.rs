//! Configuration loading for the arbiter service.
//!
//! YAML is parsed, validated against `config/config.schema.json`, decoded into
//! [`Config`], then checked for runtime support (unsupported `store.kind`
//! fails startup with `config.invalid_store_kind`).

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config failed: {0}")]
    Read(String),
    #[error("parse config failed: {0}")]
    Parse(String),
    #[error("schema load failed: {0}")]
    SchemaLoad(String),
    #[error("schema validation failed: {0}")]
    SchemaValidation(String),
    #[error("unsupported config: {0}")]
    UnsupportedConfig(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: Server,
    pub store: Store,
    pub authz: Authz,
    pub gate: Gate,
    pub planner: Planner,
    pub audit: Audit,
    pub governance: Governance,
    pub policy: Policy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub listen_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    pub kind: String,
    #[serde(default)]
    pub sqlite_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthzCache {
    pub enabled: bool,
    pub ttl_ms: u64,
    pub max_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authz {
    pub mode: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    pub timeout_ms: u64,
    pub fail_mode: String,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: usize,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_circuit_breaker_failures")]
    pub circuit_breaker_failures: u64,
    #[serde(default = "default_circuit_breaker_open_ms")]
    pub circuit_breaker_open_ms: u64,
    pub cache: AuthzCache,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gate {
    pub cooldown_ms: u64,
    pub max_queue: usize,
    pub tenant_rate_limit_per_min: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Planner {
    pub reply_policy: String,
    pub reply_probability: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Audit {
    pub sink: String,
    pub jsonl_path: String,
    pub include_authz_decision: bool,
    #[serde(default)]
    pub immutable_mirror_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Governance {
    pub allowed_providers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub version: String,
    #[serde(default)]
    pub require_approval_for_notify: bool,
    #[serde(default = "default_require_write_external")]
    pub require_approval_for_write_external: bool,
    #[serde(default)]
    pub require_approval_for_start_job: bool,
}

fn default_retry_max_attempts() -> usize {
    1
}

fn default_retry_backoff_ms() -> u64 {
    0
}

fn default_circuit_breaker_failures() -> u64 {
    5
}

fn default_circuit_breaker_open_ms() -> u64 {
    30_000
}

fn default_require_write_external() -> bool {
    true
}

pub fn load_and_validate(path: &str) -> Result<Config, ConfigError> {
    let config_text =
        std::fs::read_to_string(path).map_err(|err| ConfigError::Read(err.to_string()))?;
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(&config_text).map_err(|err| ConfigError::Parse(err.to_string()))?;
    let instance =
        serde_json::to_value(yaml).map_err(|err| ConfigError::Parse(err.to_string()))?;

    validate_against_schema(&instance)?;

    let cfg: Config =
        serde_json::from_value(instance).map_err(|err| ConfigError::Parse(err.to_string()))?;
    validate_runtime_support(&cfg)?;
    Ok(cfg)
}

fn validate_against_schema(instance: &serde_json::Value) -> Result<(), ConfigError> {
    let schema_path = [
        std::path::PathBuf::from("config/config.schema.json"),
        std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .join("config/config.schema.json"),
    ]
    .into_iter()
    .find(|path| path.exists())
    .ok_or_else(|| {
        ConfigError::SchemaLoad("config schema not found at config/config.schema.json".to_string())
    })?;

    let schema_text = std::fs::read_to_string(schema_path)
        .map_err(|err| ConfigError::SchemaLoad(err.to_string()))?;
    let schema: serde_json::Value = serde_json::from_str(&schema_text)
        .map_err(|err| ConfigError::SchemaLoad(err.to_string()))?;

    let validator = jsonschema::validator_for(&schema)
        .map_err(|err| ConfigError::SchemaLoad(err.to_string()))?;
    if let Err(first) = validator.validate(instance) {
        return Err(ConfigError::SchemaValidation(first.to_string()));
    }
    Ok(())
}

fn validate_runtime_support(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.store.kind != "memory" && cfg.store.kind != "sqlite" {
        return Err(ConfigError::UnsupportedConfig(format!(
            "config.invalid_store_kind: store.kind `{}` is not supported (memory|sqlite)",
            cfg.store.kind
        )));
    }
    if cfg.store.kind == "sqlite"
        && cfg
            .store
            .sqlite_path
            .as_ref()
            .map(|v| v.trim().is_empty())
            .unwrap_or(true)
    {
        return Err(ConfigError::UnsupportedConfig(
            "store.sqlite_path is required when store.kind=sqlite".to_string(),
        ));
    }

    if cfg.authz.mode == "external_http"
        && cfg
            .authz
            .endpoint
            .as_ref()
            .map(|v| v.trim().is_empty())
            .unwrap_or(true)
    {
        return Err(ConfigError::UnsupportedConfig(
            "authz.endpoint is required when authz.mode=external_http".to_string(),
        ));
    }
    if cfg.authz.timeout_ms == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "authz.timeout_ms must be > 0".to_string(),
        ));
    }
    if cfg.authz.retry_max_attempts == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "authz.retry_max_attempts must be >= 1".to_string(),
        ));
    }
    if cfg.authz.circuit_breaker_failures == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "authz.circuit_breaker_failures must be >= 1".to_string(),
        ));
    }
    if cfg.authz.circuit_breaker_open_ms == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "authz.circuit_breaker_open_ms must be >= 1".to_string(),
        ));
    }

    if cfg.audit.sink != "jsonl" {
        return Err(ConfigError::UnsupportedConfig(format!(
            "audit.sink={} is not implemented; supported: jsonl",
            cfg.audit.sink
        )));
    }
    if cfg.audit.jsonl_path.trim().is_empty() {
        return Err(ConfigError::UnsupportedConfig(
            "audit.jsonl_path is required".to_string(),
        ));
    }

    if cfg.governance.allowed_providers.is_empty() {
        return Err(ConfigError::UnsupportedConfig(
            "governance.allowed_providers must not be empty".to_string(),
        ));
    }
    if cfg.policy.version.trim().is_empty() {
        return Err(ConfigError::UnsupportedConfig(
            "policy.version must not be empty".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn write_temp_config(contents: &str) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before unix epoch")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("arbiter-config-test-{nanos}.yaml"));
        std::fs::write(&path, contents).expect("write temp config");
        path.to_string_lossy().to_string()
    }

    fn base_yaml() -> String {
        r#"
server:
  listen_addr: "127.0.0.1:0"

store:
  kind: "memory"

authz:
  mode: "builtin"
  timeout_ms: 300
  fail_mode: "deny"
  cache:
    enabled: true
    ttl_ms: 30000
    max_entries: 100

gate:
  cooldown_ms: 3000
  max_queue: 10
  tenant_rate_limit_per_min: 0

planner:
  reply_policy: "mention_first"
  reply_probability: 0.0

audit:
  sink: "jsonl"
  jsonl_path: "./arbiter-audit.jsonl"
  include_authz_decision: true

governance:
  allowed_providers: ["generic"]

policy:
  version: "policy-v1"
"#
        .to_string()
    }

    #[test]
    fn accepts_base_config_with_defaults() {
        let path = write_temp_config(&base_yaml());
        let cfg = load_and_validate(&path).expect("base config should load");
        assert_eq!(cfg.authz.retry_max_attempts, 1);
        assert_eq!(cfg.authz.circuit_breaker_failures, 5);
        assert!(cfg.policy.require_approval_for_write_external);
        assert!(!cfg.policy.require_approval_for_notify);
    }

    #[test]
    fn supports_sqlite_store_kind_with_path() {
        let path = write_temp_config(&base_yaml().replace(
            "kind: \"memory\"",
            "kind: \"sqlite\"\n  sqlite_path: \"./a.db\"",
        ));
        let cfg = load_and_validate(&path).expect("sqlite config should be accepted");
        assert_eq!(cfg.store.kind, "sqlite");
        assert_eq!(cfg.store.sqlite_path.as_deref(), Some("./a.db"));
    }

    #[test]
    fn rejects_unknown_store_kind() {
        let path = write_temp_config(&base_yaml().replace("kind: \"memory\"", "kind: \"redis\""));
        let err = load_and_validate(&path).expect_err("expected unsupported store kind");
        match err {
            ConfigError::UnsupportedConfig(msg) => {
                assert!(msg.contains("config.invalid_store_kind"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_sqlite_without_path() {
        let path = write_temp_config(&base_yaml().replace("kind: \"memory\"", "kind: \"sqlite\""));
        assert!(load_and_validate(&path).is_err());
    }

    #[test]
    fn rejects_external_http_without_endpoint() {
        let path =
            write_temp_config(&base_yaml().replace("mode: \"builtin\"", "mode: \"external_http\""));
        assert!(load_and_validate(&path).is_err());
    }

    #[test]
    fn rejects_invalid_reply_policy() {
        let path = write_temp_config(
            &base_yaml().replace("reply_policy: \"mention_first\"", "reply_policy: \"always\""),
        );
        let err = load_and_validate(&path).expect_err("expected schema validation error");
        assert!(matches!(err, ConfigError::SchemaValidation(_)));
    }

    #[test]
    fn rejects_unsupported_audit_sink() {
        let path = write_temp_config(&base_yaml().replace("sink: \"jsonl\"", "sink: \"stdout\""));
        let err = load_and_validate(&path).expect_err("expected unsupported config");
        assert!(matches!(err, ConfigError::UnsupportedConfig(_)));
    }

    #[test]
    fn rejects_empty_provider_allowlist() {
        let path = write_temp_config(
            &base_yaml().replace("allowed_providers: [\"generic\"]", "allowed_providers: []"),
        );
        assert!(load_and_validate(&path).is_err());
    }
}
