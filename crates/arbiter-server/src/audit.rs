//! Append-only JSONL audit log with a JCS-SHA-256 hash chain and an optional
//! immutable mirror.
//!
//! Every record's `prev_hash` equals the previous record's `record_hash`;
//! `record_hash` covers the JCS form of the record minus itself. The chain
//! head is recovered from the primary file on startup so restarts extend the
//! existing chain instead of forking it.

use arbiter_kernel::jcs_sha256_hex;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("open audit sink {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("write audit sink {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
    #[error("encode audit record: {0}")]
    Encode(String),
}

/// Stage outcomes attached to accepted-event records when
/// `audit.include_authz_decision` is set.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionTrace {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate: Option<StageDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authz: Option<AuthzDecisionTrace>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planner: Option<PlannerDecisionTrace>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageDecision {
    pub result: String,
    pub reason_code: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthzDecisionTrace {
    pub result: String,
    pub reason_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_version: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannerDecisionTrace {
    pub reply_policy: String,
    pub chosen_intent: String,
    pub seed: u64,
    pub sampled_probability: f64,
}

/// Record content supplied by the pipeline; chain fields and timestamps are
/// filled in by the writer.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub tenant_id: String,
    pub correlation_id: String,
    pub action: String,
    pub result: String,
    pub reason_code: String,
    pub plan_id: Option<String>,
    pub decision_trace: Option<DecisionTrace>,
}

impl AuditEvent {
    pub fn new(
        tenant_id: &str,
        correlation_id: &str,
        action: &str,
        result: &str,
        reason_code: &str,
        plan_id: Option<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            correlation_id: correlation_id.to_string(),
            action: action.to_string(),
            result: result.to_string(),
            reason_code: reason_code.to_string(),
            plan_id,
            decision_trace: None,
        }
    }

    pub fn with_trace(mut self, trace: DecisionTrace) -> Self {
        self.decision_trace = Some(trace);
        self
    }
}

struct Sinks {
    last_hash: String,
    primary: File,
    primary_path: String,
    mirror: Option<(File, String)>,
}

/// Process-wide audit writer. Sinks are opened once and held for the service
/// lifetime; appends are serialized by an exclusive lock so no record can
/// observe a `prev_hash` other than its predecessor's `record_hash`.
pub struct AuditWriter {
    sinks: Mutex<Sinks>,
}

impl AuditWriter {
    pub fn open(path: &str, mirror_path: Option<&str>) -> Result<Self, AuditError> {
        let last_hash = recover_last_hash(path)?;
        let primary = open_append(path)?;
        let mirror = match mirror_path {
            Some(p) => Some((open_append(p)?, p.to_string())),
            None => None,
        };
        Ok(Self {
            sinks: Mutex::new(Sinks {
                last_hash,
                primary,
                primary_path: path.to_string(),
                mirror,
            }),
        })
    }

    /// Chains and writes one record to the primary sink, then the mirror.
    /// Any sink failure is surfaced; the caller fails the request closed.
    pub fn append(&self, event: AuditEvent) -> Result<(), AuditError> {
        let mut sinks = self
            .sinks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut record = serde_json::Map::new();
        record.insert(
            "audit_id".to_string(),
            Value::String(format!("audit_{}", uuid::Uuid::new_v4().as_simple())),
        );
        record.insert("tenant_id".to_string(), Value::String(event.tenant_id));
        record.insert(
            "correlation_id".to_string(),
            Value::String(event.correlation_id),
        );
        record.insert("action".to_string(), Value::String(event.action));
        record.insert("result".to_string(), Value::String(event.result));
        record.insert("reason_code".to_string(), Value::String(event.reason_code));
        record.insert("ts".to_string(), Value::String(Utc::now().to_rfc3339()));
        if let Some(plan_id) = event.plan_id {
            record.insert("plan_id".to_string(), Value::String(plan_id));
        }
        if let Some(trace) = event.decision_trace {
            let trace = serde_json::to_value(trace)
                .map_err(|err| AuditError::Encode(err.to_string()))?;
            record.insert("decision_trace".to_string(), trace);
        }
        record.insert(
            "prev_hash".to_string(),
            Value::String(sinks.last_hash.clone()),
        );

        let record_hash = jcs_sha256_hex(&Value::Object(record.clone()))
            .map_err(|err| AuditError::Encode(err.to_string()))?;
        record.insert("record_hash".to_string(), Value::String(record_hash.clone()));

        let line = serde_json::to_string(&Value::Object(record))
            .map_err(|err| AuditError::Encode(err.to_string()))?;

        let path = sinks.primary_path.clone();
        write_line(&mut sinks.primary, &path, &line)?;
        if let Some((file, path)) = sinks.mirror.as_mut() {
            let path = path.clone();
            write_line(file, &path, &line)?;
        }

        sinks.last_hash = record_hash;
        Ok(())
    }
}

fn open_append(path: &str) -> Result<File, AuditError> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| AuditError::Open {
            path: path.to_string(),
            source,
        })
}

fn write_line(file: &mut File, path: &str, line: &str) -> Result<(), AuditError> {
    file.write_all(line.as_bytes())
        .and_then(|_| file.write_all(b"\n"))
        .map_err(|source| AuditError::Write {
            path: path.to_string(),
            source,
        })
}

/// Reads the `record_hash` of the last record in an existing primary file so
/// a restarted service extends the chain.
fn recover_last_hash(path: &str) -> Result<String, AuditError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(String::new()),
        Err(source) => {
            return Err(AuditError::Open {
                path: path.to_string(),
                source,
            })
        }
    };

    let mut last = String::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|source| AuditError::Open {
            path: path.to_string(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(Value::Object(record)) = serde_json::from_str::<Value>(&line) {
            if let Some(hash) = record.get("record_hash").and_then(|v| v.as_str()) {
                last = hash.to_string();
            }
        }
    }
    Ok(last)
}

/// Recomputes the hash chain of an audit file.
pub fn verify_audit_chain(path: &str) -> Result<String, String> {
    verify_audit_chain_with_mirror(path, None)
}

/// Recomputes the hash chain, then compares primary and mirror line by line,
/// reporting the first divergent line.
pub fn verify_audit_chain_with_mirror(
    path: &str,
    mirror_path: Option<&str>,
) -> Result<String, String> {
    let main_lines = read_jsonl(path)?;
    let mut prev_hash = String::new();
    for (idx, line) in main_lines.iter().enumerate() {
        let value: Value = serde_json::from_str(line)
            .map_err(|err| format!("invalid json at line {}: {err}", idx + 1))?;
        let record = value
            .as_object()
            .ok_or_else(|| format!("invalid record at line {}", idx + 1))?;
        let record_hash = record
            .get("record_hash")
            .and_then(|v| v.as_str())
            .ok_or_else(|| format!("record_hash missing at line {}", idx + 1))?;
        let record_prev = record
            .get("prev_hash")
            .and_then(|v| v.as_str())
            .ok_or_else(|| format!("prev_hash missing at line {}", idx + 1))?;
        if record_prev != prev_hash {
            return Err(format!(
                "hash chain broken at line {}: expected prev_hash {:?}, got {:?}",
                idx + 1,
                prev_hash,
                record_prev
            ));
        }

        let mut seed = record.clone();
        seed.remove("record_hash");
        let recalculated = jcs_sha256_hex(&Value::Object(seed))
            .map_err(|err| format!("failed to hash record at line {}: {err}", idx + 1))?;
        if recalculated != record_hash {
            return Err(format!(
                "record hash mismatch at line {}: stored {}, recalculated {}",
                idx + 1,
                record_hash,
                recalculated
            ));
        }
        prev_hash = record_hash.to_string();
    }

    if let Some(mirror) = mirror_path {
        let mirror_lines = read_jsonl(mirror)?;
        for (idx, (a, b)) in main_lines.iter().zip(mirror_lines.iter()).enumerate() {
            if a != b {
                return Err(format!("mirror diverges at line {}", idx + 1));
            }
        }
        if main_lines.len() != mirror_lines.len() {
            return Err(format!(
                "mirror diverges at line {}: {} records vs {} in mirror",
                main_lines.len().min(mirror_lines.len()) + 1,
                main_lines.len(),
                mirror_lines.len()
            ));
        }
    }

    Ok(format!("audit chain verified: {} records", main_lines.len()))
}

fn read_jsonl(path: &str) -> Result<Vec<String>, String> {
    let text =
        std::fs::read_to_string(path).map_err(|err| format!("read failed for {path}: {err}"))?;
    Ok(text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.to_string())
        .collect())
}
