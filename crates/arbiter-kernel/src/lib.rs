//! Pure decision logic: fingerprinting, stable ids, gate evaluation, planner
//! intent selection, and lifecycle transition tables. Nothing in this crate
//! performs I/O or reads the wall clock.

use chrono::{DateTime, Utc};

mod fingerprint;
mod gate;
mod ids;
mod lifecycle;
mod planner;

pub use fingerprint::{jcs_sha256_hex, sha256_hex, FingerprintError};
pub use gate::{evaluate_gate, GateConfig, GateDecision, RoomState};
pub use ids::{action_id, plan_id};
pub use lifecycle::{
    approval_is_terminal, approval_transition_allowed, job_is_terminal, job_transition_allowed,
};
pub use planner::{decide_intent, planner_probability, planner_seed, Intent, PlannerConfig};

pub fn parse_rfc3339(ts: &str) -> Option<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|v| v.with_timezone(&Utc))
}

/// Tenant-rate bucket for a timestamp. Buckets are minutes since the epoch.
pub fn minute_bucket(ts: DateTime<Utc>) -> i64 {
    ts.timestamp() / 60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339_with_offset() {
        let t = parse_rfc3339("2026-02-14T09:00:00+09:00").unwrap();
        assert_eq!(t, parse_rfc3339("2026-02-14T00:00:00Z").unwrap());
    }

    #[test]
    fn rejects_non_rfc3339() {
        assert!(parse_rfc3339("2026-02-14").is_none());
        assert!(parse_rfc3339("").is_none());
    }

    #[test]
    fn minute_bucket_floors() {
        let t = parse_rfc3339("2026-02-14T00:01:59Z").unwrap();
        assert_eq!(minute_bucket(t), t.timestamp() / 60);
        let t2 = parse_rfc3339("2026-02-14T00:01:01Z").unwrap();
        assert_eq!(minute_bucket(t), minute_bucket(t2));
    }
}
