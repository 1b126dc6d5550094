use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Per-room admission state, keyed by `(tenant_id, room_id)` in the store.
/// Created lazily on first reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoomState {
    pub generating: bool,
    pub pending_queue_size: usize,
    pub last_send_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub cooldown_ms: u64,
    pub max_queue: usize,
    pub tenant_rate_limit_per_min: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Deny { reason_code: &'static str },
}

/// Admission control over room and tenant state. Rules run in fixed order and
/// the first failing rule wins. `event_time` comes from the event's
/// `occurred_at`; the gate never reads the wall clock.
pub fn evaluate_gate(
    room: &RoomState,
    event_time: DateTime<Utc>,
    tenant_count: usize,
    cfg: &GateConfig,
) -> GateDecision {
    if room.generating {
        return GateDecision::Deny {
            reason_code: "gate_generating_lock",
        };
    }

    if cfg.cooldown_ms > 0 {
        if let Some(last_send_at) = room.last_send_at {
            let cooldown_until = last_send_at + Duration::milliseconds(cfg.cooldown_ms as i64);
            if event_time < cooldown_until {
                return GateDecision::Deny {
                    reason_code: "gate_cooldown",
                };
            }
        }
    }

    if cfg.max_queue > 0 && room.pending_queue_size >= cfg.max_queue {
        return GateDecision::Deny {
            reason_code: "gate_backpressure",
        };
    }

    if cfg.tenant_rate_limit_per_min > 0 && tenant_count >= cfg.tenant_rate_limit_per_min {
        return GateDecision::Deny {
            reason_code: "gate_tenant_rate_limit",
        };
    }

    GateDecision::Allow
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_rfc3339;

    fn cfg() -> GateConfig {
        GateConfig {
            cooldown_ms: 3000,
            max_queue: 10,
            tenant_rate_limit_per_min: 5,
        }
    }

    fn deny(reason_code: &'static str) -> GateDecision {
        GateDecision::Deny { reason_code }
    }

    #[test]
    fn allows_idle_room() {
        let room = RoomState::default();
        let t = parse_rfc3339("2026-02-14T00:00:00Z").unwrap();
        assert_eq!(evaluate_gate(&room, t, 0, &cfg()), GateDecision::Allow);
    }

    #[test]
    fn generating_lock_wins_over_everything() {
        let room = RoomState {
            generating: true,
            pending_queue_size: 100,
            last_send_at: parse_rfc3339("2026-02-14T00:00:00Z"),
        };
        let t = parse_rfc3339("2026-02-14T00:00:01Z").unwrap();
        assert_eq!(
            evaluate_gate(&room, t, 100, &cfg()),
            deny("gate_generating_lock")
        );
    }

    #[test]
    fn cooldown_uses_event_time() {
        let room = RoomState {
            last_send_at: parse_rfc3339("2026-02-14T00:00:00Z"),
            ..RoomState::default()
        };
        let within = parse_rfc3339("2026-02-14T00:00:01Z").unwrap();
        assert_eq!(evaluate_gate(&room, within, 0, &cfg()), deny("gate_cooldown"));

        let after = parse_rfc3339("2026-02-14T00:00:03Z").unwrap();
        assert_eq!(evaluate_gate(&room, after, 0, &cfg()), GateDecision::Allow);
    }

    #[test]
    fn cooldown_disabled_when_zero() {
        let room = RoomState {
            last_send_at: parse_rfc3339("2026-02-14T00:00:00Z"),
            ..RoomState::default()
        };
        let mut c = cfg();
        c.cooldown_ms = 0;
        let within = parse_rfc3339("2026-02-14T00:00:01Z").unwrap();
        assert_eq!(evaluate_gate(&room, within, 0, &c), GateDecision::Allow);
    }

    #[test]
    fn backpressure_before_tenant_rate() {
        let room = RoomState {
            pending_queue_size: 10,
            ..RoomState::default()
        };
        let t = parse_rfc3339("2026-02-14T00:00:00Z").unwrap();
        assert_eq!(
            evaluate_gate(&room, t, 100, &cfg()),
            deny("gate_backpressure")
        );
    }

    #[test]
    fn tenant_rate_limit_applies_last() {
        let room = RoomState::default();
        let t = parse_rfc3339("2026-02-14T00:00:00Z").unwrap();
        assert_eq!(
            evaluate_gate(&room, t, 5, &cfg()),
            deny("gate_tenant_rate_limit")
        );
        assert_eq!(evaluate_gate(&room, t, 4, &cfg()), GateDecision::Allow);
    }
}
