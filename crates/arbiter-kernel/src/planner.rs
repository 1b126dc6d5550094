use arbiter_contracts::EventEnvelope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Ignore,
    Reply,
    Message,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Ignore => "IGNORE",
            Intent::Reply => "REPLY",
            Intent::Message => "MESSAGE",
        }
    }

    pub fn parse(s: &str) -> Option<Intent> {
        match s {
            "IGNORE" => Some(Intent::Ignore),
            "REPLY" => Some(Intent::Reply),
            "MESSAGE" => Some(Intent::Message),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub reply_policy: String,
    pub reply_probability: f64,
}

/// Deterministic intent selection. The same `event_id` always yields the same
/// intent for identical config; an explicit `reply_to` wins over any policy.
pub fn decide_intent(event: &EventEnvelope, cfg: &PlannerConfig) -> Intent {
    if event
        .content
        .reply_to
        .as_ref()
        .is_some_and(|v| !v.is_empty())
    {
        return Intent::Reply;
    }

    let mentioned = event.content.text.to_ascii_lowercase().contains("@arbiter");
    match cfg.reply_policy.as_str() {
        "all" => Intent::Message,
        "reply_only" => {
            if mentioned {
                Intent::Reply
            } else {
                Intent::Ignore
            }
        }
        "mention_first" => {
            if mentioned {
                Intent::Reply
            } else if planner_probability(&event.event_id) < cfg.reply_probability {
                Intent::Message
            } else {
                Intent::Ignore
            }
        }
        "probabilistic" => {
            if planner_probability(&event.event_id) < cfg.reply_probability {
                Intent::Message
            } else {
                Intent::Ignore
            }
        }
        _ => Intent::Ignore,
    }
}

/// Stable 64-bit FNV-1a over the event id.
pub fn planner_seed(event_id: &str) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = FNV_OFFSET;
    for byte in event_id.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Seed reduced to [0, 1) in steps of 1/10000.
pub fn planner_probability(event_id: &str) -> f64 {
    (planner_seed(event_id) % 10_000) as f64 / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_contracts::EventContent;
    use std::collections::BTreeMap;

    fn event(id: &str, text: &str, reply_to: Option<&str>) -> EventEnvelope {
        EventEnvelope {
            tenant_id: "t1".to_string(),
            event_id: id.to_string(),
            source: "slack".to_string(),
            kind: "message".to_string(),
            subject: "room-1".to_string(),
            summary: text.to_string(),
            payload_ref: "ref://1".to_string(),
            room_id: "room-1".to_string(),
            content: EventContent {
                content_type: "text".to_string(),
                text: text.to_string(),
                reply_to: reply_to.map(|v| v.to_string()),
            },
            occurred_at: "2026-02-14T00:00:00Z".to_string(),
            labels: BTreeMap::new(),
            actor: None,
            context: BTreeMap::new(),
        }
    }

    fn cfg(policy: &str, probability: f64) -> PlannerConfig {
        PlannerConfig {
            reply_policy: policy.to_string(),
            reply_probability: probability,
        }
    }

    #[test]
    fn fnv1a_matches_reference_vectors() {
        // Reference values for the 64-bit FNV-1a offset basis and "a".
        assert_eq!(planner_seed(""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(planner_seed("a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn reply_to_overrides_every_policy() {
        for policy in ["all", "reply_only", "mention_first", "probabilistic", "x"] {
            let ev = event("e1", "hello", Some("msg-1"));
            assert_eq!(decide_intent(&ev, &cfg(policy, 0.0)), Intent::Reply);
        }
    }

    #[test]
    fn empty_reply_to_does_not_count() {
        let ev = event("e1", "hello", Some(""));
        assert_eq!(decide_intent(&ev, &cfg("reply_only", 0.0)), Intent::Ignore);
    }

    #[test]
    fn policy_all_always_messages() {
        let ev = event("e1", "hello", None);
        assert_eq!(decide_intent(&ev, &cfg("all", 0.0)), Intent::Message);
    }

    #[test]
    fn reply_only_requires_mention() {
        let mentioned = event("e1", "hey @Arbiter", None);
        assert_eq!(decide_intent(&mentioned, &cfg("reply_only", 1.0)), Intent::Reply);
        let plain = event("e1", "hey", None);
        assert_eq!(decide_intent(&plain, &cfg("reply_only", 1.0)), Intent::Ignore);
    }

    #[test]
    fn mention_first_falls_back_to_probability() {
        let mentioned = event("e1", "ping @ARBITER", None);
        assert_eq!(
            decide_intent(&mentioned, &cfg("mention_first", 0.0)),
            Intent::Reply
        );

        let plain = event("e1", "ping", None);
        assert_eq!(
            decide_intent(&plain, &cfg("mention_first", 1.0)),
            Intent::Message
        );
        assert_eq!(
            decide_intent(&plain, &cfg("mention_first", 0.0)),
            Intent::Ignore
        );
    }

    #[test]
    fn probabilistic_uses_seed_threshold() {
        let ev = event("e1", "hello", None);
        let p = planner_probability("e1");
        assert_eq!(
            decide_intent(&ev, &cfg("probabilistic", p + 0.0001)),
            Intent::Message
        );
        assert_eq!(
            decide_intent(&ev, &cfg("probabilistic", p)),
            Intent::Ignore
        );
    }

    #[test]
    fn unknown_policy_ignores() {
        let ev = event("e1", "hello @arbiter", None);
        assert_eq!(decide_intent(&ev, &cfg("mystery", 1.0)), Intent::Ignore);
    }

    #[test]
    fn same_event_id_same_intent() {
        let c = cfg("probabilistic", 0.5);
        let a = decide_intent(&event("stable", "x", None), &c);
        let b = decide_intent(&event("stable", "y", None), &c);
        assert_eq!(a, b);
    }
}
