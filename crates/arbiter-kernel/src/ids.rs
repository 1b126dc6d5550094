use arbiter_contracts::ActionType;
use sha2::{Digest, Sha256};

/// `plan_` + first 16 hex chars of `sha256(tenant_id ":" event_id)`.
pub fn plan_id(tenant_id: &str, event_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tenant_id.as_bytes());
    hasher.update(b":");
    hasher.update(event_id.as_bytes());
    format!("plan_{}", hex_prefix(&hasher.finalize()))
}

/// `act_` + first 16 hex chars of `sha256(plan_id ":" type ":" index)`.
pub fn action_id(plan_id: &str, action_type: ActionType, index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plan_id.as_bytes());
    hasher.update(b":");
    hasher.update(action_type.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(index.to_string().as_bytes());
    format!("act_{}", hex_prefix(&hasher.finalize()))
}

fn hex_prefix(digest: &[u8]) -> String {
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_id_is_stable_and_shaped() {
        let a = plan_id("t1", "e1");
        let b = plan_id("t1", "e1");
        assert_eq!(a, b);
        assert!(a.starts_with("plan_"));
        assert_eq!(a.len(), "plan_".len() + 16);
        assert_ne!(a, plan_id("t1", "e2"));
        assert_ne!(a, plan_id("t2", "e1"));
    }

    #[test]
    fn action_id_varies_by_type_and_index() {
        let plan = plan_id("t1", "e1");
        let a = action_id(&plan, ActionType::RequestGeneration, 0);
        assert!(a.starts_with("act_"));
        assert_eq!(a.len(), "act_".len() + 16);
        assert_ne!(a, action_id(&plan, ActionType::DoNothing, 0));
        assert_ne!(a, action_id(&plan, ActionType::RequestGeneration, 1));
    }
}
