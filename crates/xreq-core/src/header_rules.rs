//! Scoped response-header override rules.
//!
//! A rule is installed for one origin before a fetch attempt and removed when
//! the attempt settles. While a rule is active, every response received from
//! its origin has the rule's headers set (replacing any existing values).

use anyhow::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Opaque handle returned by [`HeaderRuleManager::install`].
pub type RuleId = u64;

/// Wildcard-permissive CORS headers set by the executor's rule.
pub const CORS_HEADERS: [(&str, &str); 4] = [
    ("Access-Control-Allow-Origin", "*"),
    (
        "Access-Control-Allow-Methods",
        "GET, POST, PUT, DELETE, PATCH, OPTIONS",
    ),
    ("Access-Control-Allow-Headers", "*"),
    ("Access-Control-Allow-Credentials", "true"),
];

/// [`CORS_HEADERS`] as owned pairs.
pub fn cors_headers() -> Vec<(String, String)> {
    CORS_HEADERS
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderRule {
    pub id: RuleId,
    /// Serialized origin (`scheme://host[:port]`) the rule applies to.
    pub origin: String,
    pub headers: Vec<(String, String)>,
}

/// The network-stack hook the executor drives.
pub trait HeaderRuleManager: Send + Sync {
    fn install(&self, origin: &str, headers: &[(String, String)]) -> Result<RuleId>;

    /// Idempotent; unknown or already-removed ids are ignored.
    fn remove(&self, id: RuleId);

    /// Rewrite `headers` of a response received from `origin` with every
    /// active rule for that origin.
    fn apply(&self, origin: &str, headers: &mut Vec<(String, String)>);
}

/// In-process rule table.
#[derive(Debug, Default)]
pub struct HeaderRules {
    next_id: AtomicU64,
    rules: Mutex<HashMap<RuleId, HeaderRule>>,
}

impl HeaderRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rules currently installed.
    pub fn active(&self) -> usize {
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl HeaderRuleManager for HeaderRules {
    fn install(&self, origin: &str, headers: &[(String, String)]) -> Result<RuleId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let rule = HeaderRule {
            id,
            origin: origin.to_string(),
            headers: headers.to_vec(),
        };
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, rule);
        tracing::trace!(id, origin, "header rule installed");
        Ok(id)
    }

    fn remove(&self, id: RuleId) {
        let removed = self
            .rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        if removed.is_some() {
            tracing::trace!(id, "header rule removed");
        }
    }

    fn apply(&self, origin: &str, headers: &mut Vec<(String, String)>) {
        let rules = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
        for rule in rules.values().filter(|r| r.origin == origin) {
            for (name, value) in &rule.headers {
                headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
                headers.push((name.to_ascii_lowercase(), value.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGIN: &str = "https://api.example.com";

    #[test]
    fn remove_twice_is_a_no_op() {
        let rules = HeaderRules::new();
        let id = rules.install(ORIGIN, &cors_headers()).unwrap();
        assert_eq!(rules.active(), 1);
        rules.remove(id);
        assert_eq!(rules.active(), 0);
        rules.remove(id);
        assert_eq!(rules.active(), 0);
    }

    #[test]
    fn ids_are_distinct() {
        let rules = HeaderRules::new();
        let a = rules.install(ORIGIN, &cors_headers()).unwrap();
        let b = rules.install(ORIGIN, &cors_headers()).unwrap();
        assert_ne!(a, b);
        rules.remove(a);
        assert_eq!(rules.active(), 1);
    }

    #[test]
    fn apply_sets_headers_for_matching_origin_only() {
        let rules = HeaderRules::new();
        rules.install(ORIGIN, &cors_headers()).unwrap();

        let mut headers = vec![
            ("content-type".to_string(), "application/json".to_string()),
            (
                "access-control-allow-origin".to_string(),
                "https://only.me".to_string(),
            ),
        ];
        rules.apply(ORIGIN, &mut headers);
        let origin_values: Vec<_> = headers
            .iter()
            .filter(|(n, _)| n == "access-control-allow-origin")
            .collect();
        assert_eq!(origin_values.len(), 1);
        assert_eq!(origin_values[0].1, "*");
        assert!(headers
            .iter()
            .any(|(n, v)| n == "access-control-allow-credentials" && v == "true"));

        let mut other = vec![("content-type".to_string(), "text/plain".to_string())];
        rules.apply("https://elsewhere.example.com", &mut other);
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn removed_rule_no_longer_applies() {
        let rules = HeaderRules::new();
        let id = rules.install(ORIGIN, &cors_headers()).unwrap();
        rules.remove(id);
        let mut headers = Vec::new();
        rules.apply(ORIGIN, &mut headers);
        assert!(headers.is_empty());
    }
}
