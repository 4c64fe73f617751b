//! RAII guard that removes an installed header rule when dropped.

use crate::header_rules::{cors_headers, HeaderRuleManager, RuleId};

/// Removes the attempt's CORS rule when dropped, whatever the outcome.
pub(super) struct RuleGuard<'a> {
    rules: &'a dyn HeaderRuleManager,
    id: Option<RuleId>,
}

impl<'a> RuleGuard<'a> {
    /// Install the CORS rule for `origin`. An install failure is logged and the
    /// attempt proceeds without a rule.
    pub(super) fn install(rules: &'a dyn HeaderRuleManager, origin: &str) -> Self {
        let id = match rules.install(origin, &cors_headers()) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(origin, "CORS rule install failed: {:#}", e);
                None
            }
        };
        Self { rules, id }
    }
}

impl Drop for RuleGuard<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.rules.remove(id);
        }
    }
}
