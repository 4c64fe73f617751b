//! Per-request state machine, traced at debug level.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Validating,
    RateChecking,
    RuleInstalling,
    /// `attempt` is 0 for the first try.
    Fetching { attempt: u32 },
    Retrying { attempt: u32, delay: Duration },
    Completed { success: bool },
}

impl FetchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FetchState::Completed { .. })
    }
}

/// Tracks one request's progress; transitions out of `Completed` are ignored.
#[derive(Debug)]
pub(crate) struct StateTracker<'a> {
    request_id: &'a str,
    state: FetchState,
}

impl<'a> StateTracker<'a> {
    pub(crate) fn new(request_id: &'a str) -> Self {
        Self {
            request_id,
            state: FetchState::Validating,
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> FetchState {
        self.state
    }

    pub(crate) fn enter(&mut self, next: FetchState) {
        if self.state.is_terminal() {
            tracing::warn!(request_id = self.request_id, ?next, "transition after completion ignored");
            return;
        }
        tracing::debug!(request_id = self.request_id, from = ?self.state, to = ?next, "fetch state");
        self.state = next;
    }
}
