use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::{ErrorCallback, RequestFailure, SuccessCallback};
use crate::protocol::ResponsePayload;

/// Callbacks of one in-flight request.
pub(crate) struct Pending {
    pub(crate) on_success: Option<SuccessCallback>,
    pub(crate) on_error: Option<ErrorCallback>,
}

impl Pending {
    /// A failing success callback is reported through the error callback.
    pub(crate) fn succeed(self, res: ResponsePayload) {
        let Some(on_success) = self.on_success else {
            return;
        };
        if let Err(e) = on_success(res) {
            tracing::warn!("response handler failed: {:#}", e);
            if let Some(on_error) = self.on_error {
                on_error(RequestFailure::Handler(format!("{e:#}")));
            }
        }
    }

    pub(crate) fn fail(self, failure: RequestFailure) {
        if let Some(on_error) = self.on_error {
            on_error(failure);
        }
    }
}

/// correlation id → callbacks.
#[derive(Default)]
pub(crate) struct PendingRequests {
    map: Mutex<HashMap<String, Pending>>,
}

impl PendingRequests {
    pub(crate) fn insert(&self, request_id: String, pending: Pending) {
        self.map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(request_id, pending);
    }

    pub(crate) fn take(&self, request_id: &str) -> Option<Pending> {
        self.map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(request_id)
    }

    pub(crate) fn len(&self) -> usize {
        self.map.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
