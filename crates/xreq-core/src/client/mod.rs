//! Page-side request API.
//!
//! [`PageClient::submit`] validates a [`RequestSpec`], builds a
//! [`RequestEnvelope`] under a fresh correlation id, runs the request
//! interceptors, registers the callbacks and posts the envelope on the page
//! surface. [`PageClient::listen`] routes results back to those callbacks.

mod files;
mod interceptor;
mod pending;

pub use files::{FileSource, MemoryFiles, NoFiles, PathFiles, SelectedFile};
pub use interceptor::{Interceptor, InterceptorChain};

use anyhow::Result;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::page::{PageBus, PageMessage};
use crate::protocol::{
    ErrorPayload, FilePart, Method, MultipartData, PageRequest, PageResult, RequestData,
    RequestEnvelope, ResponsePayload, ResultPayload, CONTENT_SOURCE, DEFAULT_CLIENT_TIMEOUT_MS,
    FETCH_CALLBACK,
};
use pending::{Pending, PendingRequests};

/// Called with the (intercepted) response. Returning an error reroutes the
/// request to its error callback.
pub type SuccessCallback = Box<dyn FnOnce(ResponsePayload) -> Result<()> + Send>;
pub type ErrorCallback = Box<dyn FnOnce(RequestFailure) + Send>;

/// Request rejected before anything was posted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("url is required")]
    MissingUrl,
    #[error("unsupported HTTP method: {0}")]
    UnsupportedMethod(String),
    #[error("invalid url (http or https only): {0}")]
    InvalidUrl(String),
    #[error("file input not found or empty: {input_id} (field {field})")]
    MissingFile { field: String, input_id: String },
    #[error("reading file input {input_id}: {message}")]
    FileRead { input_id: String, message: String },
}

/// What an error callback receives.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestFailure {
    /// Rejected locally; nothing was sent.
    Rejected(ClientError),
    /// The relay answered with an error payload.
    Failed(ErrorPayload),
    /// The success callback itself failed.
    Handler(String),
    /// Cancelled before a result arrived.
    Abandoned,
}

impl fmt::Display for RequestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestFailure::Rejected(e) => write!(f, "{e}"),
            RequestFailure::Failed(p) => write!(f, "{}: {}", p.name, p.message),
            RequestFailure::Handler(msg) => write!(f, "response handler failed: {msg}"),
            RequestFailure::Abandoned => f.write_str("request abandoned before completion"),
        }
    }
}

impl std::error::Error for RequestFailure {}

/// What a caller asks for. A bare URL converts into a GET spec.
#[derive(Default)]
pub struct RequestSpec {
    pub url: Option<String>,
    pub method: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub data: RequestData,
    /// form field → file-input id
    pub files: BTreeMap<String, String>,
    pub timeout_ms: Option<u64>,
    pub task_id: Option<String>,
    pub case_id: Option<String>,
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
}

impl RequestSpec {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn data(mut self, data: impl Into<RequestData>) -> Self {
        self.data = data.into();
        self
    }

    pub fn file(mut self, field: impl Into<String>, input_id: impl Into<String>) -> Self {
        self.files.insert(field.into(), input_id.into());
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    pub fn task_id(mut self, id: impl Into<String>) -> Self {
        self.task_id = Some(id.into());
        self
    }

    pub fn case_id(mut self, id: impl Into<String>) -> Self {
        self.case_id = Some(id.into());
        self
    }

    pub fn on_success(
        mut self,
        f: impl FnOnce(ResponsePayload) -> Result<()> + Send + 'static,
    ) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnOnce(RequestFailure) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }
}

impl From<&str> for RequestSpec {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

impl From<String> for RequestSpec {
    fn from(url: String) -> Self {
        Self::new(url)
    }
}

struct ClientInner {
    node_id: String,
    bus: PageBus,
    files: Box<dyn FileSource>,
    pending: PendingRequests,
    request_interceptors: Mutex<InterceptorChain<RequestEnvelope>>,
    response_interceptors: Mutex<InterceptorChain<ResponsePayload>>,
}

/// Request API for one document. Clones share pending requests and interceptors.
#[derive(Clone)]
pub struct PageClient {
    inner: Arc<ClientInner>,
}

impl PageClient {
    /// Client for the document marked `node_id`, with no file inputs.
    pub fn new(node_id: impl Into<String>, bus: PageBus) -> Self {
        Self::with_files(node_id, bus, NoFiles)
    }

    pub fn with_files(
        node_id: impl Into<String>,
        bus: PageBus,
        files: impl FileSource + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                node_id: node_id.into(),
                bus,
                files: Box::new(files),
                pending: PendingRequests::default(),
                request_interceptors: Mutex::default(),
                response_interceptors: Mutex::default(),
            }),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    /// Start routing results from the page surface to callbacks.
    pub fn listen(&self) -> JoinHandle<()> {
        let mut sub = self.inner.bus.subscribe();
        let client = self.clone();
        tokio::spawn(async move {
            while let Some(msg) = sub.recv().await {
                if let PageMessage::Result(result) = msg {
                    client.handle_result(result);
                }
            }
        })
    }

    /// Validate, register and post one request; returns its correlation id.
    ///
    /// On a validation failure the error callback runs first, then the error
    /// is returned.
    pub fn submit(&self, spec: impl Into<RequestSpec>) -> Result<String, ClientError> {
        let mut spec = spec.into();
        let on_success = spec.on_success.take();
        let on_error = spec.on_error.take();

        let envelope = match self.build_envelope(spec) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::debug!("request rejected: {}", err);
                if let Some(on_error) = on_error {
                    on_error(RequestFailure::Rejected(err.clone()));
                }
                return Err(err);
            }
        };

        let request_id = envelope.request_id.clone();
        // Stages may add interceptors to this client; run them unlocked.
        let chain = self
            .inner
            .request_interceptors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let mut envelope = chain.apply(envelope);
        envelope.request_id = request_id.clone();

        self.inner.pending.insert(
            request_id.clone(),
            Pending {
                on_success,
                on_error,
            },
        );
        tracing::debug!(%request_id, url = %envelope.url, method = %envelope.method, "posting request");
        self.inner
            .bus
            .post(PageMessage::Request(PageRequest::new(&self.inner.node_id, envelope)));
        Ok(request_id)
    }

    /// Submit and wait for the outcome.
    pub async fn fetch(&self, spec: impl Into<RequestSpec>) -> Result<ResponsePayload, RequestFailure> {
        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let on_err_tx = Arc::clone(&tx);
        let spec = spec
            .into()
            .on_success(move |res| {
                if let Some(tx) = tx.lock().unwrap_or_else(PoisonError::into_inner).take() {
                    let _ = tx.send(Ok(res));
                }
                Ok(())
            })
            .on_error(move |failure| {
                if let Some(tx) = on_err_tx.lock().unwrap_or_else(PoisonError::into_inner).take() {
                    let _ = tx.send(Err(failure));
                }
            });
        self.submit(spec).map_err(RequestFailure::Rejected)?;
        rx.await.unwrap_or(Err(RequestFailure::Abandoned))
    }

    /// Forget a pending request without calling back. The relay is not told;
    /// its eventual result is discarded.
    pub fn cancel(&self, request_id: &str) -> bool {
        let removed = self.inner.pending.take(request_id).is_some();
        if removed {
            tracing::debug!(%request_id, "request cancelled");
        }
        removed
    }

    pub fn add_request_interceptor(
        &self,
        f: impl Fn(RequestEnvelope) -> Result<RequestEnvelope> + Send + Sync + 'static,
    ) -> bool {
        self.inner
            .request_interceptors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add(f)
    }

    pub fn add_response_interceptor(
        &self,
        f: impl Fn(ResponsePayload) -> Result<ResponsePayload> + Send + Sync + 'static,
    ) -> bool {
        self.inner
            .response_interceptors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add(f)
    }

    /// Requests still waiting for a result.
    pub fn pending(&self) -> usize {
        self.inner.pending.len()
    }

    /// Deliver one result. Results for other documents, unknown or cancelled
    /// ids are ignored.
    pub fn handle_result(&self, result: PageResult) {
        if result.source != CONTENT_SOURCE
            || result.kind != FETCH_CALLBACK
            || result.node_id != self.inner.node_id
        {
            return;
        }
        let Some(pending) = self.inner.pending.take(&result.request_id) else {
            tracing::debug!(request_id = %result.request_id, "no pending request; result dropped");
            return;
        };
        match (result.success, result.res) {
            (true, ResultPayload::Response(res)) => {
                let chain = self
                    .inner
                    .response_interceptors
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                let res = chain.apply(res);
                pending.succeed(res);
            }
            (_, ResultPayload::Error(err)) => pending.fail(RequestFailure::Failed(err)),
            (false, ResultPayload::Response(res)) => pending.fail(RequestFailure::Failed(
                ErrorPayload::other("Error", format!("request failed ({})", res.status)),
            )),
        }
    }

    fn build_envelope(&self, spec: RequestSpec) -> Result<RequestEnvelope, ClientError> {
        let url = spec
            .url
            .filter(|u| !u.trim().is_empty())
            .ok_or(ClientError::MissingUrl)?;

        let method = match spec.method.as_deref() {
            None | Some("") => Method::Get,
            Some(m) => m
                .parse::<Method>()
                .map_err(|_| ClientError::UnsupportedMethod(m.to_string()))?,
        };

        match url::Url::parse(&url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            _ => return Err(ClientError::InvalidUrl(url)),
        }

        let data = if spec.files.is_empty() {
            spec.data
        } else {
            RequestData::Multipart(MultipartData {
                multipart: self.read_files(&spec.files)?,
            })
        };

        Ok(RequestEnvelope {
            case_id: spec.case_id,
            request_id: uuid::Uuid::new_v4().to_string(),
            url,
            method: method.as_str().to_string(),
            headers: spec.headers,
            data,
            task_id: Some(spec.task_id.unwrap_or_default()),
            timeout: spec
                .timeout_ms
                .filter(|&t| t > 0)
                .unwrap_or(DEFAULT_CLIENT_TIMEOUT_MS),
        })
    }

    /// First selected file of each referenced input.
    fn read_files(&self, files: &BTreeMap<String, String>) -> Result<Vec<FilePart>, ClientError> {
        files
            .iter()
            .map(|(field, input_id)| {
                let selected = self
                    .inner
                    .files
                    .selected(input_id)
                    .map_err(|e| ClientError::FileRead {
                        input_id: input_id.clone(),
                        message: format!("{e:#}"),
                    })?;
                let file = selected
                    .and_then(|files| files.into_iter().next())
                    .ok_or_else(|| ClientError::MissingFile {
                        field: field.clone(),
                        input_id: input_id.clone(),
                    })?;
                Ok(FilePart {
                    field: field.clone(),
                    file_name: file.name,
                    content_type: file.content_type,
                    content: file.content,
                })
            })
            .collect()
    }
}
