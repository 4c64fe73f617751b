//! libcurl-backed [`HttpClient`].
//!
//! Each exchange runs on one `Easy` handle inside `spawn_blocking`. Cookies
//! persist across exchanges through the client's [`CookieJar`], so
//! credentials set by one response travel with later requests. Redirects are
//! followed and the response is buffered in memory.

use std::str;
use std::sync::Arc;
use std::time::Duration;

use super::cookies::CookieJar;
use super::parse::parse_head;
use super::{HttpClient, HttpRequest, HttpResponse, RequestBody, TransportError};
use crate::protocol::Method;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_REDIRECTIONS: u32 = 10;

/// Clones share one cookie jar.
#[derive(Debug, Clone, Default)]
pub struct CurlClient {
    cookies: Arc<CookieJar>,
}

impl CurlClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }
}

impl HttpClient for CurlClient {
    fn execute(
        &self,
        request: HttpRequest,
        timeout: Duration,
    ) -> impl std::future::Future<Output = Result<HttpResponse, TransportError>> + Send {
        let cookies = Arc::clone(&self.cookies);
        async move {
            tokio::task::spawn_blocking(move || perform(&request, timeout, &cookies))
                .await
                .map_err(|e| TransportError::other(format!("curl worker failed: {e}")))?
        }
    }
}

/// Runs one exchange in the current thread.
fn perform(
    request: &HttpRequest,
    timeout: Duration,
    cookies: &CookieJar,
) -> Result<HttpResponse, TransportError> {
    let mut header_lines: Vec<String> = Vec::new();
    let mut body: Vec<u8> = Vec::new();

    let mut easy = curl::easy::Easy::new();
    easy.url(&request.url)?;
    easy.follow_location(true)?;
    easy.max_redirections(MAX_REDIRECTIONS)?;
    easy.connect_timeout(CONNECT_TIMEOUT.min(timeout))?;
    easy.timeout(timeout)?;
    // Empty cookie file: enable the cookie engine without reading from disk.
    easy.cookie_file("")?;
    let loaded = cookies.snapshot();
    for line in &loaded {
        easy.cookie_list(line)?;
    }
    easy.accept_encoding("")?;

    let mut list = curl::easy::List::new();
    for (k, v) in &request.headers {
        list.append(&format!("{}: {}", k.trim(), v.trim()))?;
    }
    // No `Expect: 100-continue` round trip for bodies.
    list.append("Expect:")?;
    easy.http_headers(list)?;

    match &request.body {
        RequestBody::Empty => {}
        RequestBody::Bytes(bytes) => {
            easy.post_fields_copy(bytes)?;
        }
        RequestBody::Multipart(parts) => {
            let mut form = curl::easy::Form::new();
            for part in parts {
                let mut p = form.part(&part.field);
                p.buffer(&part.file_name, part.content.clone());
                if let Some(ct) = part.content_type.as_deref() {
                    p.content_type(ct);
                }
                p.add().map_err(|e| {
                    TransportError::other(format!("multipart field {}: {}", part.field, e))
                })?;
            }
            easy.httppost(form)?;
        }
    }

    match (request.method, &request.body) {
        (Method::Get, _) => easy.get(true)?,
        (Method::Post, RequestBody::Empty) => {
            easy.post(true)?;
            easy.post_field_size(0)?;
        }
        (Method::Post, _) => {}
        (method, _) => easy.custom_request(method.as_str())?,
    }

    {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            if let Ok(s) = str::from_utf8(data) {
                header_lines.push(s.trim_end().to_string());
            }
            true
        })?;
        transfer.write_function(|data| {
            body.extend_from_slice(data);
            Ok(data.len())
        })?;
        transfer.perform()?;
    }

    match easy.cookies() {
        Ok(list) => {
            let after: Vec<String> = list
                .iter()
                .filter_map(|raw| str::from_utf8(raw).ok().map(str::to_string))
                .collect();
            cookies.merge(&loaded, &after);
        }
        Err(e) => tracing::debug!(url = %request.url, "reading cookie list: {}", e),
    }

    let code = easy.response_code()?;
    let head = parse_head(&header_lines);
    tracing::trace!(url = %request.url, code, bytes = body.len(), "curl exchange finished");

    Ok(HttpResponse {
        status: u16::try_from(code).unwrap_or(0),
        status_text: head.status_text,
        headers: head.headers,
        body,
    })
}
