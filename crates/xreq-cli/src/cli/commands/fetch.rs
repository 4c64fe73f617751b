//! `xreq fetch` – one request through the full page → bridge → relay path.

use anyhow::{anyhow, bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use xreq_core::bridge::{Bridge, LogNotifier};
use xreq_core::client::{PageClient, PathFiles, RequestFailure, RequestSpec};
use xreq_core::config::{ConfigStore, TomlFileStorage};
use xreq_core::executor::Executor;
use xreq_core::http::CurlClient;
use xreq_core::page::PageBus;
use xreq_core::protocol::ResponsePayload;
use xreq_core::relay::RelayChannel;
use xreq_core::transport::{Connector, LocalHub, UnixConnector};

#[derive(Debug)]
pub struct FetchArgs {
    pub url: String,
    pub method: Option<String>,
    pub headers: Vec<String>,
    pub data: Option<String>,
    pub files: Vec<String>,
    pub timeout: Option<u64>,
    pub socket: Option<PathBuf>,
    pub wait: u64,
}

/// `"Name: value"` → `("Name", "value")`.
fn parse_header(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("header must look like 'Name: value': {raw}"))?;
    let name = name.trim();
    if name.is_empty() {
        bail!("header name is empty: {raw}");
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// `"field=@path"` (the `@` is optional) → `("field", path)`.
fn parse_form_file(raw: &str) -> Result<(String, PathBuf)> {
    let (field, path) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("form file must look like 'field=@path': {raw}"))?;
    let path = path.strip_prefix('@').unwrap_or(path);
    if field.is_empty() || path.is_empty() {
        bail!("form file must look like 'field=@path': {raw}");
    }
    Ok((field.to_string(), PathBuf::from(path)))
}

fn build_request(args: &FetchArgs) -> Result<(RequestSpec, PathFiles)> {
    let has_body = args.data.is_some() || !args.files.is_empty();
    let method = match &args.method {
        Some(m) => m.clone(),
        None if has_body => "POST".to_string(),
        None => "GET".to_string(),
    };

    let mut spec = RequestSpec::new(&args.url).method(method);
    for raw in &args.headers {
        let (name, value) = parse_header(raw)?;
        spec = spec.header(name, value);
    }
    if let Some(data) = &args.data {
        spec = spec.data(data.as_str());
    }
    if let Some(ms) = args.timeout {
        spec = spec.timeout_ms(ms);
    }

    // Each form field is its own file input.
    let mut files = PathFiles::new();
    for raw in &args.files {
        let (field, path) = parse_form_file(raw)?;
        files.insert(field.clone(), path);
        spec = spec.file(field.clone(), field);
    }
    Ok((spec, files))
}

async fn fetch_through<K: Connector>(
    connector: K,
    files: PathFiles,
    spec: RequestSpec,
) -> Result<ResponsePayload, RequestFailure> {
    let bus = PageBus::new();
    let bridge = Bridge::attach(connector, bus.clone(), Arc::new(LogNotifier));
    bridge.start();
    let client = PageClient::with_files(bridge.node_id(), bus, files);
    client.listen();
    client.fetch(spec).await
}

pub async fn run_fetch(storage: TomlFileStorage, args: FetchArgs) -> Result<()> {
    let (spec, files) = build_request(&args)?;
    let wait = Duration::from_secs(args.wait);

    let outcome = match &args.socket {
        Some(path) => {
            tokio::time::timeout(wait, fetch_through(UnixConnector::new(path), files, spec)).await
        }
        None => {
            let (hub, acceptor) = LocalHub::new();
            let config = Arc::new(ConfigStore::load(storage));
            let relay = RelayChannel::new(Executor::with_defaults(config, CurlClient::new()));
            tokio::spawn(async move { relay.serve_local(acceptor).await });
            tokio::time::timeout(wait, fetch_through(hub, files, spec)).await
        }
    };

    match outcome.with_context(|| format!("no result within {}s", args.wait))? {
        Ok(res) => {
            println!("{}", serde_json::to_string_pretty(&res)?);
            Ok(())
        }
        Err(RequestFailure::Failed(payload)) => {
            println!("{}", serde_json::to_string_pretty(&payload)?);
            bail!("request failed: {}", payload.message)
        }
        Err(failure) => bail!("request failed: {}", failure),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(url: &str) -> FetchArgs {
        FetchArgs {
            url: url.to_string(),
            method: None,
            headers: vec![],
            data: None,
            files: vec![],
            timeout: None,
            socket: None,
            wait: 120,
        }
    }

    #[test]
    fn header_parsing() {
        assert_eq!(
            parse_header("Content-Type: application/json").unwrap(),
            ("Content-Type".to_string(), "application/json".to_string())
        );
        assert_eq!(
            parse_header("X-Empty:").unwrap(),
            ("X-Empty".to_string(), String::new())
        );
        assert!(parse_header("no colon").is_err());
        assert!(parse_header(": value").is_err());
    }

    #[test]
    fn form_file_parsing() {
        assert_eq!(
            parse_form_file("upload=@/tmp/a.txt").unwrap(),
            ("upload".to_string(), PathBuf::from("/tmp/a.txt"))
        );
        assert_eq!(
            parse_form_file("upload=rel/a.txt").unwrap(),
            ("upload".to_string(), PathBuf::from("rel/a.txt"))
        );
        assert!(parse_form_file("upload").is_err());
        assert!(parse_form_file("=@x").is_err());
    }

    #[test]
    fn method_defaults_follow_body() {
        let (spec, _) = build_request(&args("https://example.com/")).unwrap();
        assert_eq!(spec.method.as_deref(), Some("GET"));

        let mut with_body = args("https://example.com/");
        with_body.data = Some("x=1".into());
        let (spec, _) = build_request(&with_body).unwrap();
        assert_eq!(spec.method.as_deref(), Some("POST"));

        let mut explicit = args("https://example.com/");
        explicit.method = Some("PUT".into());
        explicit.headers = vec!["Accept: */*".into()];
        explicit.files = vec!["f=@/tmp/x".into()];
        let (spec, _) = build_request(&explicit).unwrap();
        assert_eq!(spec.method.as_deref(), Some("PUT"));
        assert_eq!(spec.headers["Accept"], "*/*");
        assert_eq!(spec.files["f"], "f");
    }
}
