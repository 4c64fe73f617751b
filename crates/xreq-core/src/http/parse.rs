//! Parse collected response header lines into status text and header pairs.

/// Status text and headers of the last response block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ResponseHead {
    pub status_text: String,
    pub headers: Vec<(String, String)>,
}

/// Parse header lines as delivered by curl's header callback.
///
/// With redirects followed curl reports one block per hop; every status line
/// (`HTTP/...`) starts a new block, so only the final hop survives.
pub(crate) fn parse_head(lines: &[String]) -> ResponseHead {
    let mut head = ResponseHead::default();

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with("HTTP/") {
            head.headers.clear();
            head.status_text = line.splitn(3, ' ').nth(2).unwrap_or("").trim().to_string();
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            head.headers
                .push((name.to_ascii_lowercase(), value.trim().to_string()));
        }
    }

    head
}
