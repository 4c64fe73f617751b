//! Request body encoding and response normalization.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::http::{HttpResponse, RequestBody};
use crate::protocol::{Method, RequestData, ResponsePayload};

const DEFAULT_CONTENT_TYPE: &str = "application/json";

fn content_type(headers: &BTreeMap<String, String>) -> &str {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
        .map(|(_, v)| v.as_str())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Encode `data` for the wire according to the request's Content-Type.
///
/// GET never carries a body. JSON content types send strings verbatim and
/// serialize anything else; `x-www-form-urlencoded` encodes an object's fields
/// as form pairs; other types send strings verbatim.
pub(crate) fn encode_request_body(
    method: Method,
    headers: &BTreeMap<String, String>,
    data: &RequestData,
) -> RequestBody {
    if method == Method::Get {
        return RequestBody::Empty;
    }
    let value = match data {
        RequestData::Multipart(m) => return RequestBody::Multipart(m.multipart.clone()),
        RequestData::Value(v) => v,
    };

    let ct = content_type(headers).to_ascii_lowercase();
    let text = if ct.contains("x-www-form-urlencoded") {
        match value {
            Value::Object(fields) => {
                let mut form = url::form_urlencoded::Serializer::new(String::new());
                for (k, v) in fields {
                    form.append_pair(k, &value_to_text(v));
                }
                form.finish()
            }
            other => value_to_text(other),
        }
    } else {
        value_to_text(value)
    };

    if text.is_empty() {
        RequestBody::Empty
    } else {
        RequestBody::Bytes(text.into_bytes())
    }
}

/// Flatten header pairs into a map; repeated names are joined with `", "`.
pub(crate) fn flatten_headers(pairs: &[(String, String)]) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in pairs {
        out.entry(name.to_ascii_lowercase())
            .and_modify(|v| {
                v.push_str(", ");
                v.push_str(value);
            })
            .or_insert_with(|| value.clone());
    }
    out
}

/// Body text parsed as JSON when possible, otherwise kept as a string.
pub(crate) fn parse_body(bytes: &[u8]) -> Value {
    let text = String::from_utf8_lossy(bytes);
    serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text.into_owned()))
}

pub(crate) fn normalize_response(response: HttpResponse) -> ResponsePayload {
    ResponsePayload {
        header: flatten_headers(&response.headers),
        status: response.status,
        status_text: response.status_text,
        body: parse_body(&response.body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FilePart, MultipartData};
    use serde_json::json;

    fn headers(ct: &str) -> BTreeMap<String, String> {
        BTreeMap::from([("Content-Type".to_string(), ct.to_string())])
    }

    #[test]
    fn get_never_has_a_body() {
        let body = encode_request_body(Method::Get, &BTreeMap::new(), &json!({"a": 1}).into());
        assert_eq!(body, RequestBody::Empty);
    }

    #[test]
    fn json_default_serializes_objects_and_passes_strings() {
        let body = encode_request_body(Method::Post, &BTreeMap::new(), &json!({"a": 1}).into());
        assert_eq!(body, RequestBody::Bytes(br#"{"a":1}"#.to_vec()));
        let body = encode_request_body(Method::Post, &BTreeMap::new(), &"{\"raw\":true}".into());
        assert_eq!(body, RequestBody::Bytes(br#"{"raw":true}"#.to_vec()));
    }

    #[test]
    fn empty_string_is_empty_body() {
        let body = encode_request_body(Method::Put, &BTreeMap::new(), &RequestData::default());
        assert_eq!(body, RequestBody::Empty);
    }

    #[test]
    fn form_urlencoded_object() {
        let body = encode_request_body(
            Method::Post,
            &headers("application/x-www-form-urlencoded; charset=UTF-8"),
            &json!({"q": "a b", "n": 2}).into(),
        );
        assert_eq!(body, RequestBody::Bytes(b"n=2&q=a+b".to_vec()));
    }

    #[test]
    fn plain_text_passes_through() {
        let body = encode_request_body(Method::Patch, &headers("text/plain"), &"hello".into());
        assert_eq!(body, RequestBody::Bytes(b"hello".to_vec()));
    }

    #[test]
    fn multipart_is_forwarded() {
        let part = FilePart {
            field: "upload".into(),
            file_name: "a.txt".into(),
            content_type: None,
            content: b"x".to_vec(),
        };
        let data = RequestData::Multipart(MultipartData {
            multipart: vec![part.clone()],
        });
        let body = encode_request_body(Method::Post, &BTreeMap::new(), &data);
        assert_eq!(body, RequestBody::Multipart(vec![part]));
    }

    #[test]
    fn response_body_json_or_text() {
        assert_eq!(parse_body(br#"{"ok":true}"#), json!({"ok": true}));
        assert_eq!(parse_body(b"plain words"), json!("plain words"));
        assert_eq!(parse_body(b""), json!(""));
    }

    #[test]
    fn repeated_headers_are_joined() {
        let flat = flatten_headers(&[
            ("Set-Cookie".into(), "a=1".into()),
            ("set-cookie".into(), "b=2".into()),
            ("x-one".into(), "1".into()),
        ]);
        assert_eq!(flat["set-cookie"], "a=1, b=2");
        assert_eq!(flat["x-one"], "1");
    }
}
