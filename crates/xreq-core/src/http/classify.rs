//! Classify curl errors into transport error kinds.

use super::{TransportError, TransportErrorKind};

/// Classify a curl error for retry decisions.
pub fn classify_curl_error(e: &curl::Error) -> TransportErrorKind {
    if e.is_operation_timedout() {
        return TransportErrorKind::Timeout;
    }
    if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
        || e.is_ssl_connect_error()
        || e.is_partial_file()
    {
        return TransportErrorKind::Network;
    }
    TransportErrorKind::Other
}

impl From<curl::Error> for TransportError {
    fn from(e: curl::Error) -> Self {
        let kind = classify_curl_error(&e);
        let err = TransportError::new(kind, e.description().to_string());
        match e.extra_description() {
            Some(extra) => err.with_trace(format!("curl error {}: {}", e.code(), extra)),
            None => err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // CURLE_COULDNT_CONNECT = 7, CURLE_OPERATION_TIMEDOUT = 28,
    // CURLE_GOT_NOTHING = 52, CURLE_URL_MALFORMAT = 3.

    #[test]
    fn timeout_is_timeout() {
        assert_eq!(
            classify_curl_error(&curl::Error::new(28)),
            TransportErrorKind::Timeout
        );
    }

    #[test]
    fn connection_failures_are_network() {
        assert_eq!(
            classify_curl_error(&curl::Error::new(7)),
            TransportErrorKind::Network
        );
        assert_eq!(
            classify_curl_error(&curl::Error::new(52)),
            TransportErrorKind::Network
        );
    }

    #[test]
    fn malformed_url_is_other() {
        let err = TransportError::from(curl::Error::new(3));
        assert_eq!(err.kind, TransportErrorKind::Other);
        assert!(!err.message.is_empty());
    }
}
