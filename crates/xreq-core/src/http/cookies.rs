//! Cookie store shared by every curl handle of one [`CurlClient`](super::CurlClient).
//!
//! Cookies are kept as libcurl's Netscape-format lines, keyed by
//! (domain, path, name). Each exchange loads a snapshot into its handle and
//! merges the handle's cookie list back afterwards.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

type CookieKey = (String, String, String);

#[derive(Debug, Default)]
pub struct CookieJar {
    cookies: Mutex<BTreeMap<CookieKey, String>>,
}

/// `domain \t tailmatch \t path \t secure \t expires \t name \t value`
fn key_of(line: &str) -> Option<CookieKey> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 7 {
        return None;
    }
    let domain = fields[0].trim_start_matches("#HttpOnly_");
    Some((
        domain.to_ascii_lowercase(),
        fields[2].to_string(),
        fields[5].to_string(),
    ))
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines to feed into a fresh handle.
    pub fn snapshot(&self) -> Vec<String> {
        let cookies = self.cookies.lock().unwrap_or_else(PoisonError::into_inner);
        cookies.values().cloned().collect()
    }

    /// Fold a handle's cookie list back in. `loaded` is what the handle was
    /// seeded with; those cookies missing from `after` were expired or
    /// deleted by the server during the exchange and are dropped, unless a
    /// concurrent exchange replaced them in the meantime.
    pub fn merge(&self, loaded: &[String], after: &[String]) {
        let mut cookies = self.cookies.lock().unwrap_or_else(PoisonError::into_inner);
        let mut seen = Vec::with_capacity(after.len());
        for line in after {
            if let Some(key) = key_of(line) {
                seen.push(key.clone());
                cookies.insert(key, line.clone());
            }
        }
        for line in loaded {
            let Some(key) = key_of(line) else { continue };
            if seen.contains(&key) {
                continue;
            }
            if cookies.get(&key) == Some(line) {
                cookies.remove(&key);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.cookies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(domain: &str, name: &str, value: &str) -> String {
        format!("{domain}\tFALSE\t/\tFALSE\t0\t{name}\t{value}")
    }

    #[test]
    fn merge_adds_and_updates() {
        let jar = CookieJar::new();
        jar.merge(&[], &[line("a.example", "sid", "1")]);
        assert_eq!(jar.snapshot(), vec![line("a.example", "sid", "1")]);

        let loaded = jar.snapshot();
        jar.merge(&loaded, &[line("a.example", "sid", "2"), line("b.example", "x", "y")]);
        assert_eq!(jar.len(), 2);
        assert!(jar.snapshot().contains(&line("a.example", "sid", "2")));
    }

    #[test]
    fn cookie_gone_after_exchange_is_dropped() {
        let jar = CookieJar::new();
        jar.merge(&[], &[line("a.example", "sid", "1"), line("a.example", "keep", "k")]);
        let loaded = jar.snapshot();
        jar.merge(&loaded, &[line("a.example", "keep", "k")]);
        assert_eq!(jar.snapshot(), vec![line("a.example", "keep", "k")]);
    }

    #[test]
    fn concurrent_replacement_survives_stale_removal() {
        let jar = CookieJar::new();
        jar.merge(&[], &[line("a.example", "sid", "1")]);
        let stale = jar.snapshot();
        // Another exchange rotated the cookie while this one ran.
        jar.merge(&stale, &[line("a.example", "sid", "2")]);
        jar.merge(&stale, &[]);
        assert_eq!(jar.snapshot(), vec![line("a.example", "sid", "2")]);
    }

    #[test]
    fn http_only_prefix_shares_the_key() {
        let jar = CookieJar::new();
        jar.merge(&[], &[line("a.example", "sid", "1")]);
        let loaded = jar.snapshot();
        jar.merge(&loaded, &[line("#HttpOnly_a.example", "sid", "2")]);
        assert_eq!(jar.len(), 1);
    }

    #[test]
    fn malformed_lines_are_ignored() {
        let jar = CookieJar::new();
        jar.merge(&[], &["not a cookie".to_string()]);
        assert!(jar.is_empty());
    }
}
