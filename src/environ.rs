//! The per-request environment (`spec.md` §3).
//!
//! Resolved as a fixed struct with an overflow map for `HTTP_*` header keys
//! (SPEC_FULL.md §3), rather than a single dynamically-typed map — the
//! known WSGI-ish fields get real types, and only the genuinely open-ended
//! part (request headers) gets a `HashMap`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::rc::Rc;
use std::sync::Arc;

use crate::stream::BufferedStream;

/// The connection's buffered stream, shared between the request reader and
/// the response driver the way `horned.py`'s single `IOStream` instance is
/// referenced by both `env["wsgi.input"]` and `send_response`.
pub type SharedStream = Rc<RefCell<BufferedStream>>;

/// Snapshot of the worker process's environment variables, taken once at
/// worker startup and shared (via `Arc`) by every request the worker
/// serves, matching `horned.py`'s `self.baseenv = os.environ.copy()`.
#[derive(Debug, Clone)]
pub struct BaseEnviron {
    vars: HashMap<String, String>,
}

impl BaseEnviron {
    /// Snapshot the current process environment.
    pub fn capture() -> Self {
        BaseEnviron {
            vars: std::env::vars().collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Canonicalize a raw header name into its `HTTP_<NAME>` environment key:
/// uppercase, with `-` replaced by `_`, per `spec.md` §4.2.
pub fn canonical_header_key(raw_name: &[u8]) -> String {
    let mut key = String::with_capacity(raw_name.len() + 5);
    key.push_str("HTTP_");
    for &b in raw_name {
        let c = if b == b'-' { b'_' } else { b.to_ascii_uppercase() };
        key.push(c as char);
    }
    key
}

/// The request environment handed to an [`crate::app::Application`].
///
/// Field names follow the WSGI-derived names `spec.md` §3 specifies
/// verbatim (`REQUEST_METHOD`, `SERVER_PROTOCOL`, ...) so that the mapping
/// from wire bytes to struct field is a direct, unsurprising lookup.
pub struct Environment {
    pub request_method: String,
    pub server_protocol: String,
    pub server_name: String,
    pub server_port: u16,
    pub script_name: String,
    /// The percent-decoded request path, as raw bytes rather than `String`:
    /// `spec.md` §8 invariant 2 requires percent-decoding to round-trip
    /// *arbitrary* byte strings, which a `String` cannot hold once a decoded
    /// byte isn't valid UTF-8 (`horned.py`'s Python 2 `str` is bytes, with
    /// no UTF-8 validation at all).
    pub path_info: Vec<u8>,
    /// The raw query string, verbatim and undecoded (`spec.md` §4.2) — also
    /// bytes, for the same round-trip reason as `path_info`.
    pub query_string: Vec<u8>,
    pub remote_addr: String,

    pub wsgi_version: (u32, u32),
    pub wsgi_url_scheme: &'static str,
    pub wsgi_multithread: bool,
    pub wsgi_multiprocess: bool,
    pub wsgi_run_once: bool,
    /// `wsgi.errors` (`spec.md` §6.5): a sink for application diagnostics,
    /// bound to the process's standard error.
    pub wsgi_errors: io::Stderr,

    /// Request headers, keyed by their canonical `HTTP_<NAME>` form.
    pub headers: HashMap<String, String>,

    /// The worker's captured process environment, shared across requests.
    pub base_environ: Arc<BaseEnviron>,

    /// The connection, handed to the application as `wsgi.input`. Shared
    /// with the response driver, which writes the reply over the same
    /// stream once the application returns.
    pub input: SharedStream,
}

impl Environment {
    /// Look up a request header by its raw (non-canonicalized) name, e.g.
    /// `"Content-Type"`.
    pub fn header(&self, raw_name: &str) -> Option<&str> {
        self.headers
            .get(&canonical_header_key(raw_name.as_bytes()))
            .map(String::as_str)
    }

    /// A value from the worker's captured process environment.
    pub fn process_var(&self, key: &str) -> Option<&str> {
        self.base_environ.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_header_names() {
        assert_eq!(canonical_header_key(b"Content-Type"), "HTTP_CONTENT_TYPE");
        assert_eq!(canonical_header_key(b"x-forwarded-for"), "HTTP_X_FORWARDED_FOR");
        assert_eq!(canonical_header_key(b"A B C"), "HTTP_A B C");
    }

    #[test]
    fn base_environ_captures_process_vars() {
        std::env::set_var("PREFORKD_TEST_VAR", "1");
        let base = BaseEnviron::capture();
        assert_eq!(base.get("PREFORKD_TEST_VAR"), Some("1"));
        std::env::remove_var("PREFORKD_TEST_VAR");
    }
}
