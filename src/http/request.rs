//! Request-line and header parsing (`spec.md` §4.2).
//!
//! Ported from `kjpgit-mudpie/src/webserver/parse.rs` almost line for line:
//! split on CRLF, split the request line on the first two spaces, split
//! each header line on the first `:`, canonicalize the header name, and
//! percent-decode the path.

use std::collections::HashMap;
use std::sync::Arc;

use crate::byteutils;
use crate::environ::{canonical_header_key, BaseEnviron, Environment, SharedStream};
use crate::error::ProtocolError;

/// Everything about the connection that isn't carried in the request bytes
/// themselves.
pub struct RequestContext {
    pub server_name: String,
    pub server_port: u16,
    pub remote_addr: String,
    pub base_environ: Arc<BaseEnviron>,
    pub real_ip_header: Option<String>,
}

/// Parse a header block — request line + headers, as returned by
/// `BufferedStream::read_until(b"\r\n\r\n")`, including the trailing
/// terminator — into an [`Environment`]. `input` becomes the
/// environment's `wsgi.input`. Returns the verbatim request-line bytes
/// (`lines[0]`, undecoded) alongside the environment, for the access log
/// (`spec.md` §4.4: "request line verbatim") — the same `reqline` value
/// `horned.py`'s `parse_request` returns next to its `env`.
pub fn parse_request(
    header_block: &[u8],
    ctx: RequestContext,
    input: SharedStream,
) -> Result<(Vec<u8>, Environment), ProtocolError> {
    let lines = byteutils::split_on_crlf(header_block);
    if lines.is_empty() {
        return Err(ProtocolError::BadRequestLine);
    }

    let request_line = lines[0];
    let parts = byteutils::split_on(request_line, b' ', 2);
    if parts.len() != 3 {
        return Err(ProtocolError::BadRequestLine);
    }

    // `spec.md` §8 invariant 1: method case is preserved, not normalized.
    let method = String::from_utf8_lossy(parts[0]).to_string();
    let raw_path = parts[1];
    let protocol = String::from_utf8_lossy(parts[2]).to_string();

    // `spec.md` §4.2: split the request target on `?` into path and query
    // string; no further restriction on the target's shape (the request
    // line already guarantees it has no embedded space), and no rejection
    // of an empty target — `horned.py`'s `path.partition("?")` happily
    // accepts `path == ""` and produces `PATH_INFO=""`.
    let target_parts = byteutils::split_on(raw_path, b'?', 1);
    let (path, query_string) = if target_parts.len() > 1 {
        (target_parts[0].to_vec(), target_parts[1].to_vec())
    } else {
        (target_parts[0].to_vec(), Vec::new())
    };

    // Kept as raw bytes, not `String`: `spec.md` §8 invariant 2 requires
    // percent-decoding to round-trip arbitrary byte strings, and
    // `horned.py`'s Python 2 `str` never validates UTF-8 either.
    let path_info = byteutils::percent_decode(&path);

    let mut headers = HashMap::new();
    for line in lines.iter().skip(1) {
        if line.is_empty() {
            continue;
        }
        // A line with no `:` becomes a header name with an empty value,
        // per `spec.md` §4.2 — deliberately more lenient than the
        // teacher's parser, which rejected it outright.
        let header_parts = byteutils::split_on(line, b':', 1);
        let (name, value) = if header_parts.len() == 2 {
            (header_parts[0], byteutils::strip(header_parts[1]))
        } else {
            (header_parts[0], &b""[..])
        };
        let key = canonical_header_key(name);
        let value = String::from_utf8_lossy(value).into_owned();
        headers.insert(key, value);
    }

    let mut remote_addr = ctx.remote_addr;
    if let Some(header_key) = &ctx.real_ip_header {
        if let Some(value) = headers.get(header_key) {
            remote_addr = value.clone();
        }
    }

    let env = Environment {
        request_method: method,
        server_protocol: protocol,
        server_name: ctx.server_name,
        server_port: ctx.server_port,
        script_name: String::new(),
        path_info,
        query_string,
        remote_addr,
        wsgi_version: (1, 0),
        wsgi_url_scheme: "http",
        wsgi_multithread: false,
        wsgi_multiprocess: true,
        wsgi_run_once: false,
        wsgi_errors: std::io::stderr(),
        headers,
        base_environ: ctx.base_environ,
        input,
    };
    Ok((request_line.to_vec(), env))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RequestContext {
        RequestContext {
            server_name: "localhost".to_string(),
            server_port: 8080,
            remote_addr: "127.0.0.1".to_string(),
            base_environ: Arc::new(BaseEnviron::capture()),
            real_ip_header: None,
        }
    }

    fn dummy_input() -> SharedStream {
        let (a, _b) = std::os::unix::net::UnixStream::pair().unwrap();
        std::rc::Rc::new(std::cell::RefCell::new(crate::stream::BufferedStream::new(
            crate::stream::Connection::Unix(a),
        )))
    }

    #[test]
    fn parses_path_and_query_string() {
        let block = b"GET /foo%20bar?a=1 HTTP/1.0\r\nFoo: Bar\r\n";
        let (request_line, env) = parse_request(block, ctx(), dummy_input()).unwrap();
        assert_eq!(request_line, b"GET /foo%20bar?a=1 HTTP/1.0");
        assert_eq!(env.request_method, "GET");
        assert_eq!(env.path_info, b"/foo bar");
        assert_eq!(env.query_string, b"a=1");
        assert_eq!(env.server_protocol, "HTTP/1.0");
        assert_eq!(env.header("Foo"), Some("Bar"));
    }

    #[test]
    fn percent_decoded_path_round_trips_arbitrary_bytes() {
        // `spec.md` §8 invariant 2: percent-decoding must round-trip
        // arbitrary byte strings, including bytes that aren't valid UTF-8.
        let block = b"GET /%ff%fe HTTP/1.0\r\n";
        let (_, env) = parse_request(block, ctx(), dummy_input()).unwrap();
        assert_eq!(env.path_info, vec![b'/', 0xff, 0xfe]);
    }

    #[test]
    fn options_star_is_passed_through() {
        let block = b"OPTIONS * HTTP/1.1\r\n";
        let (_, env) = parse_request(block, ctx(), dummy_input()).unwrap();
        assert_eq!(env.path_info, b"*");
        assert_eq!(env.query_string, Vec::<u8>::new());
    }

    #[test]
    fn request_target_need_not_be_absolute() {
        // `spec.md` §4.2 places no constraint on the request target's
        // shape beyond "the target may not itself contain spaces"; a
        // relative target is parsed, not rejected.
        let block = b"GET foo HTTP/1.0\r\n";
        let (_, env) = parse_request(block, ctx(), dummy_input()).unwrap();
        assert_eq!(env.path_info, b"foo");
    }

    #[test]
    fn empty_request_target_is_not_rejected() {
        // Neither `spec.md` §4.2 nor `horned.py`'s
        // `method, path, protocol = reqline.split(" ", 2)` reject an empty
        // target (e.g. two consecutive spaces); `path.partition("?")`
        // happily yields `PATH_INFO=""`.
        let block = b"GET  HTTP/1.0\r\n";
        let (_, env) = parse_request(block, ctx(), dummy_input()).unwrap();
        assert_eq!(env.path_info, Vec::<u8>::new());
    }

    #[test]
    fn rejects_malformed_request_line() {
        let block = b"GET /\r\n";
        let err = parse_request(block, ctx(), dummy_input()).unwrap_err();
        assert!(matches!(err, ProtocolError::BadRequestLine));
    }

    #[test]
    fn real_ip_header_overrides_remote_addr() {
        let mut c = ctx();
        c.real_ip_header = Some("HTTP_X_FORWARDED_FOR".to_string());
        let block = b"GET / HTTP/1.0\r\nX-Forwarded-For: 9.9.9.9\r\n";
        let (_, env) = parse_request(block, c, dummy_input()).unwrap();
        assert_eq!(env.remote_addr, "9.9.9.9");
    }
}
