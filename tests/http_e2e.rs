//! End-to-end scenarios driving the HTTP codec and buffered stream together,
//! without the manager/worker process machinery (`spec.md` §8 S1-S5).

use std::cell::RefCell;
use std::io::Read;
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::sync::Arc;

use preforkd::environ::BaseEnviron;
use preforkd::http::request::{parse_request, RequestContext};
use preforkd::http::response::{drive_response, StartResponse};
use preforkd::stream::{BufferedStream, Connection};

fn send_and_parse(
    request_bytes: &[u8],
    ctx: RequestContext,
) -> Result<(preforkd::environ::Environment, UnixStream), preforkd::error::ProtocolError> {
    let (server_side, client_side) = UnixStream::pair().unwrap();
    client_side.set_nonblocking(false).unwrap();

    // Write the full request up front; the server side reads it back
    // through `BufferedStream::read_until`.
    {
        use std::io::Write;
        let mut w = &client_side;
        w.write_all(request_bytes).unwrap();
    }

    let stream = Rc::new(RefCell::new(BufferedStream::new(Connection::Unix(server_side))));
    let header_block = stream.borrow_mut().read_until(b"\r\n\r\n")?;
    let (_request_line, env) = parse_request(&header_block, ctx, stream)?;
    Ok((env, client_side))
}

fn base_ctx() -> RequestContext {
    RequestContext {
        server_name: "localhost".to_string(),
        server_port: 8080,
        remote_addr: "127.0.0.1".to_string(),
        base_environ: Arc::new(BaseEnviron::capture()),
        real_ip_header: None,
    }
}

#[test]
fn s1_hello_world() {
    let request = b"GET / HTTP/1.0\r\nHost: x\r\n\r\n";
    let (env, mut client) = send_and_parse(request, base_ctx()).unwrap();
    assert_eq!(env.request_method, "GET");
    assert_eq!(env.path_info, b"/");

    let input = env.input.clone();
    let mut sr = StartResponse::new();
    sr.start(
        "200 OK",
        vec![("Content-Type".to_string(), "text/plain".to_string())],
    );
    let (status, length) = {
        let mut guard = input.borrow_mut();
        drive_response(&mut guard, &mut sr, vec![b"hi".to_vec()]).unwrap()
    };
    assert_eq!(status, "200 OK");
    assert_eq!(length, 2);

    let mut buf = Vec::new();
    client.read_to_end(&mut buf).unwrap();
    let text = String::from_utf8(buf).unwrap();
    assert!(text.starts_with("HTTP/1.0 200 OK\r\n"));
    assert!(text.contains("Date:"));
    assert!(text.contains("Content-Type: text/plain\r\n"));
    assert!(text.contains("Connection: close\r\n"));
    assert!(text.ends_with("\r\n\r\nhi"));
}

#[test]
fn s2_percent_encoded_path() {
    let request = b"GET /a%20b%2Fc?x=%20 HTTP/1.0\r\n\r\n";
    let (env, _client) = send_and_parse(request, base_ctx()).unwrap();
    assert_eq!(env.path_info, b"/a b/c");
    assert_eq!(env.query_string, b"x=%20");
}

#[test]
fn s3_real_ip_header_overrides_remote_addr() {
    let request = b"GET / HTTP/1.0\r\nX-Forwarded-For: 10.0.0.1\r\n\r\n";
    let mut ctx = base_ctx();
    ctx.real_ip_header = Some("HTTP_X_FORWARDED_FOR".to_string());
    let (env, _client) = send_and_parse(request, ctx).unwrap();
    assert_eq!(env.remote_addr, "10.0.0.1");
}

#[test]
fn s4_empty_body_still_has_header_block() {
    let request = b"GET / HTTP/1.0\r\n\r\n";
    let (env, mut client) = send_and_parse(request, base_ctx()).unwrap();
    let input = env.input.clone();
    let mut sr = StartResponse::new();
    sr.start("204 No Content", vec![]);
    let (_, length) = {
        let mut guard = input.borrow_mut();
        drive_response(&mut guard, &mut sr, vec![]).unwrap()
    };
    assert_eq!(length, 0);

    let mut buf = Vec::new();
    client.read_to_end(&mut buf).unwrap();
    let text = String::from_utf8(buf).unwrap();
    assert!(text.ends_with("\r\n\r\n"));
}

#[test]
fn s5_malformed_request_line_is_rejected() {
    let request = b"GARBAGE\r\n\r\n";
    let err = send_and_parse(request, base_ctx()).unwrap_err();
    assert!(matches!(err, preforkd::error::ProtocolError::BadRequestLine));
}

#[test]
fn header_without_colon_becomes_empty_valued() {
    let request = b"GET / HTTP/1.0\r\nNoColonHere\r\n\r\n";
    let (env, _client) = send_and_parse(request, base_ctx()).unwrap();
    assert_eq!(env.header("NoColonHere"), Some(""));
}
