//! The application contract (`spec.md` §6.4).
//!
//! WSGI's `app(environ, start_response) -> iterable_of_chunks` becomes a
//! plain trait: the host crate hands `Manager::run` a value implementing
//! `Application` directly, rather than a dotted import path (SPEC_FULL.md
//! §9 item 1) — the same shape as `kjpgit-mudpie`'s
//! `PageFunction = fn(&WebRequest) -> WebResponse`, generalized to the
//! `start_response`/chunk-iterator contract.

use crate::environ::Environment;
use crate::http::StartResponse;

/// A request handler. `call` receives the request environment and a
/// [`StartResponse`] to record the status/headers through (optionally with
/// `exc_info`, see [`StartResponse::start_with_exc_info`]), and returns the
/// response body as a sequence of byte chunks.
///
/// Implementors that panic inside `call` are caught by the worker's
/// per-request `catch_unwind` boundary (`spec.md` §7); a panic thrown from
/// `start_response` after headers were sent is the mechanism for the
/// exception-info re-raise path.
pub trait Application: Send + Sync {
    fn call(&self, env: Environment, respond: &mut StartResponse) -> Vec<Vec<u8>>;
}

impl<F> Application for F
where
    F: Fn(Environment, &mut StartResponse) -> Vec<Vec<u8>> + Send + Sync,
{
    fn call(&self, env: Environment, respond: &mut StartResponse) -> Vec<Vec<u8>> {
        self(env, respond)
    }
}
