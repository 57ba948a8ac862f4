//! The post-fork worker event loop (`spec.md` §4.4).
//!
//! A near-literal port of `horned.py`'s `HornedWorkerProcess`: a self-pipe
//! plus the shared listening socket are waited on together (`select` there,
//! `nix::poll::poll` here), one connection is accepted and fully served
//! before the loop goes back to waiting, and the worker's own signal
//! dispositions are installed fresh after `fork` (a child does not inherit
//! the parent's handler closures in either runtime). `kjpgit-mudpie`'s
//! `webserver.rs` contributes the surrounding Rust control-flow shape —
//! loop around accept, isolate each request's panics — using
//! `catch_unwind` in place of its thread-panic sentinel, since this crate
//! isolates requests by forked process, not by spawned thread.

use std::cell::RefCell;
use std::io;
use std::os::fd::{IntoRawFd, RawFd};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{self, SigHandler, Signal};
use nix::unistd::{close, pipe};

use crate::app::Application;
use crate::environ::BaseEnviron;
use crate::http::request;
use crate::http::request::RequestContext;
use crate::http::response::{drive_response, StartResponse};
use crate::logging::Logger;
use crate::stream::{BufferedStream, Listener};

static ALIVE: AtomicBool = AtomicBool::new(true);
static WAKE_WRITE_FD: AtomicI32 = AtomicI32::new(-1);

/// `SIGQUIT`: stop accepting new connections, let the current request (if
/// any) finish, then exit the main loop. Only async-signal-safe
/// operations happen here: flip a flag, write one byte to the self-pipe.
extern "C" fn handle_graceful(_signum: libc::c_int) {
    ALIVE.store(false, Ordering::SeqCst);
    let fd = WAKE_WRITE_FD.load(Ordering::SeqCst);
    if fd >= 0 {
        let byte = [b'.'];
        unsafe {
            libc::write(fd, byte.as_ptr() as *const libc::c_void, 1);
        }
    }
}

/// `SIGINT`/`SIGTERM`: exit immediately, even mid-request (`spec.md` §6.2).
/// A flag checked only at the top of the accept loop cannot satisfy
/// "immediate" while blocked inside a slow client's request, so this calls
/// `libc::_exit` directly from the handler instead of setting a flag —
/// `_exit` is async-signal-safe, unlike `std::process::exit`
/// (SPEC_FULL.md §9 item 5, a deliberate, documented exception to
/// "handlers only flip flags").
extern "C" fn handle_immediate(_signum: libc::c_int) {
    unsafe {
        libc::_exit(0);
    }
}

/// Everything a freshly forked child needs to become a serving worker.
pub struct WorkerProcess {
    listener: Listener,
    app: Arc<dyn Application>,
    logger: Arc<Logger>,
    base_environ: Arc<BaseEnviron>,
    server_name: String,
    server_port: u16,
    real_ip_header: Option<String>,
    rpipe: RawFd,
    wpipe: RawFd,
    requests: u64,
    errors: u64,
}

impl WorkerProcess {
    pub fn new(
        listener: Listener,
        app: Arc<dyn Application>,
        logger: Arc<Logger>,
        server_name: String,
        server_port: u16,
        real_ip_header: Option<String>,
    ) -> nix::Result<Self> {
        let (rpipe, wpipe) = pipe()?;
        // `pipe()` hands back `OwnedFd`s that would close the pipe the
        // moment they drop; take the raw fds instead, matching `os.pipe()`'s
        // raw-fd lifetime in the original, and close them explicitly when
        // the worker exits (`run`'s trailing `close` calls).
        let rpipe = rpipe.into_raw_fd();
        let wpipe = wpipe.into_raw_fd();
        Ok(WorkerProcess {
            listener,
            app,
            logger,
            base_environ: Arc::new(BaseEnviron::capture()),
            server_name,
            server_port,
            real_ip_header,
            rpipe,
            wpipe,
            requests: 0,
            errors: 0,
        })
    }

    fn install_signal_handlers(&self) {
        WAKE_WRITE_FD.store(self.wpipe, Ordering::SeqCst);
        ALIVE.store(true, Ordering::SeqCst);
        unsafe {
            let _ = signal::signal(Signal::SIGQUIT, SigHandler::Handler(handle_graceful));
            let _ = signal::signal(Signal::SIGINT, SigHandler::Handler(handle_immediate));
            let _ = signal::signal(Signal::SIGTERM, SigHandler::Handler(handle_immediate));
        }
    }

    /// Enter the accept loop. Returns once `SIGQUIT` has been handled and
    /// the loop drains out; `SIGINT`/`SIGTERM` terminate the process
    /// directly from the signal handler and never return here.
    pub fn run(mut self) -> ! {
        self.install_signal_handlers();
        tracing::info!(pid = std::process::id(), "worker ready");

        let listener_fd = self.listener.as_raw_fd();
        while ALIVE.load(Ordering::SeqCst) {
            let mut fds = [
                PollFd::new(unsafe { std::os::fd::BorrowedFd::borrow_raw(listener_fd) }, PollFlags::POLLIN),
                PollFd::new(unsafe { std::os::fd::BorrowedFd::borrow_raw(self.rpipe) }, PollFlags::POLLIN),
            ];
            match poll(&mut fds, PollTimeout::from(5000u16)) {
                Ok(_) => {}
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => {
                    tracing::error!(pid = std::process::id(), error = %e, "poll() failed");
                    break;
                }
            }

            let listener_ready = fds[0]
                .revents()
                .map(|r| r.contains(PollFlags::POLLIN))
                .unwrap_or(false);
            if !listener_ready {
                continue;
            }

            match self.listener.accept() {
                Ok((conn, peer)) => self.handle_request(conn, peer),
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    self.errors += 1;
                    self.logger.error("Broken pipe");
                }
                Err(e) if e.raw_os_error() == Some(libc::EINTR) => {
                    self.errors += 1;
                    self.logger.error("accept() interrupted");
                }
                Err(e) => {
                    self.errors += 1;
                    tracing::error!(pid = std::process::id(), error = %e, "accept() failed");
                }
            }
        }

        tracing::info!(pid = std::process::id(), "worker shutting down");
        let _ = close(self.rpipe);
        let _ = close(self.wpipe);
        std::process::exit(0);
    }

    /// Read the request, invoke the application, and drive the response —
    /// all over one [`SharedStream`](crate::environ::SharedStream), since
    /// the application's `wsgi.input` and the reply both go through the
    /// same connection (`horned.py`'s single `IOStream` instance serving
    /// both roles).
    fn handle_request(&mut self, conn: crate::stream::Connection, peer: String) {
        let start = Instant::now();
        let stream = Rc::new(RefCell::new(BufferedStream::new(conn)));

        let header_block = match stream.borrow_mut().read_until(b"\r\n\r\n") {
            Ok(block) => block,
            Err(e) => {
                self.errors += 1;
                self.logger.error(&format!("protocol error from {peer}: {e}"));
                return;
            }
        };

        let ctx = RequestContext {
            server_name: self.server_name.clone(),
            server_port: self.server_port,
            remote_addr: peer.clone(),
            base_environ: self.base_environ.clone(),
            real_ip_header: self.real_ip_header.clone(),
        };

        let (request_line, env) = match request::parse_request(&header_block, ctx, stream.clone())
        {
            Ok(parsed) => parsed,
            Err(e) => {
                self.errors += 1;
                self.logger.error(&format!("protocol error from {peer}: {e}"));
                return;
            }
        };

        // `spec.md` §4.4: "the request line verbatim" — the raw wire bytes
        // `parse_request` returned alongside the environment, not a
        // reconstruction from the (decoded) `PATH_INFO`.
        let request_line = String::from_utf8_lossy(&request_line).into_owned();
        let client = env.remote_addr.clone();

        let app = self.app.clone();
        let result = panic::catch_unwind(AssertUnwindSafe(move || {
            let mut sr = StartResponse::new();
            let chunks = app.call(env, &mut sr);
            (sr, chunks)
        }));

        match result {
            Ok((mut sr, chunks)) => {
                let mut guard = stream.borrow_mut();
                match drive_response(&mut guard, &mut sr, chunks) {
                    Ok((status, length)) => {
                        self.requests += 1;
                        let elapsed = start.elapsed().as_secs_f64();
                        self.logger
                            .request(&client, &request_line, &status, length, elapsed);
                    }
                    Err(e) => {
                        self.errors += 1;
                        self.logger.error(&format!("write error to {client}: {e}"));
                    }
                }
            }
            Err(_payload) => {
                // Either the application panicked outright, or
                // `start_response` re-raised an `exc_info` triple supplied
                // after headers were already sent (`spec.md` §7). Either
                // way the connection is abandoned without completing the
                // response.
                self.errors += 1;
                self.logger
                    .error(&format!("application panicked handling request from {client}"));
            }
        }

        let _ = stream.borrow_mut().close();
    }
}
