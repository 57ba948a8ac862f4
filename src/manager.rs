//! The supervising parent process (`spec.md` §4.6).
//!
//! A direct port of `horned.py`'s `HornedManager`: bind once, fork a fixed
//! pool, reap and respawn at roughly 1 Hz, and on graceful stop signal
//! every worker and poll for their exit within a bounded deadline before
//! giving up. `kjpgit-mudpie`'s `webserver.rs` condvar-based watchdog loop
//! contributes the surrounding "supervisor notices dead workers and
//! restarts them" shape, adapted here from a condvar wakeup to the spec's
//! 1 Hz poll, and from threads to forked processes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::sys::signal::{self, SigHandler, Signal};

use crate::app::Application;
use crate::config::{Config, Listen};
use crate::error::ManagerError;
use crate::logging::Logger;
use crate::stream::Listener;
use crate::worker::WorkerProcess;
use crate::worker_handle::{Spawned, WorkerHandle};

/// How long the manager waits, after signaling every worker to stop
/// gracefully, before abandoning any stragglers (`spec.md` §4.6).
const GRACEFUL_DEADLINE: Duration = Duration::from_secs(10);
/// Poll interval while waiting out `GRACEFUL_DEADLINE`.
const REAP_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// The main loop's nominal cadence (`spec.md` §4.6: "at ~1 Hz").
const SUPERVISE_INTERVAL: Duration = Duration::from_secs(1);

static MGR_ALIVE: AtomicBool = AtomicBool::new(true);
static MGR_TERMINATE: AtomicBool = AtomicBool::new(false);
static MGR_REOPEN: AtomicBool = AtomicBool::new(false);

/// `SIGQUIT`: begin graceful shutdown (`spec.md` §6.2). The main loop
/// checks `MGR_ALIVE` at most `SUPERVISE_INTERVAL` later.
extern "C" fn handle_graceful(_signum: libc::c_int) {
    MGR_ALIVE.store(false, Ordering::SeqCst);
}

/// `SIGINT`/`SIGTERM`: terminate every worker and exit (`spec.md` §6.2).
/// The manager never blocks on anything but its own bounded sleeps, so
/// (unlike the worker's immediate-stop signals) a flag the main loop polls
/// shortly afterward is sufficient — no need to act from the handler
/// itself.
extern "C" fn handle_terminate(_signum: libc::c_int) {
    MGR_TERMINATE.store(true, Ordering::SeqCst);
}

/// `SIGUSR1`: reopen log sinks (`spec.md` §6.2).
extern "C" fn handle_reopen(_signum: libc::c_int) {
    MGR_REOPEN.store(true, Ordering::SeqCst);
}

/// The manager: owns the listening socket and the live worker pool.
pub struct Manager {
    listener: Listener,
    config: Config,
    app: Arc<dyn Application>,
    logger: Arc<Logger>,
    workers: Vec<WorkerHandle>,
}

impl Manager {
    /// Bind the listening socket per `spec.md` §4.6. Does not fork or
    /// install signal handlers yet — call [`run`](Self::run) for that.
    ///
    /// Only one `Manager` should exist per process (`spec.md` §9 Design
    /// Note, resolved in SPEC_FULL.md §9 item 7): the signal handlers
    /// installed by `run` are process-global statics, so a second instance
    /// would silently share them with the first.
    pub fn new(config: Config, app: Arc<dyn Application>) -> Result<Self, ManagerError> {
        let listener = Listener::bind(&config.listen)?;
        let logger = Arc::new(Logger::new(config.access_log.clone(), config.error_log.clone()));
        Ok(Manager {
            listener,
            config,
            app,
            logger,
            workers: Vec::new(),
        })
    }

    fn server_identity(&self) -> (String, u16) {
        match &self.config.listen {
            Listen::Tcp { host, port } => (host.clone(), *port),
            Listen::Unix(path) => (path.display().to_string(), 0),
        }
    }

    fn install_signal_handlers(&self) {
        MGR_ALIVE.store(true, Ordering::SeqCst);
        MGR_TERMINATE.store(false, Ordering::SeqCst);
        MGR_REOPEN.store(false, Ordering::SeqCst);
        unsafe {
            let _ = signal::signal(Signal::SIGQUIT, SigHandler::Handler(handle_graceful));
            let _ = signal::signal(Signal::SIGINT, SigHandler::Handler(handle_terminate));
            let _ = signal::signal(Signal::SIGTERM, SigHandler::Handler(handle_terminate));
            let _ = signal::signal(Signal::SIGUSR1, SigHandler::Handler(handle_reopen));
        }
    }

    /// Fork one worker. In the parent, the new [`WorkerHandle`] is tracked;
    /// in the child, this never returns — it runs the worker's accept loop
    /// to exit.
    fn spawn_worker(&mut self) -> Result<(), ManagerError> {
        match WorkerHandle::spawn()? {
            Spawned::Parent(handle) => {
                tracing::info!(pid = handle.pid().as_raw(), "spawned worker");
                self.workers.push(handle);
                Ok(())
            }
            Spawned::Child => {
                let (server_name, server_port) = self.server_identity();
                let listener = self
                    .listener
                    .try_clone()
                    .expect("failed to duplicate listening socket in worker");
                let worker = WorkerProcess::new(
                    listener,
                    self.app.clone(),
                    self.logger.clone(),
                    server_name,
                    server_port,
                    self.config.real_ip_header.clone(),
                )
                .expect("failed to set up worker process");
                worker.run();
            }
        }
    }

    /// Non-blocking reap of every tracked worker; removes and logs any
    /// that have exited (`spec.md` §4.6 step 1).
    fn reap(&mut self) {
        let mut i = 0;
        while i < self.workers.len() {
            match self.workers[i].try_wait() {
                Ok(true) => {
                    let dead = self.workers.remove(i);
                    tracing::info!(pid = dead.pid().as_raw(), "worker exited");
                }
                Ok(false) => i += 1,
                Err(e) => {
                    tracing::error!(error = %e, "error reaping worker");
                    i += 1;
                }
            }
        }
    }

    /// Fork new workers until the live pool reaches the configured target
    /// (`spec.md` §4.6 step 2).
    fn spawn_to_target(&mut self) {
        while self.workers.len() < self.config.worker_processes {
            if let Err(e) = self.spawn_worker() {
                tracing::error!(error = %e, "failed to spawn worker");
                break;
            }
        }
    }

    fn signal_all(&self, f: impl Fn(&WorkerHandle) -> nix::Result<()>) {
        for worker in &self.workers {
            if let Err(e) = f(worker) {
                tracing::error!(pid = worker.pid().as_raw(), error = %e, "failed to signal worker");
            }
        }
    }

    /// Graceful shutdown: signal every worker, then poll for exit up to
    /// `GRACEFUL_DEADLINE`, reaping as they go. Any still alive when the
    /// deadline expires are logged and abandoned (`spec.md` §4.6, §7).
    fn graceful_shutdown(&mut self) {
        tracing::info!("beginning graceful shutdown");
        self.signal_all(WorkerHandle::signal_graceful);

        let deadline = Instant::now() + GRACEFUL_DEADLINE;
        while Instant::now() < deadline && !self.workers.is_empty() {
            self.reap();
            if self.workers.is_empty() {
                break;
            }
            std::thread::sleep(REAP_POLL_INTERVAL);
        }

        if !self.workers.is_empty() {
            tracing::error!(
                remaining = self.workers.len(),
                "graceful shutdown deadline expired; abandoning remaining workers"
            );
        } else {
            tracing::info!("all workers exited; manager shutting down");
        }
    }

    /// Terminate every worker immediately and exit without waiting
    /// (`spec.md` §6.2 SIGINT/SIGTERM).
    fn terminate_and_exit(&self) -> ! {
        tracing::info!("terminating workers immediately");
        self.signal_all(WorkerHandle::signal_immediate);
        std::process::exit(0);
    }

    /// Run the manager: spawn the initial pool, then loop reaping dead
    /// workers and respawning to the target count at roughly 1 Hz, until a
    /// graceful-stop signal is received, at which point
    /// [`graceful_shutdown`](Self::graceful_shutdown) runs and the process
    /// exits.
    pub fn run(mut self) -> ! {
        self.install_signal_handlers();
        tracing::info!(
            workers = self.config.worker_processes,
            "manager starting"
        );

        self.spawn_to_target();

        loop {
            self.reap();

            if MGR_TERMINATE.swap(false, Ordering::SeqCst) {
                self.terminate_and_exit();
            }
            if MGR_REOPEN.swap(false, Ordering::SeqCst) {
                self.logger.reopen();
            }
            if !MGR_ALIVE.load(Ordering::SeqCst) {
                break;
            }

            self.spawn_to_target();
            self.sleep_checking_signals(SUPERVISE_INTERVAL);
        }

        self.graceful_shutdown();
        std::process::exit(0);
    }

    /// Sleep up to `total`, in short increments, so `SIGINT`/`SIGTERM`/
    /// `SIGUSR1` delivered mid-sleep are noticed at the top of the next
    /// loop iteration without waiting out the rest of `total` first.
    fn sleep_checking_signals(&self, total: Duration) {
        let step = Duration::from_millis(100);
        let mut slept = Duration::ZERO;
        while slept < total {
            std::thread::sleep(step.min(total - slept));
            slept += step;
            if MGR_TERMINATE.load(Ordering::SeqCst)
                || MGR_REOPEN.load(Ordering::SeqCst)
                || !MGR_ALIVE.load(Ordering::SeqCst)
            {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn bind_failure_is_reported() {
        // Binding two managers to the same Unix socket path back to back
        // without cleanup should still succeed (Listener::bind removes a
        // stale socket file first); binding to an unparsable TCP address
        // is the reliable failure to exercise here.
        let config = Config {
            listen: Listen::Tcp {
                host: "not a host".to_string(),
                port: 0,
            },
            worker_processes: 1,
            access_log: None,
            error_log: None,
            real_ip_header: None,
        };
        let app = Arc::new(|_env: crate::environ::Environment, _sr: &mut crate::http::StartResponse| Vec::new());
        let err = Manager::new(config, app).unwrap_err();
        assert!(matches!(err, ManagerError::Bind(_)));
    }

    #[test]
    fn binds_unix_socket_and_tracks_no_workers_initially() {
        let dir = std::env::temp_dir().join(format!("preforkd-mgr-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path: PathBuf = dir.join("preforkd.sock");

        let config = Config {
            listen: Listen::Unix(path.clone()),
            worker_processes: 2,
            access_log: None,
            error_log: None,
            real_ip_header: None,
        };
        let app = Arc::new(|_env: crate::environ::Environment, _sr: &mut crate::http::StartResponse| Vec::new());
        let manager = Manager::new(config, app).unwrap();
        assert_eq!(manager.workers.len(), 0);

        std::fs::remove_dir_all(&dir).ok();
    }
}
