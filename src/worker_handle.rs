//! Manager-side handle to one forked worker (`spec.md` §4.5).
//!
//! A direct port of `horned.py`'s `HornedWorker`: the manager process
//! keeps one of these per child, forks from it, and uses it to signal and
//! reap that child. `kjpgit-mudpie`'s `ThreadPool`/`WorkerSentinel`
//! watchdog contributes the surrounding "track liveness, notice death,
//! respawn" shape, adapted here from threads to processes.

use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};

/// Outcome of spawning a worker: the manager gets a handle, the child gets
/// nothing back (it runs `WorkerProcess::run` and never returns `fork`).
pub enum Spawned {
    Parent(WorkerHandle),
    Child,
}

/// The manager's record of one live (or recently live) worker process.
pub struct WorkerHandle {
    pid: Pid,
    spawned_at: u64,
    pub requests: u64,
    pub errors: u64,
}

impl WorkerHandle {
    /// Fork. In the parent, returns a handle tracking the child's pid. In
    /// the child, returns `Spawned::Child` — the caller is responsible for
    /// running the worker's event loop and never returning past that call.
    pub fn spawn() -> nix::Result<Spawned> {
        match unsafe { fork() }? {
            ForkResult::Parent { child } => Ok(Spawned::Parent(WorkerHandle {
                pid: child,
                spawned_at: now(),
                requests: 0,
                errors: 0,
            })),
            ForkResult::Child => Ok(Spawned::Child),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn spawned_at(&self) -> u64 {
        self.spawned_at
    }

    /// Ask the worker to finish its current request, if any, then exit
    /// (`SIGQUIT`, the worker's graceful-stop signal).
    pub fn signal_graceful(&self) -> nix::Result<()> {
        signal::kill(self.pid, Signal::SIGQUIT)
    }

    /// Ask the worker to exit immediately, abandoning any in-flight
    /// request (`SIGTERM`, per `spec.md` §6.2).
    pub fn signal_immediate(&self) -> nix::Result<()> {
        signal::kill(self.pid, Signal::SIGTERM)
    }

    /// Non-blocking reap. `Ok(true)` if the child has exited and was
    /// reaped, `Ok(false)` if it's still running.
    pub fn try_wait(&self) -> io::Result<bool> {
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => Ok(false),
            Ok(_) => Ok(true),
            Err(nix::errno::Errno::ECHILD) => Ok(true),
            Err(e) => Err(io::Error::from_raw_os_error(e as i32)),
        }
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
