//! Reopenable access/error log sinks, plus ambient diagnostic logging
//! (`spec.md` §2, §4.4; SPEC_FULL.md §4.7).
//!
//! `Sink` ports `horned.py`'s `Logfile`: it wraps a path, can be reopened
//! in place for log rotation, and a failed reopen is reported but leaves
//! the previous file descriptor in use (`spec.md` §7). Worker lifecycle
//! and error diagnostics that aren't part of the spec-mandated access/error
//! log go through `tracing` instead, the way `horned.py` keeps
//! `log.request(...)` (request logging) separate from `log.info`/
//! `log.error` (diagnostics).

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;

/// A single reopenable log file. `None` means the sink is disabled
/// (nothing configured) rather than pointing at `/dev/null`.
pub struct Sink {
    path: Option<PathBuf>,
    file: Mutex<Option<File>>,
}

impl Sink {
    pub fn open(path: Option<PathBuf>) -> Self {
        let file = path.as_ref().and_then(|p| open_append(p));
        Sink {
            path,
            file: Mutex::new(file),
        }
    }

    pub fn disabled() -> Self {
        Sink {
            path: None,
            file: Mutex::new(None),
        }
    }

    pub fn write_line(&self, line: &str) {
        let mut guard = self.file.lock().unwrap();
        if let Some(file) = guard.as_mut() {
            let _ = file.write_all(line.as_bytes());
            let _ = file.flush();
        }
    }

    /// Reopen the underlying file at the same path. On failure the
    /// previous, already-open file descriptor keeps being used — a log
    /// rotation race must never silently stop logging.
    pub fn reopen(&self) -> bool {
        let Some(path) = &self.path else {
            return true;
        };
        match open_append(path) {
            Some(new_file) => {
                *self.file.lock().unwrap() = Some(new_file);
                true
            }
            None => false,
        }
    }
}

fn open_append(path: &std::path::Path) -> Option<File> {
    OpenOptions::new().create(true).append(true).open(path).ok()
}

/// The access/error logging facade the manager and workers share.
pub struct Logger {
    access: Sink,
    error: Sink,
}

impl Logger {
    pub fn new(access_log: Option<PathBuf>, error_log: Option<PathBuf>) -> Self {
        Logger {
            access: Sink::open(access_log),
            error: Sink::open(error_log),
        }
    }

    /// Write one access-log line: peer address, request line verbatim,
    /// the first three characters of the status, body length, and elapsed
    /// time in seconds (`spec.md` §4.4).
    pub fn request(&self, client: &str, request_line: &str, status: &str, length: usize, elapsed: f64) {
        let status_code = &status[..status.len().min(3)];
        let line = format!(
            "{} \"{}\" {} {} {:.6}\n",
            client, request_line, status_code, length, elapsed
        );
        self.access.write_line(&line);
    }

    pub fn error(&self, msg: &str) {
        self.error.write_line(&format!("{}\n", msg));
        tracing::error!("{msg}");
    }

    /// Reopen both sinks, logging failures through `tracing` the way
    /// `horned.py`'s `Logger.reopen` reports them through `self.error`.
    pub fn reopen(&self) {
        tracing::info!("reopening log files");
        if !self.access.reopen() {
            tracing::error!("could not reopen access log");
        }
        if !self.error.reopen() {
            tracing::error!("could not reopen error log");
        }
    }
}

/// Install the ambient `tracing` subscriber for process lifecycle
/// diagnostics (worker spawned/died, shutdown progress, bind failures).
/// Independent of the configured access/error sinks above.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_sink_is_a_noop() {
        let sink = Sink::disabled();
        sink.write_line("should vanish\n");
        assert!(sink.reopen());
    }

    #[test]
    fn sink_writes_and_reopens() {
        let dir = std::env::temp_dir().join(format!("preforkd-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("access.log");

        let sink = Sink::open(Some(path.clone()));
        sink.write_line("first\n");
        assert!(sink.reopen());
        sink.write_line("second\n");

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "first\nsecond\n");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn logger_request_line_truncates_status_to_three_chars() {
        let dir = std::env::temp_dir().join(format!("preforkd-test-req-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("access.log");

        let logger = Logger::new(Some(path.clone()), None);
        logger.request("127.0.0.1", "GET / HTTP/1.0", "200 OK", 2, 0.001);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("127.0.0.1"));
        assert!(contents.contains("\"GET / HTTP/1.0\""));
        assert!(contents.contains(" 200 "));

        std::fs::remove_dir_all(&dir).ok();
    }
}
