//! Immutable startup configuration (`spec.md` §3).
//!
//! Loading configuration from a file or the command line is an external
//! collaborator's job (`spec.md` §1) — this module only defines the shape
//! and validates it, the same way `horned.py`'s `DEFAULT_CONFIG` dict and
//! `HornedManager.__init__` merge-and-validate before `run()`.

use std::path::PathBuf;

use crate::error::ConfigError;

/// Where the manager binds its listening socket.
#[derive(Debug, Clone)]
pub enum Listen {
    /// `AF_INET`, e.g. `("127.0.0.1", 8080)`.
    Tcp { host: String, port: u16 },
    /// `AF_UNIX` at an absolute filesystem path.
    Unix(PathBuf),
}

/// Configuration recognized by the manager, immutable after startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: Listen,
    pub worker_processes: usize,
    pub access_log: Option<PathBuf>,
    pub error_log: Option<PathBuf>,
    /// Name of a request header whose value, when present, overrides the
    /// observed peer address for logging and for exposure to the
    /// application. Stored as the canonical `HTTP_<NAME>` key so it can be
    /// looked up directly in the request environment's header map.
    pub real_ip_header: Option<String>,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_processes == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if let Listen::Unix(path) = &self.listen {
            if !path.is_absolute() {
                return Err(ConfigError::InvalidUnixPath);
            }
        }
        Ok(())
    }
}

/// Builds a [`Config`], defaulting to 4 workers listening on
/// `127.0.0.1:8080`, matching `horned.py`'s `DEFAULT_CONFIG`.
pub struct ConfigBuilder {
    listen: Listen,
    worker_processes: usize,
    access_log: Option<PathBuf>,
    error_log: Option<PathBuf>,
    real_ip_header: Option<String>,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        ConfigBuilder {
            listen: Listen::Tcp {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            worker_processes: 4,
            access_log: None,
            error_log: None,
            real_ip_header: None,
        }
    }
}

impl ConfigBuilder {
    pub fn listen(mut self, listen: Listen) -> Self {
        self.listen = listen;
        self
    }

    pub fn worker_processes(mut self, n: usize) -> Self {
        self.worker_processes = n;
        self
    }

    pub fn access_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.access_log = Some(path.into());
        self
    }

    pub fn error_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.error_log = Some(path.into());
        self
    }

    pub fn real_ip_header(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        let canonical = format!("HTTP_{}", name.to_uppercase().replace('-', "_"));
        self.real_ip_header = Some(canonical);
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        let config = Config {
            listen: self.listen,
            worker_processes: self.worker_processes,
            access_log: self.access_log,
            error_log: self.error_log,
            real_ip_header: self.real_ip_header,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_workers_rejected() {
        let err = Config::builder().worker_processes(0).build().unwrap_err();
        assert!(matches!(err, ConfigError::ZeroWorkers));
    }

    #[test]
    fn relative_unix_path_rejected() {
        let err = Config::builder()
            .listen(Listen::Unix(PathBuf::from("relative/path")))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUnixPath));
    }

    #[test]
    fn real_ip_header_is_canonicalized() {
        let config = Config::builder()
            .real_ip_header("X-Forwarded-For")
            .build()
            .unwrap();
        assert_eq!(config.real_ip_header.as_deref(), Some("HTTP_X_FORWARDED_FOR"));
    }
}
