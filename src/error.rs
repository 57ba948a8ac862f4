//! Error types for the HTTP codec and server configuration.

use std::fmt;
use std::io;

/// A malformed request, premature EOF, or other transport-level failure
/// encountered while reading and parsing a request (`spec.md` §4.2, §7).
///
/// Protocol errors are never turned into an HTTP error response — the
/// connection is simply closed (§7).
#[derive(Debug)]
pub enum ProtocolError {
    /// Fewer than three whitespace-separated tokens on the request line.
    BadRequestLine,
    /// The peer closed the connection before the header terminator
    /// (`\r\n\r\n`) was seen, or before `read_until`'s delimiter appeared.
    PrematureEof,
    /// `read_until` found its delimiter at index 0.
    EmptyDelimitedRead,
    Io(io::Error),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::BadRequestLine => write!(f, "malformed request line"),
            ProtocolError::PrematureEof => write!(f, "peer closed before delimiter"),
            ProtocolError::EmptyDelimitedRead => write!(f, "delimiter found at index 0"),
            ProtocolError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProtocolError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ProtocolError {
    fn from(e: io::Error) -> Self {
        ProtocolError::Io(e)
    }
}

/// An invalid `Config` (`spec.md` §3) — e.g. `worker_processes == 0`.
#[derive(Debug)]
pub enum ConfigError {
    ZeroWorkers,
    InvalidUnixPath,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroWorkers => write!(f, "worker_processes must be positive"),
            ConfigError::InvalidUnixPath => {
                write!(f, "unix domain socket path must be absolute")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// A fatal failure starting the manager (`spec.md` §7: "Bind / listen
/// failure: fatal to the manager").
#[derive(Debug)]
pub enum ManagerError {
    Bind(io::Error),
    Fork(nix::errno::Errno),
}

impl fmt::Display for ManagerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerError::Bind(e) => write!(f, "failed to bind listening socket: {e}"),
            ManagerError::Fork(e) => write!(f, "fork() failed: {e}"),
        }
    }
}

impl std::error::Error for ManagerError {}

impl From<io::Error> for ManagerError {
    fn from(e: io::Error) -> Self {
        ManagerError::Bind(e)
    }
}

impl From<nix::errno::Errno> for ManagerError {
    fn from(e: nix::errno::Errno) -> Self {
        ManagerError::Fork(e)
    }
}
