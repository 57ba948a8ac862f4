//! Buffered reader/writer over a connected socket (`spec.md` §4.1).
//!
//! `BufferedStream` owns one accumulated read buffer and one accumulated
//! write buffer around a blocking [`Connection`]. Reads pull in 4 KiB
//! chunks until enough data is on hand; writes only append until `flush`
//! pushes the whole accumulated buffer out.

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::fd::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};

use socket2::{Domain, Socket, Type};

use crate::byteutils;
use crate::config::Listen;
use crate::error::ProtocolError;

/// Backlog passed to `listen(2)` (`spec.md` §4.6, §6.1).
const LISTEN_BACKLOG: i32 = 1024;

const CHUNK_SIZE: usize = 4096;

/// Either side of the two listening-socket families the manager supports.
pub enum Connection {
    Tcp(TcpStream),
    Unix(UnixStream),
}

/// The bound, listening socket, shared by every worker via `fork`
/// inheritance (`spec.md` §4.6: "shared-socket handoff").
pub enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

impl Listener {
    /// Bind and listen, per `spec.md` §4.6: backlog 1024, `SO_REUSEADDR` set
    /// for TCP. `socket2` is used only to reach `SO_REUSEADDR` before
    /// `bind` — `std::net::TcpListener` has no way to set socket options
    /// pre-bind — then the socket is handed back to `std`/`UnixListener` as
    /// the blocking listener every other component in this crate expects.
    pub fn bind(listen: &Listen) -> io::Result<Listener> {
        match listen {
            Listen::Tcp { host, port } => {
                let addr: std::net::SocketAddr = format!("{host}:{port}").parse().map_err(|_| {
                    io::Error::new(io::ErrorKind::InvalidInput, "invalid host/port")
                })?;
                let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
                socket.set_reuse_address(true)?;
                socket.bind(&addr.into())?;
                socket.listen(LISTEN_BACKLOG)?;
                let listener = TcpListener::from(socket);
                Ok(Listener::Tcp(listener))
            }
            Listen::Unix(path) => {
                let _ = std::fs::remove_file(path);
                let listener = UnixListener::bind(path)?;
                Ok(Listener::Unix(listener))
            }
        }
    }

    /// Duplicate the underlying fd, for handing a fresh handle to each
    /// forked worker (`spec.md` §4.6: "shared-socket handoff"). Forking
    /// already shares the fd implicitly, but cloning makes every worker's
    /// ownership of the listener explicit and independent of the manager's.
    pub fn try_clone(&self) -> io::Result<Listener> {
        match self {
            Listener::Tcp(l) => Ok(Listener::Tcp(l.try_clone()?)),
            Listener::Unix(l) => Ok(Listener::Unix(l.try_clone()?)),
        }
    }

    pub fn as_raw_fd(&self) -> std::os::fd::RawFd {
        match self {
            Listener::Tcp(l) => l.as_raw_fd(),
            Listener::Unix(l) => l.as_raw_fd(),
        }
    }

    /// Block until one connection arrives, accept it, and return the peer
    /// address string for logging (empty when the transport has none, per
    /// `spec.md` §3 item 3).
    pub fn accept(&self) -> io::Result<(Connection, String)> {
        match self {
            Listener::Tcp(l) => {
                let (stream, addr) = l.accept()?;
                Ok((Connection::Tcp(stream), addr.ip().to_string()))
            }
            Listener::Unix(l) => {
                let (stream, _addr) = l.accept()?;
                // A Unix-domain peer has no address (`spec.md` §3 item 3:
                // "REMOTE_ADDR from the peer address, or empty if
                // unavailable"), matching `horned.py`'s
                // `client_address and client_address[0] or ""`.
                Ok((Connection::Unix(stream), String::new()))
            }
        }
    }
}

impl Connection {
    pub fn peer_addr_string(&self) -> String {
        match self {
            Connection::Tcp(s) => s
                .peer_addr()
                .map(|a| a.ip().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
            Connection::Unix(_) => String::new(),
        }
    }

    pub fn shutdown(&self) -> io::Result<()> {
        match self {
            Connection::Tcp(s) => s.shutdown(std::net::Shutdown::Both),
            Connection::Unix(s) => s.shutdown(std::net::Shutdown::Both),
        }
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Connection::Tcp(s) => s.read(buf),
            Connection::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Connection::Tcp(s) => s.write(buf),
            Connection::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Connection::Tcp(s) => s.flush(),
            Connection::Unix(s) => s.flush(),
        }
    }
}

/// A chunk-buffered wrapper over a [`Connection`], giving callers
/// `read`/`read_until`/`write`/`flush`/`close` in terms of whole requests and
/// responses rather than raw `recv`/`send` calls.
pub struct BufferedStream {
    conn: Connection,
    read_buf: Vec<u8>,
    write_buf: Vec<u8>,
}

impl BufferedStream {
    pub fn new(conn: Connection) -> Self {
        BufferedStream {
            conn,
            read_buf: Vec::new(),
            write_buf: Vec::new(),
        }
    }

    pub fn peer_addr_string(&self) -> String {
        self.conn.peer_addr_string()
    }

    fn fill(&mut self) -> io::Result<usize> {
        let mut chunk = [0u8; CHUNK_SIZE];
        let n = self.conn.read(&mut chunk)?;
        self.read_buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    /// Read exactly `n` bytes if `n >= 0`, or drain to EOF if `n < 0`.
    ///
    /// Matches `spec.md` §4.1: a negative count means "read everything the
    /// peer sends until it closes the connection."
    pub fn read(&mut self, n: isize) -> io::Result<Vec<u8>> {
        if n < 0 {
            loop {
                if self.fill()? == 0 {
                    break;
                }
            }
            return Ok(std::mem::take(&mut self.read_buf));
        }

        let want = n as usize;
        while self.read_buf.len() < want {
            if self.fill()? == 0 {
                break;
            }
        }

        let take = want.min(self.read_buf.len());
        let rest = self.read_buf.split_off(take);
        Ok(std::mem::replace(&mut self.read_buf, rest))
    }

    /// Read until `delim` appears in the buffered data, returning the
    /// prefix through and including `delim`, and retaining whatever
    /// follows it for the next read.
    ///
    /// Ported from `horned.py`'s `IOStream.read_until`: finding the
    /// delimiter at index 0 is treated as malformed input, not an empty
    /// match, and raises [`ProtocolError::EmptyDelimitedRead`].
    pub fn read_until(&mut self, delim: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        loop {
            if let Some(pos) = byteutils::memmem(&self.read_buf, delim) {
                if pos == 0 {
                    return Err(ProtocolError::EmptyDelimitedRead);
                }
                let rest = self.read_buf.split_off(pos + delim.len());
                let found = std::mem::replace(&mut self.read_buf, rest);
                return Ok(found);
            }
            if self.fill()? == 0 {
                return Err(ProtocolError::PrematureEof);
            }
        }
    }

    /// Append `data` to the pending write buffer. No I/O happens until
    /// [`flush`](Self::flush) is called.
    pub fn write(&mut self, data: &[u8]) {
        self.write_buf.extend_from_slice(data);
    }

    /// Send the entire pending write buffer, retrying on partial writes.
    pub fn flush(&mut self) -> io::Result<()> {
        while !self.write_buf.is_empty() {
            let n = self.conn.write(&self.write_buf)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write whole buffer",
                ));
            }
            self.write_buf.drain(..n);
        }
        self.conn.flush()
    }

    /// Flush any pending output, then shut down the underlying connection.
    pub fn close(&mut self) -> io::Result<()> {
        self.flush()?;
        self.conn.shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream as StdUnixStream;

    fn pair() -> (BufferedStream, StdUnixStream) {
        let (a, b) = StdUnixStream::pair().unwrap();
        (BufferedStream::new(Connection::Unix(a)), b)
    }

    #[test]
    fn read_exact_count_splits_remainder() {
        let (mut stream, mut peer) = pair();
        peer.write_all(b"hello world").unwrap();
        let got = stream.read(5).unwrap();
        assert_eq!(got, b"hello");
        let rest = stream.read(6).unwrap();
        assert_eq!(rest, b" world");
    }

    #[test]
    fn read_negative_drains_to_eof() {
        let (mut stream, mut peer) = pair();
        peer.write_all(b"all of it").unwrap();
        drop(peer);
        let got = stream.read(-1).unwrap();
        assert_eq!(got, b"all of it");
    }

    #[test]
    fn read_until_finds_delimiter_and_keeps_remainder() {
        let (mut stream, mut peer) = pair();
        peer.write_all(b"GET / HTTP/1.0\r\n\r\nbody").unwrap();
        let line = stream.read_until(b"\r\n").unwrap();
        assert_eq!(line, b"GET / HTTP/1.0\r\n");
        let rest = stream.read(4).unwrap();
        assert_eq!(rest, b"\r\nbo");
    }

    #[test]
    fn read_until_rejects_index_zero() {
        let (mut stream, mut peer) = pair();
        peer.write_all(b"\r\nmore").unwrap();
        let err = stream.read_until(b"\r\n").unwrap_err();
        assert!(matches!(err, ProtocolError::EmptyDelimitedRead));
    }

    #[test]
    fn read_until_reports_premature_eof() {
        let (mut stream, mut peer) = pair();
        peer.write_all(b"no delimiter here").unwrap();
        drop(peer);
        let err = stream.read_until(b"\r\n\r\n").unwrap_err();
        assert!(matches!(err, ProtocolError::PrematureEof));
    }

    #[test]
    fn write_is_buffered_until_flush() {
        let (mut stream, mut peer) = pair();
        stream.write(b"hi ");
        stream.write(b"there");
        stream.flush().unwrap();
        let mut buf = [0u8; 8];
        let n = peer.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hi there");
    }
}
