use std::{
    fmt,
    io::{self, Read, Write},
    net::{Shutdown, TcpListener, TcpStream, ToSocketAddrs},
    str::FromStr,
    time::Duration,
};

#[cfg(unix)]
use std::{
    fs,
    os::unix::net::{UnixListener, UnixStream},
    path::PathBuf,
};

use log::{debug, warn};
use thiserror::Error;

use crate::error::{Error as WireError, ErrorCode};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to encode message: {0}")]
    Serialize(#[from] bincode::error::EncodeError),
    #[error("failed to decode message: {0}")]
    Deserialize(#[from] bincode::error::DecodeError),
    #[error("Transport IO Error: {0}")]
    Io(#[from] io::Error),
    #[error("timed out waiting for peer")]
    Timeout,
    #[error("connection closed")]
    Closed,
    #[error("invalid endpoint '{0}'")]
    InvalidEndpoint(String),
}

impl TransportError {
    /// Whether a failed write is worth one silent reconnect.
    fn is_reconnectable(&self) -> bool {
        match self {
            TransportError::Closed => true,
            TransportError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}

impl From<TransportError> for WireError {
    fn from(value: TransportError) -> Self {
        match value {
            TransportError::Timeout => WireError::timeout(),
            TransportError::Closed => WireError::not_connected(),
            other => WireError::new(ErrorCode::Io, other.to_string()),
        }
    }
}

/// The peer ran out of bytes in the middle of a value.
#[derive(Debug, Error)]
#[error("short read: got {read} of {expected} bytes")]
pub struct ShortRead {
    pub read: usize,
    pub expected: usize,
}

/// Where a store server listens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// `host:port`, resolved on every dial.
    Tcp(String),
    #[cfg(unix)]
    Unix(PathBuf),
}

impl Endpoint {
    /// `$HOME/.graphlink/socket`.
    #[cfg(unix)]
    pub fn default_local() -> Self {
        let home = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
        Endpoint::Unix(home.join(".graphlink").join("socket"))
    }

    #[cfg(not(unix))]
    pub fn default_local() -> Self {
        Endpoint::Tcp("127.0.0.1:7311".to_string())
    }

    pub fn dial(&self, timeout: Option<Duration>) -> io::Result<Stream> {
        match self {
            Endpoint::Tcp(address) => {
                let mut last_err = None;
                for addr in address.to_socket_addrs()? {
                    let res = match timeout {
                        Some(timeout) => TcpStream::connect_timeout(&addr, clamp(timeout)),
                        None => TcpStream::connect(addr),
                    };
                    match res {
                        Ok(stream) => {
                            stream.set_nodelay(true)?;
                            return Ok(Stream::Tcp(stream));
                        }
                        Err(e) => last_err = Some(e),
                    }
                }
                Err(last_err.unwrap_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("'{address}' did not resolve to any address"),
                    )
                }))
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => Ok(Stream::Unix(UnixStream::connect(path)?)),
        }
    }

    /// Starts listening; a stale Unix socket file left by a dead server is replaced.
    pub fn bind(&self) -> io::Result<Listener> {
        match self {
            Endpoint::Tcp(address) => Ok(Listener::Tcp(TcpListener::bind(address.as_str())?)),
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                if path.exists() {
                    debug!("removing stale socket {}", path.display());
                    fs::remove_file(path)?;
                }
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let listener = UnixListener::bind(path)?;
                Ok(Listener::Unix(listener, path.clone()))
            }
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(address) => write!(f, "tcp:{address}"),
            #[cfg(unix)]
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(address) = s.strip_prefix("tcp:") {
            return tcp_endpoint(address);
        }
        #[cfg(unix)]
        {
            if let Some(path) = s.strip_prefix("unix:") {
                if path.is_empty() {
                    return Err(TransportError::InvalidEndpoint(s.to_string()));
                }
                return Ok(Endpoint::Unix(PathBuf::from(path)));
            }
            if s.starts_with('/') {
                return Ok(Endpoint::Unix(PathBuf::from(s)));
            }
        }
        tcp_endpoint(s)
    }
}

fn tcp_endpoint(address: &str) -> Result<Endpoint, TransportError> {
    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
            Ok(Endpoint::Tcp(address.to_string()))
        }
        _ => Err(TransportError::InvalidEndpoint(address.to_string())),
    }
}

/// `set_read_timeout(Some(0))` is an error on every platform.
fn clamp(timeout: Duration) -> Duration {
    timeout.max(Duration::from_millis(1))
}

/// A connected stream socket of either family.
#[derive(Debug)]
pub enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Stream {
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        let timeout = timeout.map(clamp);
        match self {
            Stream::Tcp(s) => s.set_read_timeout(timeout),
            #[cfg(unix)]
            Stream::Unix(s) => s.set_read_timeout(timeout),
        }
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        let timeout = timeout.map(clamp);
        match self {
            Stream::Tcp(s) => s.set_write_timeout(timeout),
            #[cfg(unix)]
            Stream::Unix(s) => s.set_write_timeout(timeout),
        }
    }

    pub fn shutdown(&self) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.shutdown(Shutdown::Both),
            #[cfg(unix)]
            Stream::Unix(s) => s.shutdown(Shutdown::Both),
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Stream::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            Stream::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.flush(),
            #[cfg(unix)]
            Stream::Unix(s) => s.flush(),
        }
    }
}

/// A bound server socket. A Unix listener removes its socket file when dropped.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener, PathBuf),
}

impl Listener {
    pub fn accept(&self) -> io::Result<Stream> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, _) = listener.accept()?;
                stream.set_nodelay(true)?;
                Ok(Stream::Tcp(stream))
            }
            #[cfg(unix)]
            Listener::Unix(listener, _) => {
                let (stream, _) = listener.accept()?;
                Ok(Stream::Unix(stream))
            }
        }
    }

    /// The endpoint clients should dial, with an ephemeral TCP port resolved.
    pub fn local_endpoint(&self) -> io::Result<Endpoint> {
        match self {
            Listener::Tcp(listener) => Ok(Endpoint::Tcp(listener.local_addr()?.to_string())),
            #[cfg(unix)]
            Listener::Unix(_, path) => Ok(Endpoint::Unix(path.clone())),
        }
    }
}

#[cfg(unix)]
impl Drop for Listener {
    fn drop(&mut self) {
        if let Listener::Unix(_, path) = self {
            let _ = fs::remove_file(path);
        }
    }
}

/// Blocking socket wrapper that turns partial reads and writes into whole ones.
///
/// Reads go through [`Read::read_exact`], which retries `EINTR` and reports a peer
/// that hangs up mid-value as [`ShortRead`]. Every reply is preceded by
/// [`Transport::wait_for_ready_read`], which bounds the wait for the peer's first
/// byte. Writes go through [`Transport::send`]; in auto-reconnect mode a write that
/// fails on a dead socket redials the remembered endpoint once and retries.
#[derive(Debug)]
pub struct Transport {
    endpoint: Endpoint,
    stream: Option<Stream>,
    timeout: Option<Duration>,
    auto_reconnect: bool,
    peeked: Option<u8>,
    epoch: u64,
}

impl Transport {
    /// Dials `endpoint`. `timeout` bounds the dial, every write, and every wait for
    /// a reply; `None` blocks forever.
    pub fn connect(
        endpoint: Endpoint,
        timeout: Option<Duration>,
        auto_reconnect: bool,
    ) -> Result<Self, TransportError> {
        let stream = endpoint.dial(timeout)?;
        debug!("connected to {endpoint}");
        Ok(Self {
            endpoint,
            stream: Some(stream),
            timeout,
            auto_reconnect,
            peeked: None,
            epoch: 0,
        })
    }

    /// Wraps an accepted socket. Accepted sockets never reconnect.
    pub fn accepted(stream: Stream, endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            stream: Some(stream),
            timeout: None,
            auto_reconnect: false,
            peeked: None,
            epoch: 0,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Number of silent reconnects so far. Server-side state from an earlier epoch
    /// is gone.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Blocks until at least one byte is readable, the peer hangs up, or `timeout`
    /// expires. Returns `Ok(false)` on expiry. `None` waits forever.
    ///
    /// The byte read while waiting is kept and handed to the next read, and the same
    /// timeout keeps applying to the reads that follow.
    pub fn wait_for_ready_read(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<bool, TransportError> {
        if self.peeked.is_some() {
            return Ok(true);
        }
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        stream.set_read_timeout(timeout)?;

        let mut byte = [0_u8; 1];
        loop {
            match stream.read(&mut byte) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(_) => {
                    self.peeked = Some(byte[0]);
                    return Ok(true);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    return Ok(false);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Writes all of `bytes`.
    pub fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        match self.write_all(bytes) {
            Err(err) if self.auto_reconnect && err.is_reconnectable() => {
                warn!("write to {} failed ({err}), reconnecting", self.endpoint);
                self.reconnect()?;
                self.write_all(bytes)
            }
            res => res,
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        stream.set_write_timeout(self.timeout)?;

        let mut written = 0;
        while written < bytes.len() {
            match stream.write(&bytes[written..]) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    return Err(TransportError::Timeout);
                }
                Err(e) => return Err(e.into()),
            }
        }
        stream.flush()?;
        Ok(())
    }

    fn reconnect(&mut self) -> Result<(), TransportError> {
        self.close();
        let stream = self.endpoint.dial(self.timeout)?;
        self.stream = Some(stream);
        self.epoch += 1;
        debug!("reconnected to {} (epoch {})", self.endpoint, self.epoch);
        Ok(())
    }

    /// Shuts the socket down under the transport's feet, so the next write fails
    /// the way it does when the peer has gone.
    #[cfg(test)]
    pub(crate) fn sever(&self) {
        if let Some(stream) = self.stream.as_ref() {
            let _ = stream.shutdown();
        }
    }

    pub fn close(&mut self) {
        self.peeked = None;
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown();
        }
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if let Some(byte) = self.peeked.take() {
            buf[0] = byte;
            return Ok(1);
        }
        match self.stream.as_mut() {
            Some(stream) => stream.read(buf),
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let expected = buf.len();
        let mut read = 0;
        while read < expected {
            match self.read(&mut buf[read..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        ShortRead { read, expected },
                    ));
                }
                Ok(n) => read += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
