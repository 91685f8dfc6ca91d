//! Byte channels underneath the transports.
//!
//! A channel moves raw bytes and knows nothing about frames. Serial port
//! handles come from the application (any `Read + Write` pair configured with
//! a read timeout), TCP sockets are opened here.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use servolink_errors::{Result, ServoError};
use tracing::debug;

/// Bidirectional byte channel shared between a caller and a worker thread.
pub trait Channel: Send + Sync {
    /// Send every byte of `bytes`.
    fn send(&self, bytes: &[u8]) -> Result<()>;

    /// Receive up to `buf.len()` bytes, waiting at most `timeout`.
    ///
    /// Returns `Ok(0)` when nothing arrived in time. A closed peer is
    /// `Disconnected`.
    fn recv(&self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Release the underlying handle. Blocked and later calls fail.
    fn close(&self);
}

/// Opens a fresh channel, used by backends that reconnect on their own.
pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Arc<dyn Channel>>;
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

/// TCP socket channel.
#[derive(Debug)]
pub struct TcpChannel {
    reader: Mutex<TcpStream>,
    writer: Mutex<TcpStream>,
    peer: SocketAddr,
}

impl TcpChannel {
    /// Resolve `address` and connect to the first endpoint that answers.
    pub fn connect(address: &str, timeout: Duration) -> Result<Self> {
        let mut last_err = None;
        for addr in address.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => return Self::from_stream(stream),
                Err(e) => {
                    debug!(%addr, error = %e, "TCP connect attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(match last_err {
            Some(e) => ServoError::from(e),
            None => ServoError::invalid_argument(format!("{address} did not resolve")),
        })
    }

    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: Mutex::new(stream),
            writer: Mutex::new(writer),
            peer,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl Channel for TcpChannel {
    fn send(&self, bytes: &[u8]) -> Result<()> {
        self.writer.lock().write_all(bytes)?;
        Ok(())
    }

    fn recv(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let mut stream = self.reader.lock();
        // A zero timeout means "block forever" to the socket.
        stream.set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        match stream.read(buf) {
            Ok(0) if !buf.is_empty() => Err(ServoError::disconnected(format!(
                "{} closed the connection",
                self.peer
            ))),
            Ok(n) => Ok(n),
            Err(e) if is_timeout(&e) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn close(&self) {
        if let Err(e) = self.writer.lock().shutdown(Shutdown::Both) {
            debug!(peer = %self.peer, error = %e, "TCP shutdown failed");
        }
    }
}

/// Opens [`TcpChannel`]s to a fixed address.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }
}

impl Connector for TcpConnector {
    fn connect(&self) -> Result<Arc<dyn Channel>> {
        let channel = TcpChannel::connect(&self.address, self.timeout)?;
        Ok(Arc::new(channel))
    }
}

/// Channel over an application-supplied reader and writer, typically the two
/// halves of a serial port.
///
/// The reader must already be configured with a short read timeout; `recv`
/// cannot shorten a read that blocks on its own.
pub struct StreamChannel<R, W> {
    reader: Mutex<Option<R>>,
    writer: Mutex<Option<W>>,
}

impl<R, W> StreamChannel<R, W>
where
    R: Read + Send,
    W: Write + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
        }
    }
}

impl<R, W> Channel for StreamChannel<R, W>
where
    R: Read + Send,
    W: Write + Send,
{
    fn send(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self.writer.lock();
        let writer = guard
            .as_mut()
            .ok_or_else(|| ServoError::disconnected("channel closed"))?;
        writer.write_all(bytes)?;
        writer.flush()?;
        Ok(())
    }

    fn recv(&self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        let mut guard = self.reader.lock();
        let reader = guard
            .as_mut()
            .ok_or_else(|| ServoError::disconnected("channel closed"))?;
        match reader.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if is_timeout(&e) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn close(&self) {
        self.writer.lock().take();
        self.reader.lock().take();
    }
}
