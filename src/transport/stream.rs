//! Byte stream transport for IQ frames
//!
//! A reliable ordered byte stream (normally TCP) carrying the firmware's
//! header + payload frames. Reads never assume a single `read` returns the
//! requested length.

use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use crate::error::TransportError;
use crate::protocol::DataToken;

/// Anything usable as the data connection
pub trait ByteStream: Read + Write + Send {}

impl<T: Read + Write + Send> ByteStream for T {}

/// Opens a fresh data connection on every `connect`
pub trait StreamConnector: Send {
    fn connect(&self) -> io::Result<Box<dyn ByteStream>>;

    /// Human readable peer description for logs
    fn describe(&self) -> String;
}

/// Open a TCP connection with a sized receive buffer and Nagle disabled
pub fn open_tcp(
    addr: SocketAddr,
    timeout: Duration,
    recv_buffer_size: usize,
) -> io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_recv_buffer_size(recv_buffer_size)?;
    socket.set_nodelay(true)?;
    socket.connect_timeout(&addr.into(), timeout)?;
    Ok(socket.into())
}

/// TCP connector for the firmware's IQ data server
pub struct TcpConnector {
    addr: SocketAddr,
    timeout: Duration,
    recv_buffer_size: usize,
    read_timeout: Option<Duration>,
}

impl TcpConnector {
    pub fn new(addr: SocketAddr, timeout: Duration, recv_buffer_size: usize) -> Self {
        Self {
            addr,
            timeout,
            recv_buffer_size,
            read_timeout: None,
        }
    }

    /// Bound every read; a stalled peer then surfaces as `TransportError::Timeout`
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = Some(read_timeout);
        self
    }
}

impl StreamConnector for TcpConnector {
    fn connect(&self) -> io::Result<Box<dyn ByteStream>> {
        let stream = open_tcp(self.addr, self.timeout, self.recv_buffer_size)?;
        stream.set_read_timeout(self.read_timeout)?;
        Ok(Box::new(stream))
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.addr)
    }
}

/// Connector for a transport built around an existing stream
struct Detached;

impl StreamConnector for Detached {
    fn connect(&self) -> io::Result<Box<dyn ByteStream>> {
        Err(io::Error::new(
            ErrorKind::NotConnected,
            "stream was injected and cannot be reopened",
        ))
    }

    fn describe(&self) -> String {
        "injected stream".to_string()
    }
}

/// Stream transport
pub struct StreamTransport {
    connector: Box<dyn StreamConnector>,
    stream: Option<Box<dyn ByteStream>>,
    bytes_received: u64,
}

impl StreamTransport {
    pub fn new(connector: impl StreamConnector + 'static) -> Self {
        Self {
            connector: Box::new(connector),
            stream: None,
            bytes_received: 0,
        }
    }

    /// Wrap an already open stream
    pub fn from_stream(stream: impl ByteStream + 'static) -> Self {
        Self {
            connector: Box::new(Detached),
            stream: Some(Box::new(stream)),
            bytes_received: 0,
        }
    }

    /// Open the connection; a no-op when already connected
    pub fn connect(&mut self) -> Result<(), TransportError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = self.connector.connect().map_err(|e| {
            TransportError::ConnectionFailed(format!("{}: {}", self.connector.describe(), e))
        })?;
        tracing::info!("Data connection open to {}", self.connector.describe());
        self.stream = Some(stream);
        Ok(())
    }

    /// Drop the connection; the next `connect` opens a fresh one
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("Data connection to {} closed", self.connector.describe());
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Write all of `bytes`
    pub fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        let result = stream.write_all(bytes).and_then(|_| stream.flush());
        result.map_err(|e| self.lost(e))
    }

    pub fn send_token(&mut self, token: DataToken) -> Result<(), TransportError> {
        tracing::trace!("Sending data token {:?}", token);
        self.send(token.as_bytes())
    }

    /// Fill `buf` completely, looping over partial reads
    pub fn receive_into(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        let mut filled = 0;
        while filled < buf.len() {
            match stream.read(&mut buf[filled..]) {
                Ok(0) => {
                    let err = io::Error::new(
                        ErrorKind::UnexpectedEof,
                        format!("peer closed after {} of {} bytes", filled, buf.len()),
                    );
                    return Err(self.lost(err));
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    // A late frame would desynchronise the stream, so it is dropped too.
                    tracing::warn!(
                        "No data from {} after {} of {} bytes",
                        self.connector.describe(),
                        filled,
                        buf.len()
                    );
                    self.stream = None;
                    return Err(TransportError::Timeout(format!(
                        "{} of {} bytes received",
                        filled,
                        buf.len()
                    )));
                }
                Err(e) => return Err(self.lost(e)),
            }
        }
        self.bytes_received += filled as u64;
        Ok(())
    }

    /// Receive exactly `n` bytes into a new buffer
    pub fn receive_exact(&mut self, n: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; n];
        self.receive_into(&mut buf)?;
        Ok(buf)
    }

    // A failed stream is never reused.
    fn lost(&mut self, err: io::Error) -> TransportError {
        tracing::warn!("Data connection to {} lost: {}", self.connector.describe(), err);
        self.stream = None;
        TransportError::ConnectionLost(err.to_string())
    }
}
