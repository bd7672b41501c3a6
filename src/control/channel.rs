//! Control interface connection
//!
//! A dedicated TCP connection carrying fixed size command frames to the
//! firmware and fixed size acknowledgements back. After a timeout or I/O
//! failure the connection is marked broken: a late acknowledgement would
//! otherwise be paired with the wrong command.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use crate::error::{CommandError, TransportError};
use crate::protocol::command::ACK_FRAME_SIZE;
use crate::protocol::{AckFrame, CommandFrame};
use crate::transport::open_tcp;

/// Control connection
pub struct ControlChannel {
    stream: TcpStream,
    peer: String,
    broken: bool,
}

impl ControlChannel {
    /// Connect to the firmware's control port
    pub fn connect(
        addr: SocketAddr,
        connect_timeout: Duration,
        ack_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let stream = open_tcp(addr, connect_timeout, ACK_FRAME_SIZE * 16).map_err(|e| {
            TransportError::ConnectionFailed(format!("control tcp://{}: {}", addr, e))
        })?;
        let channel = Self::from_stream(stream, ack_timeout)
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        tracing::info!("Control connection open to {}", channel.peer);
        Ok(channel)
    }

    /// Wrap a connected stream, bounding acknowledgement reads by `ack_timeout`
    pub fn from_stream(stream: TcpStream, ack_timeout: Duration) -> std::io::Result<Self> {
        stream.set_read_timeout(Some(ack_timeout))?;
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown peer".to_string());
        Ok(Self {
            stream,
            peer,
            broken: false,
        })
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Send a command without waiting for a reply
    pub fn send(&mut self, frame: &CommandFrame) -> Result<(), CommandError> {
        self.ensure_usable()?;
        tracing::debug!("Sending control message {}", frame.opcode());
        let result = self
            .stream
            .write_all(frame.as_bytes())
            .and_then(|_| self.stream.flush());
        result.map_err(|e| self.fail(CommandError::ConnectionLost(e.to_string())))
    }

    /// Send a command and block for its acknowledgement
    pub fn round_trip(&mut self, frame: &CommandFrame) -> Result<AckFrame, CommandError> {
        self.send(frame)?;
        let ack = self.receive_ack()?;
        tracing::debug!("Control interface communication finished");
        Ok(ack)
    }

    fn receive_ack(&mut self) -> Result<AckFrame, CommandError> {
        let mut buf = [0u8; ACK_FRAME_SIZE];
        let mut filled = 0;
        while filled < ACK_FRAME_SIZE {
            match self.stream.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(self.fail(CommandError::ConnectionLost(format!(
                        "peer closed after {} of {} ack bytes",
                        filled, ACK_FRAME_SIZE
                    ))));
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(self.fail(CommandError::Timeout));
                }
                Err(e) => return Err(self.fail(CommandError::ConnectionLost(e.to_string()))),
            }
        }
        Ok(AckFrame::from_bytes(buf))
    }

    /// Close both directions
    pub fn shutdown(&mut self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            tracing::debug!("Control shutdown on {}: {}", self.peer, e);
        }
        self.broken = true;
    }

    fn ensure_usable(&self) -> Result<(), CommandError> {
        if self.broken {
            return Err(CommandError::ConnectionLost(format!(
                "control connection to {} is no longer usable",
                self.peer
            )));
        }
        Ok(())
    }

    fn fail(&mut self, err: CommandError) -> CommandError {
        tracing::error!("Control connection to {} failed: {}", self.peer, err);
        self.broken = true;
        err
    }
}
