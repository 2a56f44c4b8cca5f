//! The actuator link: the command channel to the roof controller.
//!
//! The wire contract is four fixed command words and one reply shape:
//! `OPEN`, `CLOSE`, and `ABORT` are fire-and-forget; `QUERY` is answered
//! with a two-character status line (see [`crate::status`]). Commands are
//! newline-terminated; replies are one line, trimmed of framing
//! whitespace.
//!
//! The motion controller only sees the [`ActuatorLink`] trait, so tests
//! and simulators can stand in for the serial port. [`SerialRoofLink`] is
//! the production implementation over a shared async serial port.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use obs_core::serial::{drain_input, open_serial_port, share, SharedPort};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tracing::{debug, trace};

/// Command words understood by the roof controller firmware.
pub mod commands {
    /// Start opening the roof.
    pub const OPEN: &str = "OPEN";
    /// Start closing the roof.
    pub const CLOSE: &str = "CLOSE";
    /// Stop the motor immediately.
    pub const ABORT: &str = "ABORT";
    /// Request a status reply.
    pub const QUERY: &str = "QUERY";
}

/// Transport failures on the actuator link.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The link is not (or no longer) connected.
    #[error("actuator link is not connected")]
    NotConnected,
    /// The controller did not reply in time.
    #[error("no reply from roof controller within {0:?}")]
    Timeout(Duration),
    /// The peer closed the stream.
    #[error("actuator link closed by peer")]
    ClosedByPeer,
    /// An underlying I/O failure.
    #[error("actuator link I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// The command channel the motion controller drives.
///
/// Implementations must serialize their own access to the wire; the
/// controller never issues overlapping calls, but nothing else is
/// assumed.
#[async_trait]
pub trait ActuatorLink: Send + Sync {
    /// Whether the channel is currently usable.
    fn is_connected(&self) -> bool;

    /// Send one command word, without waiting for any reply.
    async fn send(&self, command: &str) -> Result<(), LinkError>;

    /// Send `QUERY` and return the raw status reply, trimmed.
    async fn query_status(&self) -> Result<String, LinkError>;
}

/// [`ActuatorLink`] over an async serial port.
///
/// Every exchange is bounded by the configured reply timeout. A read of
/// zero bytes or an I/O failure marks the link disconnected; a timeout
/// does not, since a slow controller is not a gone controller.
pub struct SerialRoofLink {
    port: SharedPort,
    timeout: Duration,
    connected: AtomicBool,
}

impl SerialRoofLink {
    /// Open the serial port and wrap it as a roof link.
    ///
    /// Stale input (boot banners, replies from a previous session) is
    /// drained before the first exchange.
    ///
    /// # Errors
    ///
    /// Fails if the port cannot be opened.
    pub async fn open(path: &str, baud_rate: u32, timeout: Duration) -> obs_core::Result<Self> {
        let stream = open_serial_port(path, baud_rate, "roof controller").await?;
        let link = Self::from_port(share(Box::new(stream)), timeout);

        let mut guard = link.port.lock().await;
        let discarded = drain_input(guard.get_mut(), Duration::from_millis(50)).await;
        if discarded > 0 {
            debug!(discarded, "discarded stale controller output");
        }
        drop(guard);

        Ok(link)
    }

    /// Wrap an already-shared port. Used by tests with duplex streams and
    /// by embedders that manage the port themselves.
    pub fn from_port(port: SharedPort, timeout: Duration) -> Self {
        Self {
            port,
            timeout,
            connected: AtomicBool::new(true),
        }
    }

    fn io_failure(&self, err: std::io::Error) -> LinkError {
        self.connected.store(false, Ordering::SeqCst);
        LinkError::Io(err)
    }
}

#[async_trait]
impl ActuatorLink for SerialRoofLink {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, command: &str) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }

        let mut port = self.port.lock().await;
        let frame = format!("{command}\n");
        let writer = port.get_mut();
        writer
            .write_all(frame.as_bytes())
            .await
            .map_err(|e| self.io_failure(e))?;
        writer.flush().await.map_err(|e| self.io_failure(e))?;

        trace!(command, "command sent");
        Ok(())
    }

    async fn query_status(&self) -> Result<String, LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }

        let mut port = self.port.lock().await;
        let frame = format!("{}\n", commands::QUERY);
        let writer = port.get_mut();
        writer
            .write_all(frame.as_bytes())
            .await
            .map_err(|e| self.io_failure(e))?;
        writer.flush().await.map_err(|e| self.io_failure(e))?;

        let mut reply = String::new();
        let read = tokio::time::timeout(self.timeout, port.read_line(&mut reply))
            .await
            .map_err(|_| LinkError::Timeout(self.timeout))?
            .map_err(|e| self.io_failure(e))?;

        if read == 0 {
            self.connected.store(false, Ordering::SeqCst);
            return Err(LinkError::ClosedByPeer);
        }

        let reply = reply.trim().to_string();
        trace!(reply = %reply, "status reply");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn link_over_duplex(timeout: Duration) -> (tokio::io::DuplexStream, SerialRoofLink) {
        let (host, device) = tokio::io::duplex(64);
        let link = SerialRoofLink::from_port(share(Box::new(device)), timeout);
        (host, link)
    }

    #[tokio::test]
    async fn send_writes_newline_terminated_command() {
        let (mut host, link) = link_over_duplex(Duration::from_secs(1));

        link.send(commands::OPEN).await.unwrap();

        let mut buf = vec![0u8; 16];
        let n = host.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"OPEN\n");
    }

    #[tokio::test]
    async fn query_status_round_trips_one_line() {
        let (mut host, link) = link_over_duplex(Duration::from_secs(1));

        // Queue the reply first; the duplex buffer holds it until the
        // request has been written.
        host.write_all(b"10\r\n").await.unwrap();

        let reply = link.query_status().await.unwrap();
        assert_eq!(reply, "10");

        let mut buf = vec![0u8; 16];
        let n = host.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"QUERY\n");
    }

    #[tokio::test]
    async fn query_status_times_out_without_reply() {
        let (_host, link) = link_over_duplex(Duration::from_millis(50));

        match link.query_status().await {
            Err(LinkError::Timeout(t)) => assert_eq!(t, Duration::from_millis(50)),
            other => panic!("expected timeout, got {other:?}"),
        }
        // A slow controller is not a disconnected one.
        assert!(link.is_connected());
    }

    #[tokio::test]
    async fn peer_close_marks_link_disconnected() {
        let (host, link) = link_over_duplex(Duration::from_millis(100));
        drop(host);

        match link.query_status().await {
            Err(LinkError::ClosedByPeer) | Err(LinkError::Io(_)) => {}
            other => panic!("expected closed link, got {other:?}"),
        }
        assert!(!link.is_connected());

        // Every later exchange is refused up front.
        match link.send(commands::ABORT).await {
            Err(LinkError::NotConnected) => {}
            other => panic!("expected NotConnected, got {other:?}"),
        }
    }
}
