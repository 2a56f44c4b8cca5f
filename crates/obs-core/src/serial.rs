//! Async serial-port plumbing for driver crates.
//!
//! Requires the `serial` feature:
//!
//! ```toml
//! [dependencies]
//! obs-core = { path = "../obs-core", features = ["serial"] }
//! ```
//!
//! Observatory controllers here speak line-delimited ASCII, so the shared
//! port type wraps the stream in a [`BufReader`] for `read_line`. The
//! concrete stream is type-erased behind [`SerialPortIO`]; real hardware
//! uses `tokio_serial::SerialStream`, tests use `tokio::io::DuplexStream`.
//!
//! ```rust,ignore
//! use obs_core::serial::{drain_input, open_serial_port, share};
//! use std::time::Duration;
//!
//! let port = open_serial_port("/dev/ttyUSB0", 57600, "roof controller").await?;
//! let shared = share(Box::new(port));
//!
//! // Throw away anything the controller said before we were listening.
//! let mut guard = shared.lock().await;
//! drain_input(guard.get_mut(), Duration::from_millis(50)).await;
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tokio::sync::Mutex;

/// Anything usable as an async serial port.
///
/// Blanket-implemented for every `AsyncRead + AsyncWrite + Unpin + Send`
/// type, which covers real ports, duplex pipes, and test doubles alike.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// A type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// A serial port shared between tasks, buffered for line-oriented reads.
pub type SharedPort = Arc<Mutex<BufReader<DynSerial>>>;

/// Wrap a type-erased port into a [`SharedPort`].
pub fn share(port: DynSerial) -> SharedPort {
    Arc::new(Mutex::new(BufReader::new(port)))
}

/// Open a serial port without blocking the async runtime.
///
/// Port enumeration and opening are blocking operations on every platform,
/// so the open runs inside `spawn_blocking`. The port is configured 8N1
/// with no flow control, which is what the controllers in this workspace
/// expect.
///
/// `device_label` only appears in error messages.
///
/// # Errors
///
/// Fails if the port cannot be opened or the blocking task is cancelled.
pub async fn open_serial_port(
    path: &str,
    baud_rate: u32,
    device_label: &str,
) -> anyhow::Result<tokio_serial::SerialStream> {
    use anyhow::Context;
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let path = path.to_string();
    let label = device_label.to_string();

    let stream = spawn_blocking(move || {
        tokio_serial::new(&path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .with_context(|| format!("failed to open {label} serial port {path}"))
    })
    .await
    .context("serial open task failed")??;

    tracing::debug!(baud_rate, "serial port opened");
    Ok(stream)
}

/// Read and discard whatever is already sitting in the input buffer.
///
/// Controllers that chatter at boot, or replies from a previous session,
/// would otherwise be misread as the answer to our first command. Returns
/// the number of bytes thrown away; `window` bounds how long the drain may
/// keep reading.
pub async fn drain_input<R: AsyncRead + Unpin>(port: &mut R, window: Duration) -> usize {
    let mut scratch = [0u8; 256];
    let deadline = tokio::time::Instant::now() + window;
    let mut discarded = 0usize;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }

        match tokio::time::timeout(remaining, port.read(&mut scratch)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => discarded += n,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Ok(Err(_)) => break,
            Err(_) => break,
        }
    }

    if discarded > 0 {
        tracing::trace!(discarded, "drained stale serial input");
    }
    discarded
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn shared_port_reads_lines_over_duplex() {
        let (mut host, device) = tokio::io::duplex(64);
        let port: SharedPort = share(Box::new(device));

        host.write_all(b"13\n").await.unwrap();

        let mut guard = port.lock().await;
        let mut line = String::new();
        guard.read_line(&mut line).await.unwrap();

        assert_eq!(line.trim(), "13");
    }

    #[tokio::test]
    async fn shared_port_clones_reach_the_same_stream() {
        let (mut host, device) = tokio::io::duplex(64);
        let port = share(Box::new(device));
        let clone = port.clone();

        host.write_all(b"20\n").await.unwrap();

        let mut guard = clone.lock().await;
        let mut line = String::new();
        guard.read_line(&mut line).await.unwrap();

        assert_eq!(line.trim(), "20");
    }

    #[tokio::test]
    async fn drain_input_discards_pending_bytes() {
        let (mut host, mut device) = tokio::io::duplex(64);

        host.write_all(b"bootloader banner\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let discarded = drain_input(&mut device, Duration::from_millis(50)).await;
        assert_eq!(discarded, 18);
    }

    #[tokio::test]
    async fn drain_input_returns_zero_on_quiet_port() {
        let (_host, mut device) = tokio::io::duplex(64);

        let discarded = drain_input(&mut device, Duration::from_millis(20)).await;
        assert_eq!(discarded, 0);
    }
}
