//! Direct serial line to the controller.
//!
//! Protocol framing:
//! - Commands are ASCII, terminated by `\r`
//! - Replies are terminated by `\n` (the controller sends `\r\n`)
//! - One exchange at a time: the port lock is held across write and read
//! - A reply that misses its deadline may still arrive later; the next
//!   exchange discards it before writing, so replies never shift onto the
//!   following command

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use super::{CommandTransport, DeviceHandle};
use crate::error::{RigError, RigResult};

/// Trait alias for async serial port I/O.
///
/// Any type implementing `AsyncRead + AsyncWrite + Unpin + Send` can be used
/// as a serial port. This includes:
/// - `tokio_serial::SerialStream` (real hardware)
/// - `tokio::io::DuplexStream` (testing)
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Upper bound on reads while waiting for a stale line to go quiet.
const MAX_DRAIN_READS: usize = 64;

/// Buffered port plus whether unread replies may still be in flight.
struct PortState {
    reader: BufReader<DynSerial>,
    stale: bool,
}

/// Serial port shared between tasks.
type SharedPort = Arc<Mutex<PortState>>;

/// Transport over a serial line.
pub struct SerialTransport {
    port: SharedPort,
    port_name: String,
    timeout: Duration,
}

impl SerialTransport {
    /// Wrap an already-open port; `timeout` bounds every reply.
    pub fn new(port: DynSerial, port_name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            port: Arc::new(Mutex::new(PortState {
                reader: BufReader::new(port),
                stale: false,
            })),
            port_name: port_name.into(),
            timeout,
        }
    }

    /// Open `port_path` at `baud_rate`, 8N1, no flow control.
    #[cfg(feature = "tokio_serial")]
    pub async fn open(port_path: &str, baud_rate: u32, timeout: Duration) -> RigResult<Self> {
        use tokio::task::spawn_blocking;
        use tokio_serial::SerialPortBuilderExt;

        let path = port_path.to_string();
        let stream = spawn_blocking(move || {
            tokio_serial::new(&path, baud_rate)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One)
                .flow_control(tokio_serial::FlowControl::None)
                .open_native_async()
        })
        .await
        .map_err(|e| RigError::transport(port_path, format!("spawn_blocking failed: {e}")))?
        .map_err(|e| RigError::transport(port_path, format!("failed to open port: {e}")))?;

        Ok(Self::new(Box::new(stream), port_path, timeout))
    }

    /// Name of the port, as given when opening it.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Throw away buffered and late bytes until the line stays quiet for one
    /// reply timeout.
    async fn resync(&self, state: &mut PortState, device: &str) -> RigResult<()> {
        let buffered = state.reader.buffer().len();
        state.reader.consume(buffered);
        let mut discarded = buffered;

        let mut scratch = [0u8; 256];
        for _ in 0..MAX_DRAIN_READS {
            match tokio::time::timeout(self.timeout, state.reader.read(&mut scratch)).await {
                Err(_) => {
                    if discarded > 0 {
                        warn!(port = %self.port_name, discarded, "Discarded late reply bytes");
                    }
                    state.stale = false;
                    return Ok(());
                }
                Ok(Ok(0)) => return Err(RigError::transport(device, "port closed")),
                Ok(Ok(n)) => discarded += n,
                Ok(Err(e)) => {
                    return Err(RigError::transport(device, format!("read failed: {e}")))
                }
            }
        }
        Err(RigError::transport(
            device,
            format!("line did not go quiet after discarding {discarded} bytes"),
        ))
    }
}

#[async_trait]
impl CommandTransport for SerialTransport {
    #[instrument(skip(self, handle), fields(port = %self.port_name, device = %handle.label()), err)]
    async fn send_command(&self, handle: &DeviceHandle, command: &str) -> RigResult<String> {
        let framed = format!("{}\r", handle.frame(command));
        let mut port = self.port.lock().await;

        if port.stale {
            self.resync(&mut port, handle.label()).await?;
        }

        let writer = port.reader.get_mut();
        writer
            .write_all(framed.as_bytes())
            .await
            .map_err(|e| RigError::transport(handle.label(), format!("write failed: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| RigError::transport(handle.label(), format!("flush failed: {e}")))?;

        let mut reply = String::new();
        let read = match tokio::time::timeout(self.timeout, port.reader.read_line(&mut reply)).await {
            Ok(Ok(read)) => read,
            Ok(Err(e)) => {
                port.stale = true;
                return Err(RigError::transport(handle.label(), format!("read failed: {e}")));
            }
            Err(_) => {
                port.stale = true;
                return Err(RigError::transport(
                    handle.label(),
                    format!("no reply to '{command}' within {:?}", self.timeout),
                ));
            }
        };

        if read == 0 {
            return Err(RigError::transport(handle.label(), "port closed"));
        }

        let reply = reply.trim().to_string();
        debug!(command, reply = %reply, "Serial exchange");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_cr_terminated_command_and_reads_reply() {
        let (mut host, device) = tokio::io::duplex(256);
        let transport = SerialTransport::new(Box::new(device), "test", Duration::from_secs(1));
        let handle = DeviceHandle::new("TigerCommHub", "ASITiger");

        let controller = tokio::spawn(async move {
            let mut buf = vec![0u8; 64];
            let n = host.read(&mut buf).await.unwrap();
            host.write_all(b":A P=3\r\n").await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });

        let reply = transport.send_command(&handle, "PZ P?").await.unwrap();
        assert_eq!(reply, ":A P=3");
        assert_eq!(controller.await.unwrap(), "PZ P?\r");
    }

    #[tokio::test]
    async fn card_address_is_sent_before_command() {
        let (mut host, device) = tokio::io::duplex(256);
        let transport = SerialTransport::new(Box::new(device), "test", Duration::from_secs(1));
        let handle = DeviceHandle::new("CRISP", "ASITiger").with_card_address("32");

        let controller = tokio::spawn(async move {
            let mut buf = vec![0u8; 64];
            let n = host.read(&mut buf).await.unwrap();
            host.write_all(b"X=7\r\n").await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });

        transport.send_command(&handle, "LK X?").await.unwrap();
        assert_eq!(controller.await.unwrap(), "32 LK X?\r");
    }

    #[tokio::test(start_paused = true)]
    async fn silence_becomes_transport_error() {
        let (_host, device) = tokio::io::duplex(256);
        let transport = SerialTransport::new(Box::new(device), "test", Duration::from_millis(100));
        let handle = DeviceHandle::new("TigerCommHub", "ASITiger");

        let result = transport.send_command(&handle, "ZS S=1").await;
        assert!(matches!(result, Err(RigError::Transport { .. })));
    }

    /// Reads one `\r`-terminated command from the host side.
    async fn next_command(reader: &mut BufReader<tokio::io::DuplexStream>) -> String {
        let mut line = Vec::new();
        reader.read_until(b'\r', &mut line).await.unwrap();
        String::from_utf8_lossy(&line).trim().to_string()
    }

    #[tokio::test(start_paused = true)]
    async fn late_reply_is_discarded_before_next_exchange() {
        let (host, device) = tokio::io::duplex(256);
        let transport = SerialTransport::new(Box::new(device), "test", Duration::from_millis(100));
        let handle = DeviceHandle::new("TigerCommHub", "ASITiger");

        let controller = tokio::spawn(async move {
            let mut host = BufReader::new(host);
            assert_eq!(next_command(&mut host).await, "MA P?");
            tokio::time::sleep(Duration::from_millis(150)).await;
            host.get_mut().write_all(b":A P=1\r\n").await.unwrap();

            assert_eq!(next_command(&mut host).await, "PZ P?");
            host.get_mut().write_all(b":A P=3\r\n").await.unwrap();
            host
        });

        let missed = transport.send_command(&handle, "MA P?").await;
        assert!(matches!(missed, Err(RigError::Transport { .. })));

        let reply = transport.send_command(&handle, "PZ P?").await.unwrap();
        assert_eq!(reply, ":A P=3");
        controller.await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_exchanges_keep_their_replies() {
        let (host, device) = tokio::io::duplex(1024);
        let transport = Arc::new(SerialTransport::new(
            Box::new(device),
            "test",
            Duration::from_secs(1),
        ));

        // echoes each command, yielding between read and reply
        tokio::spawn(async move {
            let mut host = BufReader::new(host);
            loop {
                let command = next_command(&mut host).await;
                if command.is_empty() {
                    break;
                }
                tokio::task::yield_now().await;
                let reply = format!(":A {command}\r\n");
                if host.get_mut().write_all(reply.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..16 {
            let transport = transport.clone();
            tasks.spawn(async move {
                let handle = DeviceHandle::new("TigerCommHub", "ASITiger");
                let command = format!("Z X={i}");
                let reply = transport.send_command(&handle, &command).await.unwrap();
                (command, reply)
            });
        }
        while let Some(joined) = tasks.join_next().await {
            let (command, reply) = joined.unwrap();
            assert_eq!(reply, format!(":A {command}"));
        }
    }
}
