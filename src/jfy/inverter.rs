use crate::error::{Error, Result};
use crate::jfy::packet::{self, Reading, INVERTER_ADDRESS, MAX_FRAME_LEN};
use crate::jfy::packet_decoder::PacketDecoder;

use {
    async_trait::async_trait,
    bytes::BytesMut,
    log::{debug, info},
    std::time::Duration,
    tokio::io::{AsyncReadExt, AsyncWriteExt},
    tokio::time::Instant,
    tokio_serial::{ClearBuffer, SerialPortBuilderExt, SerialStream},
    tokio_util::codec::Decoder,
};

pub const BAUD_RATE: u32 = 9600;
const WRITE_TIMEOUT_SECS: u64 = 5;
/// Pause after the re-register broadcast, which the inverter never answers.
const RE_REGISTER_SETTLE_MS: u64 = 50;

// SerialNumber {{{
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct SerialNumber(Vec<u8>);

impl SerialNumber {
    pub fn new(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.clone()
    }
}

impl std::fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let serial = String::from_utf8_lossy(&self.0);
        write!(f, "{}", serial.trim_matches(|c: char| c == '\0' || c.is_whitespace()))
    }
}

impl std::fmt::Debug for SerialNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
} // }}}

// Transport {{{
/// Raw byte exchange with the inverter.
#[async_trait]
pub trait Transport: Send {
    /// Writes all of `bytes` or fails with `IoFailure`.
    async fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Returns whatever arrived within `timeout`, up to `max_bytes`, or
    /// `Timeout` if nothing did.
    async fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>>;

    /// Drops anything received but not yet read, such as a reply that
    /// arrived after its read window closed.
    async fn clear_input(&mut self) -> Result<()>;

    /// Releases the device. Safe to call more than once.
    async fn close(&mut self);
}

pub struct SerialTransport {
    port: String,
    stream: Option<SerialStream>,
}

impl SerialTransport {
    /// Opens `port` at the fixed JFY line settings, 9600 8N1 with no flow
    /// control, and claims it exclusively.
    pub fn open(port: &str) -> Result<Self> {
        info!("Opening port {}", port);

        let unavailable = |reason: String| Error::DeviceUnavailable {
            port: port.to_string(),
            reason,
        };

        #[allow(unused_mut)]
        let mut stream = tokio_serial::new(port, BAUD_RATE)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| unavailable(e.to_string()))?;

        #[cfg(unix)]
        stream
            .set_exclusive(true)
            .map_err(|e| unavailable(e.to_string()))?;

        Ok(Self {
            port: port.to_string(),
            stream: Some(stream),
        })
    }

    fn stream(&mut self) -> Result<&mut SerialStream> {
        self.stream.as_mut().ok_or_else(|| {
            Error::IoFailure(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "serial port already closed",
            ))
        })
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let stream = self.stream()?;

        let write = async move {
            stream.write_all(bytes).await?;
            stream.flush().await
        };

        match tokio::time::timeout(Duration::from_secs(WRITE_TIMEOUT_SECS), write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Error::IoFailure(e)),
            Err(_) => Err(Error::IoFailure(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("write timeout after {} seconds", WRITE_TIMEOUT_SECS),
            ))),
        }
    }

    async fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>> {
        let stream = self.stream()?;
        let mut buf = vec![0; max_bytes];

        match tokio::time::timeout(timeout, stream.read(&mut buf)).await {
            Ok(Ok(0)) => Err(Error::IoFailure(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "serial port closed by device",
            ))),
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(buf)
            }
            Ok(Err(e)) => Err(Error::IoFailure(e)),
            Err(_) => Err(Error::Timeout(timeout)),
        }
    }

    async fn clear_input(&mut self) -> Result<()> {
        let stream = self.stream()?;
        tokio_serial::SerialPort::clear(&*stream, ClearBuffer::Input)
            .map_err(|e| Error::IoFailure(e.into()))
    }

    async fn close(&mut self) {
        if self.stream.take().is_some() {
            info!("Closed port {}", self.port);
        }
    }
} // }}}

/// The open link to one inverter: request/response exchange plus the
/// registration state the JFY protocol keeps per bus.
pub struct Session<T: Transport> {
    transport: T,
    decoder: PacketDecoder,
    serial: Option<SerialNumber>,
    closed: bool,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            decoder: PacketDecoder::new(),
            serial: None,
            closed: false,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.serial.is_some()
    }

    pub fn serial(&self) -> Option<&SerialNumber> {
        self.serial.as_ref()
    }

    /// Next cycle registers again before polling.
    pub fn forget_registration(&mut self) {
        self.serial = None;
    }

    async fn send(&mut self, request: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::IoFailure(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "session closed",
            )));
        }

        // one request, one answer: nothing left over may pass as this reply
        self.transport.clear_input().await?;

        debug!("TX {:02X?}", request);
        self.transport.write(request).await
    }

    /// Sends `request` and collects the reply within `window`.
    ///
    /// Returns the first complete frame, or whatever partial bytes arrived
    /// when the window closed so the parser can reject them; `Timeout` only
    /// if nothing arrived at all.
    pub async fn exchange(&mut self, request: &[u8], window: Duration) -> Result<BytesMut> {
        self.send(request).await?;

        let deadline = Instant::now() + window;
        let mut buf = BytesMut::with_capacity(MAX_FRAME_LEN);
        let mut received = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            match self.transport.read(MAX_FRAME_LEN, remaining).await {
                Ok(bytes) => {
                    received += bytes.len();
                    buf.extend_from_slice(&bytes);
                }
                Err(Error::Timeout(_)) => break,
                Err(e) => return Err(e),
            }

            if let Some(frame) = self.decoder.decode(&mut buf).map_err(Error::IoFailure)? {
                debug!("RX {:02X?}", &frame[..]);
                return Ok(frame);
            }
        }

        if received == 0 {
            return Err(Error::Timeout(window));
        }

        debug!("RX incomplete {:02X?} after {} bytes", &buf[..], received);
        Ok(buf)
    }

    /// Re-register, offline query, send register address: afterwards the
    /// inverter answers polls at `INVERTER_ADDRESS`.
    pub async fn register(&mut self, window: Duration) -> Result<SerialNumber> {
        info!("Registering inverter");
        self.forget_registration();

        self.send(&packet::build_re_register()).await?;
        tokio::time::sleep(Duration::from_millis(RE_REGISTER_SETTLE_MS)).await;

        let reply = self.exchange(&packet::build_offline_query(), window).await?;
        let serial = packet::parse_serial_number(&reply)?;

        let reply = self
            .exchange(&packet::build_register_address(&serial), window)
            .await?;
        packet::parse_register_ack(&reply)?;

        info!("Inverter {} registered at address {:#04x}", serial, INVERTER_ADDRESS);
        self.serial = Some(serial.clone());

        Ok(serial)
    }

    pub async fn poll(&mut self, window: Duration) -> Result<Reading> {
        let reply = self.exchange(&packet::build_poll_request(), window).await?;
        packet::parse_response(&reply)
    }

    /// Closes the transport the first time it is called; later calls do nothing.
    pub async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.transport.close().await;
        }
    }
}
