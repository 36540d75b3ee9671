use serialport::{DataBits, Parity, SerialPort, SerialPortInfo, SerialPortType, StopBits};
use std::io::{self, Read};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Name fragments of common USB-serial adapters (FTDI, CH340, CDC-ACM boards).
const USB_SERIAL_PATTERNS: &[&str] = &[
    "ttyUSB",
    "ttyACM",
    "cu.usbserial",
    "cu.usbmodem",
    "tty.usbserial",
    "tty.usbmodem",
];

#[derive(Debug, Error)]
pub enum SerialError {
    #[error("No serial device found")]
    NoDeviceFound,
    #[error("Failed to enumerate serial devices: {0}")]
    Enumerate(#[source] serialport::Error),
    #[error("Failed to open serial device {device}: {source}")]
    OpenError {
        device: String,
        #[source]
        source: serialport::Error,
    },
    #[error("Failed to read from serial device: {0}")]
    Read(#[from] io::Error),
}

/// Physical-layer parameters. Fixed at 9600 8N1 for the sensor board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialFraming {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl Default for SerialFraming {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
        }
    }
}

/// Lists attached serial devices and picks one.
pub fn discover() -> Result<SerialPortInfo, SerialError> {
    let ports = serialport::available_ports().map_err(SerialError::Enumerate)?;
    debug!("Found {} serial device(s).", ports.len());
    select_device(ports)
}

/// First USB-serial looking device, otherwise the first device enumerated.
pub fn select_device(ports: Vec<SerialPortInfo>) -> Result<SerialPortInfo, SerialError> {
    let preferred = ports.iter().position(is_usb_serial).unwrap_or(0);
    ports.into_iter().nth(preferred).ok_or(SerialError::NoDeviceFound)
}

fn is_usb_serial(port: &SerialPortInfo) -> bool {
    USB_SERIAL_PATTERNS
        .iter()
        .any(|pattern| port.port_name.contains(pattern))
        || matches!(port.port_type, SerialPortType::UsbPort(_))
}

/// Opens `device` with the given framing. The read timeout only bounds a single
/// driver read; the line reader reports it as [`ReadOutcome::Timeout`].
pub fn open(
    device: &str,
    framing: SerialFraming,
    read_timeout: Duration,
) -> Result<Box<dyn SerialPort>, SerialError> {
    let port = serialport::new(device, framing.baud_rate)
        .data_bits(framing.data_bits)
        .parity(framing.parity)
        .stop_bits(framing.stop_bits)
        .timeout(read_timeout)
        .open()
        .map_err(|source| SerialError::OpenError {
            device: device.to_string(),
            source,
        })?;
    info!(
        "Opened serial device {} at {} baud.",
        device, framing.baud_rate
    );
    Ok(port)
}

/// Result of one [`LineReader::read_line`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A newline-terminated line, whitespace trimmed.
    Line(String),
    /// The stream reported a zero-byte read. Carries whatever was buffered.
    EndOfStream(String),
    /// The driver timed out; the partial line stays buffered for the next call.
    Timeout,
}

/// Newline framing over any byte stream.
pub struct LineReader<R> {
    inner: R,
    line: Vec<u8>,
    pending: Vec<u8>,
    chunk: [u8; 64],
}

impl<R: Read> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            line: Vec::new(),
            pending: Vec::new(),
            chunk: [0; 64],
        }
    }

    pub fn read_line(&mut self) -> Result<ReadOutcome, SerialError> {
        loop {
            if let Some(line) = self.take_buffered_line() {
                return Ok(ReadOutcome::Line(line));
            }

            match self.inner.read(&mut self.chunk) {
                Ok(0) => {
                    let partial = trimmed(&self.line);
                    self.line.clear();
                    return Ok(ReadOutcome::EndOfStream(partial));
                }
                Ok(n) => self.pending.extend_from_slice(&self.chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(ReadOutcome::Timeout),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(SerialError::Read(e)),
            }
        }
    }

    /// Moves pending bytes into the line buffer up to and including the first
    /// newline. Bytes after it stay pending for the next line.
    fn take_buffered_line(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        match self.pending.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                self.line.extend(self.pending.drain(..=pos));
                let line = trimmed(&self.line);
                self.line.clear();
                Some(line)
            }
            None => {
                self.line.append(&mut self.pending);
                None
            }
        }
    }
}

fn trimmed(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}
