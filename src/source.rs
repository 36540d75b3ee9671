use crate::config::SourceMode;
use crate::serial::{self, LineReader, ReadOutcome, SerialError, SerialFraming};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::Read;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Upper bound on a single driver read; keeps blocking reads short enough
/// that an aborted publish loop releases the port promptly.
pub const SERIAL_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// What one acquisition produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sample {
    Value(i64),
    /// A line arrived but did not parse as an integer.
    Malformed(String),
    /// Nothing arrived within the driver read timeout.
    Idle,
    /// The underlying stream ended with nothing usable buffered.
    Exhausted,
}

/// A blocking producer of telemetry samples. Called from the blocking pool,
/// one call at a time.
pub trait SampleSource: Send + 'static {
    fn next_sample(&mut self) -> Result<Sample, SerialError>;

    fn describe(&self) -> String;
}

impl<S: SampleSource + ?Sized> SampleSource for Box<S> {
    fn next_sample(&mut self) -> Result<Sample, SerialError> {
        (**self).next_sample()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Builds the sample source selected by `mode`. `port` skips discovery.
pub fn open_source(
    mode: SourceMode,
    port: Option<&str>,
) -> Result<Box<dyn SampleSource>, SerialError> {
    match mode {
        SourceMode::Synthetic => Ok(Box::new(SyntheticSource::new())),
        SourceMode::Serial => open_serial(port),
        SourceMode::Auto => match open_serial(port) {
            Err(SerialError::NoDeviceFound) => {
                warn!("No serial device found, falling back to synthetic samples.");
                Ok(Box::new(SyntheticSource::new()))
            }
            other => other,
        },
    }
}

fn open_serial(port: Option<&str>) -> Result<Box<dyn SampleSource>, SerialError> {
    let device = match port {
        Some(port) => port.to_string(),
        None => serial::discover()?.port_name,
    };
    info!("Using serial device {}.", device);
    let stream = serial::open(&device, SerialFraming::default(), SERIAL_READ_TIMEOUT)?;
    Ok(Box::new(SerialSource::new(device, stream)))
}

/// Integers read line by line from a byte stream, usually a serial port.
pub struct SerialSource<R> {
    device: String,
    reader: LineReader<R>,
}

impl<R: Read + Send + 'static> SerialSource<R> {
    pub fn new(device: impl Into<String>, stream: R) -> Self {
        Self {
            device: device.into(),
            reader: LineReader::new(stream),
        }
    }
}

impl<R: Read + Send + 'static> SampleSource for SerialSource<R> {
    fn next_sample(&mut self) -> Result<Sample, SerialError> {
        match self.reader.read_line()? {
            ReadOutcome::Line(line) => Ok(parse_line(line)),
            ReadOutcome::EndOfStream(partial) if partial.is_empty() => {
                warn!("Serial device {} reported end of stream.", self.device);
                Ok(Sample::Exhausted)
            }
            ReadOutcome::EndOfStream(partial) => Ok(parse_line(partial)),
            ReadOutcome::Timeout => {
                debug!("No data from {} yet.", self.device);
                Ok(Sample::Idle)
            }
        }
    }

    fn describe(&self) -> String {
        format!("serial:{}", self.device)
    }
}

fn parse_line(line: String) -> Sample {
    match line.parse::<i64>() {
        Ok(value) => Sample::Value(value),
        Err(_) => Sample::Malformed(line),
    }
}

/// Uniform random values in `0..100` for running without hardware.
pub struct SyntheticSource {
    rng: StdRng,
}

impl SyntheticSource {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleSource for SyntheticSource {
    fn next_sample(&mut self) -> Result<Sample, SerialError> {
        Ok(Sample::Value(self.rng.gen_range(0..100)))
    }

    fn describe(&self) -> String {
        "synthetic".to_string()
    }
}
