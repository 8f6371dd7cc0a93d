use thiserror::Error;

/// Outcome taxonomy for talking to the inverter and persisting its readings.
///
/// Transient errors cost one poll cycle and nothing more; everything else
/// stops the acquisition loop and the process.
#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot open serial device {port}: {reason}")]
    DeviceUnavailable { port: String, reason: String },

    #[error("no response from inverter within {0:?}")]
    Timeout(std::time::Duration),

    #[error("short frame: expected {expected} bytes, got {actual}")]
    ShortFrame { expected: usize, actual: usize },

    #[error("checksum mismatch: frame carries {got:#06x}, calculated {calculated:#06x}")]
    BadChecksum { got: u16, calculated: u16 },

    #[error("{channel} out of range: {value} not within {min}..={max}")]
    OutOfRange {
        channel: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("unexpected frame: {0}")]
    UnexpectedFrame(String),

    #[error("serial I/O failure: {0}")]
    IoFailure(#[source] std::io::Error),

    #[error("cannot write datalog {path}: {source}")]
    WriteFailure {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Whether the acquisition loop should absorb this and try again next period.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_)
                | Error::ShortFrame { .. }
                | Error::BadChecksum { .. }
                | Error::OutOfRange { .. }
                | Error::UnexpectedFrame(_)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
