use crate::error::{Error, Result};
use crate::jfy::packet::Reading;
use crate::unixtime::{TimestampFormat, UnixTime};

use log::{debug, error, info};
use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// A reading paired with the instant it was received.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LogRecord {
    pub captured: UnixTime,
    pub reading: Reading,
}

impl LogRecord {
    pub fn new(captured: UnixTime, reading: Reading) -> Self {
        Self { captured, reading }
    }

    /// `<timestamp>, <ch1>, ..., <chN>, \n` with every channel to three decimals.
    pub fn to_line(&self, format: TimestampFormat) -> String {
        let mut line = format!("{}, ", self.captured.render(format));
        for value in self.reading.values() {
            // writing to a String cannot fail
            let _ = write!(line, "{:.3}, ", value);
        }
        line.push('\n');
        line
    }
}

/// Append-only sink for log records. Never truncates or rewrites what is
/// already in the file.
#[derive(Debug)]
pub struct DatalogWriter {
    file: std::fs::File,
    path: String,
    format: TimestampFormat,
    lines_written: u64,
}

impl DatalogWriter {
    pub fn new(path: &str, format: TimestampFormat) -> Result<Self> {
        info!("Writing results to file '{}'", path);

        let write_failure = |source| Error::WriteFailure {
            path: path.to_string(),
            source,
        };

        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(write_failure)?;
            }
        }

        let mut options = OpenOptions::new();
        options.create(true).append(true);

        // mode only applies when the file is created
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o660);
        }

        let file = match options.open(path) {
            Ok(f) => f,
            Err(e) => {
                error!("Failed to open datalog file {}: {}", path, e);
                return Err(write_failure(e));
            }
        };

        Ok(Self {
            file,
            path: path.to_string(),
            format,
            lines_written: 0,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }

    /// Appends one line and flushes it. Anything short of that is a
    /// `WriteFailure`.
    pub fn append(&mut self, record: &LogRecord) -> Result<()> {
        let line = record.to_line(self.format);

        let written = self
            .file
            .write_all(line.as_bytes())
            .and_then(|_| self.file.flush());

        match written {
            Ok(()) => {
                self.lines_written += 1;
                debug!("{}", line.trim_end());
                Ok(())
            }
            Err(e) => {
                error!("Failed to write to datalog file {}: {}", self.path, e);
                Err(Error::WriteFailure {
                    path: self.path.clone(),
                    source: e,
                })
            }
        }
    }
}
