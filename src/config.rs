use crate::options::Options;
use crate::unixtime::TimestampFormat;

use anyhow::{anyhow, bail, Result};
use log::info;
use serde::Deserialize;
use std::time::Duration;

const MAX_POLL_PERIOD_SECS: f64 = 86_400.0;

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "Config::default_port")]
    pub port: String,

    #[serde(default = "Config::default_datalog_file")]
    pub datalog_file: String,

    #[serde(default)]
    pub debug: bool,

    #[serde(default = "Config::default_poll_period_secs")]
    pub poll_period_secs: f64,

    #[serde(default = "Config::default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    #[serde(default)]
    pub timestamp_format: TimestampFormat,

    /// Overrides the level implied by `debug`.
    pub loglevel: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: Self::default_port(),
            datalog_file: Self::default_datalog_file(),
            debug: false,
            poll_period_secs: Self::default_poll_period_secs(),
            read_timeout_ms: Self::default_read_timeout_ms(),
            timestamp_format: TimestampFormat::default(),
            loglevel: None,
        }
    }
}

impl Config {
    pub fn new(file: &str) -> Result<Self> {
        let content = std::fs::read_to_string(file)
            .map_err(|err| anyhow!("error reading {}: {}", file, err))?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        // an empty file is a valid, all-default config
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// The config file named by `options` (if any), with command line
    /// values layered on top, validated.
    pub fn from_options(options: &Options) -> Result<Self> {
        let mut config = match &options.config_file {
            Some(file) => Self::new(file)?,
            None => Self::default(),
        };

        if let Some(port) = &options.port {
            config.port = port.clone();
        }
        if let Some(file) = &options.datalog_file {
            config.datalog_file = file.clone();
        }
        if options.debug {
            config.debug = true;
        }
        if let Some(period) = options.poll_period_secs {
            config.poll_period_secs = period;
        }
        if let Some(timeout) = options.read_timeout_ms {
            config.read_timeout_ms = timeout;
        }
        if let Some(format) = options.timestamp_format {
            config.timestamp_format = format;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.port.is_empty() {
            bail!("serial port cannot be empty");
        }
        if self.datalog_file.is_empty() {
            bail!("datalog file cannot be empty");
        }
        if !self.poll_period_secs.is_finite()
            || self.poll_period_secs <= 0.0
            || self.poll_period_secs > MAX_POLL_PERIOD_SECS
        {
            bail!(
                "poll period must be between 0 and {} seconds, got {}",
                MAX_POLL_PERIOD_SECS,
                self.poll_period_secs
            );
        }
        if self.read_timeout_ms == 0 {
            bail!("read timeout must be greater than 0");
        }
        // a poll must be answered or abandoned before the next one is due
        if self.read_timeout() >= self.poll_period() {
            bail!(
                "read timeout ({}ms) must be shorter than the poll period ({}s)",
                self.read_timeout_ms,
                self.poll_period_secs
            );
        }
        Ok(())
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_secs_f64(self.poll_period_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn loglevel(&self) -> String {
        match &self.loglevel {
            Some(level) => level.clone(),
            None if self.debug => "debug".to_string(),
            None => "info".to_string(),
        }
    }

    pub fn log_summary(&self) {
        info!("Configuration:");
        info!("  Serial port: {}", self.port);
        info!("  Datalog file: {}", self.datalog_file);
        info!("  Poll period: {}s", self.poll_period_secs);
        info!("  Read timeout: {}ms", self.read_timeout_ms);
        info!("  Timestamp format: {:?}", self.timestamp_format);
        info!("  Log level: {}", self.loglevel());
    }

    fn default_port() -> String {
        "/dev/ttyUSB0".to_string()
    }

    fn default_datalog_file() -> String {
        "/tmp/suntwins.csv".to_string()
    }

    fn default_poll_period_secs() -> f64 {
        1.0
    }

    fn default_read_timeout_ms() -> u64 {
        500
    }
}
