use crate::unixtime::TimestampFormat;

use clap::Parser;

/// Suntwins Logger - polls a JFY Suntwins inverter and appends readings to a file
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Options {
    /// Optional YAML config file; command line values override it
    #[clap(short = 'c', long = "config")]
    pub config_file: Option<String>,

    /// Serial port [default: /dev/ttyUSB0]
    #[clap(short = 'p', long = "port")]
    pub port: Option<String>,

    /// File to store output data [default: /tmp/suntwins.csv]
    #[clap(short = 'f', long = "file")]
    pub datalog_file: Option<String>,

    /// Enable debug messages
    #[clap(short = 'd', long = "debug")]
    pub debug: bool,

    /// Seconds between polls [default: 1]
    #[clap(long = "period")]
    pub poll_period_secs: Option<f64>,

    /// How long to wait for each reply, in milliseconds [default: 500]
    #[clap(long = "read-timeout-ms")]
    pub read_timeout_ms: Option<u64>,

    /// Timestamp written at the start of each line [default: unix]
    #[clap(long = "timestamp-format", value_enum)]
    pub timestamp_format: Option<TimestampFormat>,

    /// Optional runtime limit in seconds
    #[clap(short = 't', long = "time")]
    pub runtime: Option<u64>,
}

impl Options {
    pub fn new() -> Self {
        Self::parse()
    }
}
