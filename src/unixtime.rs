use chrono::{DateTime, Local, SecondsFormat, TimeZone, Utc};
use serde::Deserialize;

/// How the capture instant is rendered at the start of each datalog line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TimestampFormat {
    /// Whole seconds since the epoch.
    #[default]
    Unix,
    /// Local time with offset, millisecond precision.
    Rfc3339,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct UnixTime(pub DateTime<Utc>);

impl UnixTime {
    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub fn from_timestamp(secs: i64) -> Option<Self> {
        Utc.timestamp_opt(secs, 0).single().map(Self)
    }

    pub fn timestamp(&self) -> i64 {
        self.0.timestamp()
    }

    pub fn render(&self, format: TimestampFormat) -> String {
        match format {
            TimestampFormat::Unix => self.timestamp().to_string(),
            TimestampFormat::Rfc3339 => self
                .0
                .with_timezone(&Local)
                .to_rfc3339_opts(SecondsFormat::Millis, false),
        }
    }
}

impl std::fmt::Display for UnixTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.timestamp())
    }
}
