pub use anyhow::{anyhow, bail, Result};
pub use log::{debug, error, info, trace, warn};
pub use tokio::sync::broadcast;

pub use crate::config::Config;
pub use crate::coordinator::{Coordinator, PollStats};
pub use crate::datalog_writer::{DatalogWriter, LogRecord};
pub use crate::error::Error;
pub use crate::jfy;
pub use crate::jfy::inverter::{SerialNumber, SerialTransport, Session, Transport};
pub use crate::jfy::packet::Reading;
pub use crate::options::Options;
pub use crate::unixtime::{TimestampFormat, UnixTime};
