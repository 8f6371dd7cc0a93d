#![allow(dead_code)]

use suntwins_logger::error::{Error, Result};
use suntwins_logger::jfy::packet::{
    ControlCode, Frame, FunctionCode, ACK, BROADCAST_ADDRESS, HOST_ADDRESS, INVERTER_ADDRESS,
};
use suntwins_logger::prelude::{Config, Reading, Transport};

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

pub const SERIAL: &[u8] = b"1234567890ABCDEF";

/// Captured normal-info reply: 47.7°C, 19.29kWh today, 254.0V/6.7A PV,
/// 244.9V/49.97Hz/4.7A grid, 1731W, 41.0kWh total, 1790.8h.
pub const NORMAL_INFO_REPLY: [u8; 35] = [
    0xA5, 0xA5, 0x02, 0x01, 0x31, 0xC2, 0x18, 0x01, 0xDD, 0x07, 0x89, 0x09, 0xEC, 0x00, 0x43,
    0x09, 0x91, 0x13, 0x85, 0x00, 0x2F, 0x06, 0xC3, 0x00, 0x00, 0x01, 0x9A, 0x00, 0x00, 0x45,
    0xF4, 0xF7, 0x04, 0x0A, 0x0D,
];

pub struct Factory;
impl Factory {
    pub fn reading() -> Reading {
        Reading {
            temperature: 47.7,
            energy_today: 19.29,
            pv_voltage: 254.0,
            pv_current: 6.7,
            grid_voltage: 244.9,
            grid_frequency: 49.97,
            grid_current: 4.7,
            output_power: 1731.0,
            energy_total: 41.0,
            operating_hours: 1790.8,
        }
    }

    pub fn night_reading() -> Reading {
        Reading {
            temperature: -3.5,
            energy_today: 0.0,
            pv_voltage: 0.0,
            pv_current: 0.0,
            grid_voltage: 239.1,
            grid_frequency: 50.02,
            grid_current: 0.0,
            output_power: 0.0,
            energy_total: 98765.4,
            operating_hours: 43210.9,
        }
    }

    pub fn config(datalog_file: &str) -> Config {
        Config {
            datalog_file: datalog_file.to_string(),
            poll_period_secs: 0.05,
            read_timeout_ms: 20,
            ..Config::default()
        }
    }
}

/// Test-only encoder: the inverter's side of a normal-info reply.
pub fn encode_reading(reading: &Reading) -> Vec<u8> {
    let mut data = Vec::with_capacity(24);
    data.extend_from_slice(&((reading.temperature * 10.0).round() as i16).to_be_bytes());
    data.extend_from_slice(&((reading.energy_today * 100.0).round() as u16).to_be_bytes());
    data.extend_from_slice(&((reading.pv_voltage * 10.0).round() as u16).to_be_bytes());
    data.extend_from_slice(&((reading.pv_current * 10.0).round() as u16).to_be_bytes());
    data.extend_from_slice(&((reading.grid_voltage * 10.0).round() as u16).to_be_bytes());
    data.extend_from_slice(&((reading.grid_frequency * 100.0).round() as u16).to_be_bytes());
    data.extend_from_slice(&((reading.grid_current * 10.0).round() as u16).to_be_bytes());
    data.extend_from_slice(&(reading.output_power.round() as u16).to_be_bytes());
    data.extend_from_slice(&((reading.energy_total * 10.0).round() as u32).to_be_bytes());
    data.extend_from_slice(&((reading.operating_hours * 10.0).round() as u32).to_be_bytes());

    normal_info_reply(data)
}

pub fn normal_info_reply(data: Vec<u8>) -> Vec<u8> {
    Frame::new(
        INVERTER_ADDRESS,
        HOST_ADDRESS,
        ControlCode::Read,
        FunctionCode::NormalInfoReply,
        data,
    )
    .to_bytes()
}

pub fn serial_number_reply() -> Vec<u8> {
    Frame::new(
        BROADCAST_ADDRESS,
        HOST_ADDRESS,
        ControlCode::Register,
        FunctionCode::OfflineQueryReply,
        SERIAL.to_vec(),
    )
    .to_bytes()
}

pub fn register_ack_reply() -> Vec<u8> {
    Frame::new(
        INVERTER_ADDRESS,
        HOST_ADDRESS,
        ControlCode::Register,
        FunctionCode::RegisterAddressReply,
        vec![ACK],
    )
    .to_bytes()
}

/// What the scripted inverter does with one poll request.
#[derive(Clone, Debug)]
pub enum Poll {
    Reply(Reading),
    Raw(Vec<u8>),
    Silence,
    /// Answered only after the read window has closed.
    Late(Reading),
    LinkDown,
}

#[derive(Debug, Default)]
pub struct MockLog {
    pub writes: Vec<Vec<u8>>,
    pub polls: usize,
    pub registrations: usize,
    pub input_clears: usize,
    pub closes: usize,
}

/// A scripted inverter on the other end of the serial line.
///
/// Registration requests are always answered. Poll requests consume the
/// script in order; once it runs out, the mock sends `on_exhausted` (if
/// set) and never answers again.
pub struct MockTransport {
    script: VecDeque<Poll>,
    pending: VecDeque<Vec<u8>>,
    late: Option<Vec<u8>>,
    log: Arc<Mutex<MockLog>>,
    on_exhausted: Option<broadcast::Sender<()>>,
    answer_registration: bool,
    stalled: bool,
}

impl MockTransport {
    pub fn new(script: Vec<Poll>) -> (Self, Arc<Mutex<MockLog>>) {
        let log = Arc::new(Mutex::new(MockLog::default()));
        let transport = Self {
            script: script.into(),
            pending: VecDeque::new(),
            late: None,
            log: log.clone(),
            on_exhausted: None,
            answer_registration: true,
            stalled: false,
        };
        (transport, log)
    }

    pub fn shutdown_when_exhausted(mut self, shutdown_tx: broadcast::Sender<()>) -> Self {
        self.on_exhausted = Some(shutdown_tx);
        self
    }

    pub fn ignore_registration(mut self) -> Self {
        self.answer_registration = false;
        self
    }

    /// Delivers `frame` over two reads, the way a slow line would.
    fn queue_split(&mut self, frame: Vec<u8>) {
        let mid = frame.len() / 2;
        self.pending.push_back(frame[..mid].to_vec());
        self.pending.push_back(frame[mid..].to_vec());
    }
}

fn link_down() -> Error {
    Error::IoFailure(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "device unplugged",
    ))
}

#[async_trait]
impl Transport for MockTransport {
    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.log.lock().unwrap().writes.push(bytes.to_vec());

        match FunctionCode::try_from(bytes[5]) {
            Ok(FunctionCode::ReRegister) => {}
            Ok(FunctionCode::OfflineQuery) => {
                if self.answer_registration {
                    self.queue_split(serial_number_reply());
                }
            }
            Ok(FunctionCode::SendRegisterAddress) => {
                if self.answer_registration {
                    self.log.lock().unwrap().registrations += 1;
                    self.queue_split(register_ack_reply());
                }
            }
            Ok(FunctionCode::QueryNormalInfo) => {
                self.log.lock().unwrap().polls += 1;
                match self.script.pop_front() {
                    Some(Poll::Reply(reading)) => self.queue_split(encode_reading(&reading)),
                    Some(Poll::Raw(raw)) => self.pending.push_back(raw),
                    Some(Poll::Silence) => {}
                    Some(Poll::Late(reading)) => self.late = Some(encode_reading(&reading)),
                    Some(Poll::LinkDown) => return Err(link_down()),
                    None => {
                        self.stalled = true;
                        if let Some(tx) = &self.on_exhausted {
                            let _ = tx.send(());
                        }
                    }
                }
            }
            other => panic!("unexpected request {:?}: {:02X?}", other, bytes),
        }

        Ok(())
    }

    async fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>> {
        if self.stalled {
            std::future::pending::<()>().await;
        }

        match self.pending.pop_front() {
            Some(mut chunk) => {
                if chunk.len() > max_bytes {
                    let rest = chunk.split_off(max_bytes);
                    self.pending.push_front(rest);
                }
                Ok(chunk)
            }
            None => {
                // the late reply lands in the input buffer once the reader gave up
                if let Some(late) = self.late.take() {
                    self.pending.push_back(late);
                }
                Err(Error::Timeout(timeout))
            }
        }
    }

    async fn clear_input(&mut self) -> Result<()> {
        self.log.lock().unwrap().input_clears += 1;
        self.pending.clear();
        self.late = None;
        Ok(())
    }

    async fn close(&mut self) {
        self.log.lock().unwrap().closes += 1;
    }
}

/// Data lines currently in `path`.
pub fn lines(path: &std::path::Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}
