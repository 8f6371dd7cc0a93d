use crate::error::{Error, Result};
use crate::jfy::inverter::SerialNumber;

use nom::{
    combinator::map,
    number::complete::{be_i16, be_u16, be_u32},
    IResult,
};
use nom_derive::{Nom, Parse};
use num_enum::{IntoPrimitive, TryFromPrimitive};

pub const HEADER: [u8; 2] = [0xA5, 0xA5];
pub const TRAILER: [u8; 2] = [0x0A, 0x0D];

/// header(2) + source + destination + control + function + length + checksum(2) + trailer(2)
pub const FRAME_OVERHEAD: usize = 11;
pub const MAX_FRAME_LEN: usize = FRAME_OVERHEAD + u8::MAX as usize;

/// Offset of the data length byte within a frame.
pub const LENGTH_OFFSET: usize = 6;
const DATA_OFFSET: usize = 7;

pub const HOST_ADDRESS: u8 = 0x01;
pub const BROADCAST_ADDRESS: u8 = 0x00;
/// Address handed to the inverter during registration.
pub const INVERTER_ADDRESS: u8 = 0x02;

pub const ACK: u8 = 0x06;

/// Payload size of a normal-info reply.
pub const NORMAL_INFO_LEN: usize = 24;
pub const CHANNEL_COUNT: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ControlCode {
    Register = 0x30,
    Read = 0x31,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum FunctionCode {
    OfflineQuery = 0x40,
    SendRegisterAddress = 0x41,
    QueryNormalInfo = 0x42,
    ReRegister = 0x44,

    OfflineQueryReply = 0xC0,
    RegisterAddressReply = 0xC1,
    NormalInfoReply = 0xC2,
}

impl FunctionCode {
    /// Replies carry the request's function code with the high bit set.
    pub fn reply(self) -> Option<FunctionCode> {
        FunctionCode::try_from(u8::from(self) | 0x80).ok()
    }
}

/// Two's complement of the 16-bit sum of `data`, so that summing a frame up
/// to and including its checksum wraps to zero.
pub fn checksum(data: &[u8]) -> u16 {
    data.iter()
        .fold(0u16, |sum, byte| sum.wrapping_add(u16::from(*byte)))
        .wrapping_neg()
}

/////////////
//
// FRAMES
//
/////////////

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub source: u8,
    pub destination: u8,
    pub control: u8,
    pub function: u8,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(
        source: u8,
        destination: u8,
        control: ControlCode,
        function: FunctionCode,
        data: Vec<u8>,
    ) -> Self {
        Self {
            source,
            destination,
            control: control.into(),
            function: function.into(),
            data,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut r = Vec::with_capacity(FRAME_OVERHEAD + self.data.len());

        r.extend_from_slice(&HEADER);
        r.push(self.source);
        r.push(self.destination);
        r.push(self.control);
        r.push(self.function);
        debug_assert!(
            self.data.len() <= u8::MAX as usize,
            "frame data of {} bytes does not fit the length byte",
            self.data.len()
        );
        r.push(self.data.len() as u8);
        r.extend_from_slice(&self.data);
        r.extend_from_slice(&checksum(&r).to_be_bytes());
        r.extend_from_slice(&TRAILER);

        r
    }

    /// Rejects frames that are well-formed but not the reply to `request`.
    fn expect(&self, control: ControlCode, request: FunctionCode) -> Result<()> {
        let function = request.reply().ok_or_else(|| {
            Error::UnexpectedFrame(format!("{:?} is never answered", request))
        })?;

        if self.destination != HOST_ADDRESS {
            return Err(Error::UnexpectedFrame(format!(
                "addressed to {:#04x}, not the host",
                self.destination
            )));
        }
        if self.control != u8::from(control) || self.function != u8::from(function) {
            return Err(Error::UnexpectedFrame(format!(
                "control/function {:#04x}/{:#04x}, expected {:?}/{:?}",
                self.control, self.function, control, function
            )));
        }
        Ok(())
    }
}

pub struct Parser;
impl Parser {
    /// Validates framing only: header, declared length against bytes
    /// received, checksum, trailer.
    pub fn parse(input: &[u8]) -> Result<Frame> {
        let len = input.len();
        if len <= LENGTH_OFFSET {
            return Err(Error::ShortFrame {
                expected: FRAME_OVERHEAD,
                actual: len,
            });
        }

        if input[0..2] != HEADER {
            return Err(Error::UnexpectedFrame(format!(
                "invalid prefix {:02x?}",
                &input[0..2]
            )));
        }

        let data_len = input[LENGTH_OFFSET] as usize;
        let frame_len = FRAME_OVERHEAD + data_len;
        if len < frame_len {
            return Err(Error::ShortFrame {
                expected: frame_len,
                actual: len,
            });
        }
        if len > frame_len {
            return Err(Error::UnexpectedFrame(format!(
                "{} trailing bytes after declared length {}",
                len - frame_len,
                data_len
            )));
        }

        let checksum_offset = DATA_OFFSET + data_len;
        let got = u16::from_be_bytes([input[checksum_offset], input[checksum_offset + 1]]);
        let calculated = checksum(&input[..checksum_offset]);
        if got != calculated {
            return Err(Error::BadChecksum { got, calculated });
        }

        if input[len - 2..] != TRAILER {
            return Err(Error::UnexpectedFrame(format!(
                "invalid trailer {:02x?}",
                &input[len - 2..]
            )));
        }

        Ok(Frame {
            source: input[2],
            destination: input[3],
            control: input[4],
            function: input[5],
            data: input[DATA_OFFSET..checksum_offset].to_vec(),
        })
    }
}

/////////////
//
// REQUESTS
//
/////////////

/// The "current readings" query. Fixed bytes, no device state involved.
pub fn build_poll_request() -> Vec<u8> {
    Frame::new(
        HOST_ADDRESS,
        INVERTER_ADDRESS,
        ControlCode::Read,
        FunctionCode::QueryNormalInfo,
        Vec::new(),
    )
    .to_bytes()
}

/// Tells every inverter on the bus to drop its address. No reply.
pub fn build_re_register() -> Vec<u8> {
    Frame::new(
        HOST_ADDRESS,
        BROADCAST_ADDRESS,
        ControlCode::Register,
        FunctionCode::ReRegister,
        Vec::new(),
    )
    .to_bytes()
}

pub fn build_offline_query() -> Vec<u8> {
    Frame::new(
        HOST_ADDRESS,
        BROADCAST_ADDRESS,
        ControlCode::Register,
        FunctionCode::OfflineQuery,
        Vec::new(),
    )
    .to_bytes()
}

pub fn build_register_address(serial: &SerialNumber) -> Vec<u8> {
    let mut data = serial.to_vec();
    data.push(INVERTER_ADDRESS);

    Frame::new(
        HOST_ADDRESS,
        BROADCAST_ADDRESS,
        ControlCode::Register,
        FunctionCode::SendRegisterAddress,
        data,
    )
    .to_bytes()
}

/////////////
//
// REPLIES
//
/////////////

pub fn parse_serial_number(input: &[u8]) -> Result<SerialNumber> {
    let frame = Parser::parse(input)?;
    frame.expect(ControlCode::Register, FunctionCode::OfflineQuery)?;

    // the serial is echoed back in the register-address request, which
    // must leave room for the address byte
    if frame.data.is_empty() || frame.data.len() >= u8::MAX as usize {
        return Err(Error::UnexpectedFrame(format!(
            "serial number of {} bytes",
            frame.data.len()
        )));
    }

    Ok(SerialNumber::new(&frame.data))
}

pub fn parse_register_ack(input: &[u8]) -> Result<()> {
    let frame = Parser::parse(input)?;
    frame.expect(ControlCode::Register, FunctionCode::SendRegisterAddress)?;

    match frame.data.first() {
        Some(&ACK) => Ok(()),
        other => Err(Error::UnexpectedFrame(format!(
            "register address not acknowledged: {:02x?}",
            other
        ))),
    }
}

/// Decodes a normal-info reply. Either every channel decodes and passes its
/// range check, or the whole frame is rejected.
pub fn parse_response(input: &[u8]) -> Result<Reading> {
    let frame = Parser::parse(input)?;
    frame.expect(ControlCode::Read, FunctionCode::QueryNormalInfo)?;

    if frame.source != INVERTER_ADDRESS {
        return Err(Error::UnexpectedFrame(format!(
            "reply from {:#04x}, expected {:#04x}",
            frame.source, INVERTER_ADDRESS
        )));
    }

    if frame.data.len() < NORMAL_INFO_LEN {
        return Err(Error::ShortFrame {
            expected: FRAME_OVERHEAD + NORMAL_INFO_LEN,
            actual: input.len(),
        });
    }
    if frame.data.len() > NORMAL_INFO_LEN {
        return Err(Error::UnexpectedFrame(format!(
            "normal info payload of {} bytes, expected {}",
            frame.data.len(),
            NORMAL_INFO_LEN
        )));
    }

    let (_, reading) = Reading::parse(frame.data.as_slice())
        .map_err(|err| Error::UnexpectedFrame(format!("undecodable payload: {:?}", err)))?;
    reading.validate()?;

    Ok(reading)
}

// {{{ Reading
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Channel {
    pub name: &'static str,
    pub unit: &'static str,
    pub min: f64,
    pub max: f64,
}

/// One poll's worth of telemetry. Field order is the wire order.
#[derive(PartialEq, Clone, Copy, Debug, Nom)]
#[nom(BigEndian)]
pub struct Reading {
    #[nom(Parse = "Utils::be_i16_div10")]
    pub temperature: f64,
    #[nom(Parse = "Utils::be_u16_div100")]
    pub energy_today: f64,
    #[nom(Parse = "Utils::be_u16_div10")]
    pub pv_voltage: f64,
    #[nom(Parse = "Utils::be_u16_div10")]
    pub pv_current: f64,
    #[nom(Parse = "Utils::be_u16_div10")]
    pub grid_voltage: f64,
    #[nom(Parse = "Utils::be_u16_div100")]
    pub grid_frequency: f64,
    #[nom(Parse = "Utils::be_u16_div10")]
    pub grid_current: f64,
    #[nom(Parse = "Utils::be_u16_f64")]
    pub output_power: f64,
    #[nom(Parse = "Utils::be_u32_div10")]
    pub energy_total: f64,
    #[nom(Parse = "Utils::be_u32_div10")]
    pub operating_hours: f64,
}

impl Reading {
    pub const CHANNELS: [Channel; CHANNEL_COUNT] = [
        Channel { name: "temperature", unit: "°C", min: -40.0, max: 120.0 },
        Channel { name: "energy_today", unit: "kWh", min: 0.0, max: 300.0 },
        Channel { name: "pv_voltage", unit: "V", min: 0.0, max: 1000.0 },
        Channel { name: "pv_current", unit: "A", min: 0.0, max: 100.0 },
        Channel { name: "grid_voltage", unit: "V", min: 0.0, max: 500.0 },
        Channel { name: "grid_frequency", unit: "Hz", min: 0.0, max: 70.0 },
        Channel { name: "grid_current", unit: "A", min: 0.0, max: 100.0 },
        Channel { name: "output_power", unit: "W", min: 0.0, max: 20_000.0 },
        Channel { name: "energy_total", unit: "kWh", min: 0.0, max: 10_000_000.0 },
        Channel { name: "operating_hours", unit: "h", min: 0.0, max: 1_000_000.0 },
    ];

    /// Channel values in wire order, matching `CHANNELS`.
    pub fn values(&self) -> [f64; CHANNEL_COUNT] {
        // no `..` here: a new field must be placed in the output explicitly
        let Reading {
            temperature,
            energy_today,
            pv_voltage,
            pv_current,
            grid_voltage,
            grid_frequency,
            grid_current,
            output_power,
            energy_total,
            operating_hours,
        } = *self;

        [
            temperature,
            energy_today,
            pv_voltage,
            pv_current,
            grid_voltage,
            grid_frequency,
            grid_current,
            output_power,
            energy_total,
            operating_hours,
        ]
    }

    pub fn validate(&self) -> Result<()> {
        for (channel, value) in Self::CHANNELS.iter().zip(self.values()) {
            if !value.is_finite() || value < channel.min || value > channel.max {
                return Err(Error::OutOfRange {
                    channel: channel.name,
                    value,
                    min: channel.min,
                    max: channel.max,
                });
            }
        }
        Ok(())
    }
} // }}}

struct Utils;
impl Utils {
    fn be_i16_div10(input: &[u8]) -> IResult<&[u8], f64> {
        map(be_i16, |v| f64::from(v) / 10.0)(input)
    }

    fn be_u16_f64(input: &[u8]) -> IResult<&[u8], f64> {
        map(be_u16, f64::from)(input)
    }

    fn be_u16_div10(input: &[u8]) -> IResult<&[u8], f64> {
        map(be_u16, |v| f64::from(v) / 10.0)(input)
    }

    fn be_u16_div100(input: &[u8]) -> IResult<&[u8], f64> {
        map(be_u16, |v| f64::from(v) / 100.0)(input)
    }

    fn be_u32_div10(input: &[u8]) -> IResult<&[u8], f64> {
        map(be_u32, |v| f64::from(v) / 10.0)(input)
    }
}
