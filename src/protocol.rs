use crate::error::{DecodeError, Error};
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Arbitration id of unit 0, message type 0. Every BMS12 message lives at
/// `BASE_ID + unit * ID_STRIDE + type`.
pub const BASE_ID: u16 = 300;
/// Identifier distance between two consecutive unit addresses.
pub const ID_STRIDE: u16 = 10;
/// Number of addressable units on one bus.
pub const MAX_UNITS: u8 = 16;
/// Cells monitored by a single BMS12 unit (a BMS24 occupies two addresses).
pub const CELLS_PER_UNIT: u8 = 12;
/// Cell voltages carried by one voltage report frame.
pub const CELLS_PER_REPORT: usize = 4;
/// Temperature sensors per unit.
pub const TEMP_SENSORS: usize = 2;

// Temperatures are transmitted with a +40 offset so the wire value stays unsigned.
const TEMP_OFFSET: i16 = 40;

const MAX_STANDARD_ID: u16 = 0x7FF;
const MAX_PAYLOAD: usize = 8;

const VOLTAGE_PAYLOAD_LEN: usize = 8;
const TEMPERATURE_PAYLOAD_LEN: usize = 2;
const QUERY_PAYLOAD_LEN: usize = 2;
const VERSION_MARKER: u8 = 1;

/// One raw CAN frame: an 11-bit identifier plus up to 8 payload bytes.
///
/// Immutable once constructed; exists only in transit between the transport
/// and [`decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    id: u16,
    data: Vec<u8>,
}

impl Frame {
    pub fn new(id: u16, data: &[u8]) -> Result<Self, DecodeError> {
        if id > MAX_STANDARD_ID {
            return Err(DecodeError::UnknownIdentifier(id as u32));
        }
        if data.len() > MAX_PAYLOAD {
            return Err(DecodeError::MalformedPayload("payload longer than 8 bytes"));
        }
        Ok(Self {
            id,
            data: data.to_vec(),
        })
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// The message-type sub-field of a BMS12 arbitration id (`id % 10`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    /// Host poll request carrying the shunt level.
    Query = 0,
    /// Voltages of cells 1-4.
    Voltages1 = 1,
    /// Voltages of cells 5-8.
    Voltages2 = 2,
    /// Voltages of cells 9-12.
    Voltages3 = 3,
    /// Both temperature sensor readings.
    Temperatures = 4,
    /// Host firmware version request, used as the presence probe.
    VersionRequest = 5,
    /// Firmware version reply, doubles as the presence report.
    VersionReply = 6,
}

impl MsgType {
    /// The full identifier table: type code to message type. Codes 7..=9 are
    /// reserved by the protocol and decode to nothing.
    const TABLE: [(u16, MsgType); 7] = [
        (0, MsgType::Query),
        (1, MsgType::Voltages1),
        (2, MsgType::Voltages2),
        (3, MsgType::Voltages3),
        (4, MsgType::Temperatures),
        (5, MsgType::VersionRequest),
        (6, MsgType::VersionReply),
    ];

    fn from_code(code: u16) -> Option<Self> {
        Self::TABLE
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, t)| *t)
    }
}

/// Splits an arbitration id into its unit address and message type.
///
/// Fails with [`DecodeError::UnknownIdentifier`] for ids outside the BMS12
/// block or with a reserved type code. Every id this accepts carries a unit
/// address in 0..=15 by construction.
pub fn split_id(id: u16) -> Result<(u8, MsgType), DecodeError> {
    let last = BASE_ID + (MAX_UNITS as u16 - 1) * ID_STRIDE + (ID_STRIDE - 1);
    if !(BASE_ID..=last).contains(&id) {
        return Err(DecodeError::UnknownIdentifier(id as u32));
    }
    let offset = id - BASE_ID;
    let unit = (offset / ID_STRIDE) as u8;
    let msg_type = MsgType::from_code(offset % ID_STRIDE)
        .ok_or(DecodeError::UnknownIdentifier(id as u32))?;
    Ok((unit, msg_type))
}

fn request_id(unit: u8, msg_type: MsgType) -> Result<u16, Error> {
    if unit >= MAX_UNITS {
        return Err(Error::UnitNotFound(unit));
    }
    Ok(BASE_ID + unit as u16 * ID_STRIDE + msg_type as u16)
}

/// Firmware version reported by a unit in its version reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// One decoded BMS12 message.
///
/// `Query` and `VersionRequest` are host-to-unit traffic. They decode so a
/// listener sharing the bus with another monitor stays in sync, but carry no
/// unit status and are ignored by the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ProtocolMessage {
    Query {
        unit: u8,
        shunt_millivolts: u16,
    },
    CellVoltageReport {
        unit: u8,
        /// Index of the first of the four reported cells (0, 4 or 8).
        first_cell: u8,
        millivolts: [u16; CELLS_PER_REPORT],
    },
    TemperatureReport {
        unit: u8,
        celsius: [i8; TEMP_SENSORS],
    },
    VersionRequest {
        unit: u8,
    },
    UnitPresenceReport {
        unit: u8,
        version: FirmwareVersion,
    },
}

impl ProtocolMessage {
    /// The unit address this message concerns, always in 0..=15.
    pub fn unit(&self) -> u8 {
        match *self {
            ProtocolMessage::Query { unit, .. }
            | ProtocolMessage::CellVoltageReport { unit, .. }
            | ProtocolMessage::TemperatureReport { unit, .. }
            | ProtocolMessage::VersionRequest { unit }
            | ProtocolMessage::UnitPresenceReport { unit, .. } => unit,
        }
    }
}

fn decode_temperature(raw: u8) -> i8 {
    (raw as i16 - TEMP_OFFSET) as i8
}

/// Maps a raw frame to a typed protocol message. Pure; no state is touched.
pub fn decode(frame: &Frame) -> Result<ProtocolMessage, DecodeError> {
    let (unit, msg_type) = split_id(frame.id())?;
    let data = frame.data();
    let msg = match msg_type {
        MsgType::Query => {
            if data.len() != QUERY_PAYLOAD_LEN {
                return Err(DecodeError::MalformedPayload("query payload must be 2 bytes"));
            }
            ProtocolMessage::Query {
                unit,
                shunt_millivolts: u16::from_be_bytes([data[0], data[1]]),
            }
        }
        MsgType::Voltages1 | MsgType::Voltages2 | MsgType::Voltages3 => {
            if data.len() != VOLTAGE_PAYLOAD_LEN {
                return Err(DecodeError::MalformedPayload(
                    "voltage report payload must be 8 bytes",
                ));
            }
            let mut millivolts = [0u16; CELLS_PER_REPORT];
            for (cell, pair) in millivolts.iter_mut().zip(data.chunks_exact(2)) {
                *cell = u16::from_be_bytes([pair[0], pair[1]]);
            }
            ProtocolMessage::CellVoltageReport {
                unit,
                first_cell: (msg_type as u8 - MsgType::Voltages1 as u8) * CELLS_PER_REPORT as u8,
                millivolts,
            }
        }
        MsgType::Temperatures => {
            if data.len() != TEMPERATURE_PAYLOAD_LEN {
                return Err(DecodeError::MalformedPayload(
                    "temperature report payload must be 2 bytes",
                ));
            }
            ProtocolMessage::TemperatureReport {
                unit,
                celsius: [decode_temperature(data[0]), decode_temperature(data[1])],
            }
        }
        MsgType::VersionRequest => {
            if data.first() != Some(&VERSION_MARKER) {
                return Err(DecodeError::MalformedPayload(
                    "version request marker byte must be 1",
                ));
            }
            ProtocolMessage::VersionRequest { unit }
        }
        MsgType::VersionReply => {
            if data.len() < 4 {
                return Err(DecodeError::MalformedPayload(
                    "version reply payload must be at least 4 bytes",
                ));
            }
            if data[0] != VERSION_MARKER {
                return Err(DecodeError::MalformedPayload(
                    "version reply marker byte must be 1",
                ));
            }
            ProtocolMessage::UnitPresenceReport {
                unit,
                version: FirmwareVersion {
                    major: data[1],
                    minor: data[2],
                    patch: data[3],
                },
            }
        }
    };
    log::trace!("decoded frame id={} as {:?}", frame.id(), msg);
    Ok(msg)
}

/// Encodes the poll request for one unit, carrying the shunt level in
/// millivolts as a big-endian u16. Symmetric to [`decode`] of `Query`.
pub fn query_frame(unit: u8, shunt_millivolts: u16) -> Result<Frame, Error> {
    let id = request_id(unit, MsgType::Query)?;
    Ok(Frame::new(id, &shunt_millivolts.to_be_bytes())?)
}

/// Encodes the firmware version request used to probe a unit for presence.
pub fn version_request_frame(unit: u8) -> Result<Frame, Error> {
    let id = request_id(unit, MsgType::VersionRequest)?;
    Ok(Frame::new(id, &[VERSION_MARKER, 0, 0, 0, 0, 0, 0, 0])?)
}
