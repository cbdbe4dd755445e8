//! Modbus TCP framing for the subset of the protocol the meter speaks.
//!
//! ADU layout:
//! - 2 bytes: transaction id (echoed back)
//! - 2 bytes: protocol id, always 0
//! - 2 bytes: length of unit id + PDU
//! - 1 byte: unit id (echoed back)
//! - N bytes: PDU, function code first
//!
//! All multi-byte fields are big-endian.

use crate::device_identity::DeviceIdentification;
use crate::error::MeterError;
use thiserror::Error;

pub const MBAP_HEADER_LEN: usize = 7;
pub const MAX_PDU_LEN: usize = 253;
/// Largest register count that fits in one read response
pub const MAX_READ_REGISTERS: u16 = 125;

pub const READ_HOLDING_REGISTERS: u8 = 0x03;
pub const ENCAPSULATED_INTERFACE: u8 = 0x2B;
pub const MEI_READ_DEVICE_ID: u8 = 0x0E;
const EXCEPTION_FLAG: u8 = 0x80;

/// Header problems after which the stream cannot be trusted any more
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("unknown protocol id {0}")]
    InvalidProtocol(u16),

    #[error("invalid MBAP length {0}")]
    InvalidLength(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub transaction_id: u16,
    pub protocol_id: u16,
    pub length: u16,
    pub unit_id: u8,
}

impl Header {
    pub fn parse(bytes: &[u8; MBAP_HEADER_LEN]) -> Result<Self, FrameError> {
        let header = Self {
            transaction_id: u16::from_be_bytes([bytes[0], bytes[1]]),
            protocol_id: u16::from_be_bytes([bytes[2], bytes[3]]),
            length: u16::from_be_bytes([bytes[4], bytes[5]]),
            unit_id: bytes[6],
        };
        if header.protocol_id != 0 {
            return Err(FrameError::InvalidProtocol(header.protocol_id));
        }
        // Unit id plus at least a function code, at most a full PDU
        if header.length < 2 || header.length as usize > MAX_PDU_LEN + 1 {
            return Err(FrameError::InvalidLength(header.length));
        }
        Ok(header)
    }

    /// Number of PDU bytes following the header
    pub fn pdu_len(&self) -> usize {
        self.length as usize - 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
}

impl From<&MeterError> for ExceptionCode {
    fn from(err: &MeterError) -> Self {
        match err {
            MeterError::OutOfRange { .. } => ExceptionCode::IllegalDataAddress,
            MeterError::UnsupportedOperation(_) => ExceptionCode::IllegalFunction,
            _ => ExceptionCode::ServerDeviceFailure,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ReadHoldingRegisters { start: u16, count: u16 },
    ReadDeviceIdentification { code: u8, object_id: u8 },
    Unsupported(u8),
}

impl Request {
    pub fn parse(pdu: &[u8]) -> Result<Self, ExceptionCode> {
        let (&function, body) = pdu.split_first().ok_or(ExceptionCode::IllegalDataValue)?;
        match function {
            READ_HOLDING_REGISTERS => {
                let [s0, s1, c0, c1] = body else {
                    return Err(ExceptionCode::IllegalDataValue);
                };
                Ok(Request::ReadHoldingRegisters {
                    start: u16::from_be_bytes([*s0, *s1]),
                    count: u16::from_be_bytes([*c0, *c1]),
                })
            }
            ENCAPSULATED_INTERFACE => match body {
                [MEI_READ_DEVICE_ID, code, object_id] => Ok(Request::ReadDeviceIdentification {
                    code: *code,
                    object_id: *object_id,
                }),
                [MEI_READ_DEVICE_ID, ..] => Err(ExceptionCode::IllegalDataValue),
                _ => Err(ExceptionCode::IllegalFunction),
            },
            other => Ok(Request::Unsupported(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    ReadHoldingRegisters(Vec<u16>),
    ReadDeviceIdentification(DeviceIdentification),
}

impl Response {
    pub fn function(&self) -> u8 {
        match self {
            Response::ReadHoldingRegisters(_) => READ_HOLDING_REGISTERS,
            Response::ReadDeviceIdentification(_) => ENCAPSULATED_INTERFACE,
        }
    }

    pub fn to_pdu(&self) -> Vec<u8> {
        match self {
            Response::ReadHoldingRegisters(values) => {
                let mut pdu = Vec::with_capacity(2 + values.len() * 2);
                pdu.push(READ_HOLDING_REGISTERS);
                pdu.push((values.len() * 2) as u8);
                for value in values {
                    pdu.extend_from_slice(&value.to_be_bytes());
                }
                pdu
            }
            Response::ReadDeviceIdentification(identification) => identification.to_pdu(),
        }
    }
}

fn frame(header: &Header, pdu: &[u8]) -> Vec<u8> {
    let mut adu = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());
    adu.extend_from_slice(&header.transaction_id.to_be_bytes());
    adu.extend_from_slice(&0u16.to_be_bytes());
    adu.extend_from_slice(&(pdu.len() as u16 + 1).to_be_bytes());
    adu.push(header.unit_id);
    adu.extend_from_slice(pdu);
    adu
}

pub fn encode_response(header: &Header, response: &Response) -> Vec<u8> {
    frame(header, &response.to_pdu())
}

pub fn encode_exception(header: &Header, function: u8, code: ExceptionCode) -> Vec<u8> {
    frame(header, &[function | EXCEPTION_FLAG, code as u8])
}
