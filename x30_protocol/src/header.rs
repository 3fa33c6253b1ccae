use strum::{Display, EnumString};

use crate::error::{ProtocolError, Result};

pub const SYNC_BYTES: [u8; 4] = [0xAA, 0x55, 0xAA, 0x55];
pub const HEADER_LEN: usize = 16;

/// Wire identifier carried in the header, not the handful of states the
/// navigation procedure moves through.
#[derive(Clone, Copy, Debug, Display, EnumString, Eq, PartialEq, Hash)]
pub enum MessageType {
    NavigationTaskRequest,
    CancelTaskRequest,
    QueryStatusRequest,
    GetRealTimeStatusRequest,
    NavigationTaskResponse,
    CancelTaskResponse,
    QueryStatusResponse,
    GetRealTimeStatusResponse,
    /// Synthetic marker pushed onto the message queue, never seen on the wire.
    ProcedureReset,
}

impl MessageType {
    pub const fn wire_value(self) -> u16 {
        match self {
            MessageType::NavigationTaskRequest => 1003,
            MessageType::CancelTaskRequest => 1004,
            MessageType::QueryStatusRequest => 1007,
            MessageType::GetRealTimeStatusRequest => 1002,
            MessageType::NavigationTaskResponse => 2003,
            MessageType::CancelTaskResponse => 2004,
            MessageType::QueryStatusResponse => 2007,
            MessageType::GetRealTimeStatusResponse => 2002,
            MessageType::ProcedureReset => 0,
        }
    }

    pub fn from_wire_value(value: u16) -> Result<Self> {
        Ok(match value {
            1003 => MessageType::NavigationTaskRequest,
            1004 => MessageType::CancelTaskRequest,
            1007 => MessageType::QueryStatusRequest,
            1002 => MessageType::GetRealTimeStatusRequest,
            2003 => MessageType::NavigationTaskResponse,
            2004 => MessageType::CancelTaskResponse,
            2007 => MessageType::QueryStatusResponse,
            2002 => MessageType::GetRealTimeStatusResponse,
            other => return Err(ProtocolError::UnknownMessageType(other)),
        })
    }
}

/// Fixed 16-byte frame header: 4 sync bytes, a little-endian body length,
/// a little-endian message id, and 8 reserved bytes the device leaves zeroed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProtocolHeader {
    pub sync: [u8; 4],
    pub length: u16,
    pub message_id: u16,
    pub reserved: [u8; 8],
}

impl ProtocolHeader {
    pub fn new(message_type: MessageType, body_len: u16) -> Self {
        Self {
            sync: SYNC_BYTES,
            length: body_len,
            message_id: message_type.wire_value(),
            reserved: [0; 8],
        }
    }

    pub fn validate_sync_bytes(&self) -> bool {
        self.sync == SYNC_BYTES
    }

    pub fn message_type(&self) -> Result<MessageType> {
        MessageType::from_wire_value(self.message_id)
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&self.sync);
        buf[4..6].copy_from_slice(&self.length.to_le_bytes());
        buf[6..8].copy_from_slice(&self.message_id.to_le_bytes());
        buf[8..16].copy_from_slice(&self.reserved);
        buf
    }

    pub fn decode(buf: &[u8; HEADER_LEN]) -> Self {
        Self {
            sync: [buf[0], buf[1], buf[2], buf[3]],
            length: u16::from_le_bytes([buf[4], buf[5]]),
            message_id: u16::from_le_bytes([buf[6], buf[7]]),
            reserved: buf[8..16].try_into().expect("slice is 8 bytes"),
        }
    }
}
