//! Wire Messages
//!
//! Request and response payloads of the upload protocol. All multi-byte
//! integers are big-endian. Decoding reads the opcode first, dispatches to a
//! fixed per-opcode decoder and checks the remaining length before every field.

use crate::domain::value_objects::{DataKind, NodeId};
use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::Ipv4Addr;

// =============================================================================
// Opcodes
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Reset = 0x00,
    Ack = 0x01,
    Blocked = 0x02,
    ConfigReply = 0x03,
    Session = 0x10,
    Data = 0x20,
    ConfigQuery = 0x30,
}

impl Opcode {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::Reset),
            0x01 => Some(Self::Ack),
            0x02 => Some(Self::Blocked),
            0x03 => Some(Self::ConfigReply),
            0x10 => Some(Self::Session),
            0x20 => Some(Self::Data),
            0x30 => Some(Self::ConfigQuery),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_request(self) -> bool {
        matches!(self, Self::Session | Self::Data | Self::ConfigQuery)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Reset => "Reset",
            Self::Ack => "Ack",
            Self::Blocked => "Blocked",
            Self::ConfigReply => "ConfigReply",
            Self::Session => "Session",
            Self::Data => "Data",
            Self::ConfigQuery => "ConfigQuery",
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({:#04x})", self.name(), self.as_u8())
    }
}

/// Read the opcode byte of a payload without consuming it.
pub fn peek_opcode(payload: &[u8]) -> Result<u8, ProtocolError> {
    payload.first().copied().ok_or(ProtocolError::Truncated {
        field: "opcode",
        needed: 1,
        remaining: 0,
    })
}

fn need(buf: &Bytes, needed: usize, field: &'static str) -> Result<(), ProtocolError> {
    if buf.remaining() < needed {
        return Err(ProtocolError::Truncated {
            field,
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

fn finish(buf: &Bytes, opcode: Opcode) -> Result<(), ProtocolError> {
    if buf.has_remaining() {
        return Err(ProtocolError::TrailingBytes {
            opcode: opcode.as_u8(),
            count: buf.remaining(),
        });
    }
    Ok(())
}

fn get_node_id(buf: &mut Bytes) -> Result<NodeId, ProtocolError> {
    need(buf, NodeId::LEN, "node_id")?;
    let mut id = [0u8; 6];
    buf.copy_to_slice(&mut id);
    Ok(NodeId(id))
}

// =============================================================================
// Requests
// =============================================================================

/// Opens every exchange: device status plus the opcode of the request that follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub node_id: NodeId,
    pub power_level: u8,
    pub memory_usage: u8,
    pub next_opcode: Opcode,
}

/// An upload of one data file.
///
/// When the bytes live on disk, `data` is empty and the engine streams the
/// file after the header produced by [`DataRequest::encode_header`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRequest {
    pub node_id: NodeId,
    pub timestamp: u64,
    pub data_kind: DataKind,
    pub data: Bytes,
}

impl DataRequest {
    /// opcode + node_id + timestamp + data_kind + data_length
    pub const HEADER_LEN: usize = 1 + 6 + 8 + 1 + 4;

    pub fn new(node_id: NodeId, timestamp: u64, data_kind: DataKind) -> Self {
        Self {
            node_id,
            timestamp,
            data_kind,
            data: Bytes::new(),
        }
    }

    /// Encode everything up to and including `data_length`.
    pub fn encode_header(&self, data_length: u32) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::HEADER_LEN);
        buf.put_u8(Opcode::Data.as_u8());
        buf.put_slice(self.node_id.as_bytes());
        buf.put_u64(self.timestamp);
        buf.put_u8(self.data_kind.as_u8());
        buf.put_u32(data_length);
        buf.freeze()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Session(SessionRequest),
    Data(DataRequest),
    ConfigQuery { node_id: NodeId },
}

impl Request {
    pub fn opcode(&self) -> Opcode {
        match self {
            Request::Session(_) => Opcode::Session,
            Request::Data(_) => Opcode::Data,
            Request::ConfigQuery { .. } => Opcode::ConfigQuery,
        }
    }

    /// Encode the payload (without the frame length prefix).
    pub fn encode(&self) -> Bytes {
        match self {
            Request::Session(s) => {
                let mut buf = BytesMut::with_capacity(10);
                buf.put_u8(Opcode::Session.as_u8());
                buf.put_slice(s.node_id.as_bytes());
                buf.put_u8(s.power_level);
                buf.put_u8(s.memory_usage);
                buf.put_u8(s.next_opcode.as_u8());
                buf.freeze()
            }
            Request::Data(d) => {
                let mut buf = BytesMut::with_capacity(DataRequest::HEADER_LEN + d.data.len());
                buf.put_slice(&d.encode_header(d.data.len() as u32));
                buf.put_slice(&d.data);
                buf.freeze()
            }
            Request::ConfigQuery { node_id } => {
                let mut buf = BytesMut::with_capacity(7);
                buf.put_u8(Opcode::ConfigQuery.as_u8());
                buf.put_slice(node_id.as_bytes());
                buf.freeze()
            }
        }
    }

    pub fn decode(mut payload: Bytes) -> Result<Self, ProtocolError> {
        need(&payload, 1, "opcode")?;
        let raw = payload.get_u8();
        let opcode = Opcode::from_u8(raw).ok_or(ProtocolError::UnknownOpcode(raw))?;

        let request = match opcode {
            Opcode::Session => {
                let node_id = get_node_id(&mut payload)?;
                need(&payload, 3, "session.status")?;
                let power_level = payload.get_u8();
                let memory_usage = payload.get_u8();
                let next = payload.get_u8();
                let next_opcode = Opcode::from_u8(next).ok_or(ProtocolError::UnknownOpcode(next))?;
                Request::Session(SessionRequest {
                    node_id,
                    power_level,
                    memory_usage,
                    next_opcode,
                })
            }
            Opcode::Data => {
                let node_id = get_node_id(&mut payload)?;
                need(&payload, 8 + 1 + 4, "data.header")?;
                let timestamp = payload.get_u64();
                let kind = payload.get_u8();
                let data_kind = DataKind::from_u8(kind).ok_or(ProtocolError::UnknownDataKind(kind))?;
                let data_length = payload.get_u32() as usize;
                need(&payload, data_length, "data.data")?;
                let data = payload.split_to(data_length);
                Request::Data(DataRequest {
                    node_id,
                    timestamp,
                    data_kind,
                    data,
                })
            }
            Opcode::ConfigQuery => Request::ConfigQuery {
                node_id: get_node_id(&mut payload)?,
            },
            other => return Err(ProtocolError::UnknownOpcode(other.as_u8())),
        };

        finish(&payload, opcode)?;
        Ok(request)
    }
}

// =============================================================================
// Responses
// =============================================================================

/// Directory refresh sent in answer to a `ConfigQuery`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigReply {
    /// Seconds from now until the next bulk-send window
    pub next_timeslot_in: u64,
    pub addresses: Vec<Ipv4Addr>,
}

impl ConfigReply {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + 8 + 2 + self.addresses.len() * 4);
        buf.put_u8(Opcode::ConfigReply.as_u8());
        buf.put_u64(self.next_timeslot_in);
        buf.put_u16(self.addresses.len() as u16);
        for addr in &self.addresses {
            buf.put_slice(&addr.octets());
        }
        buf.freeze()
    }

    /// Decode a full payload, opcode included.
    pub fn decode(mut payload: Bytes) -> Result<Self, ProtocolError> {
        need(&payload, 1, "opcode")?;
        let raw = payload.get_u8();
        if raw != Opcode::ConfigReply.as_u8() {
            return Err(ProtocolError::UnexpectedResponse {
                opcode: raw,
                request: Opcode::ConfigQuery.as_u8(),
            });
        }
        let reply = Self::decode_body(&mut payload)?;
        finish(&payload, Opcode::ConfigReply)?;
        Ok(reply)
    }

    fn decode_body(payload: &mut Bytes) -> Result<Self, ProtocolError> {
        need(payload, 8, "config_reply.next_timeslot_in")?;
        let next_timeslot_in = payload.get_u64();
        need(payload, 2, "config_reply.endpoint_count")?;
        let count = payload.get_u16() as usize;
        need(payload, count * 4, "config_reply.endpoints")?;

        let addresses = (0..count)
            .map(|_| Ipv4Addr::new(payload.get_u8(), payload.get_u8(), payload.get_u8(), payload.get_u8()))
            .collect();

        Ok(Self {
            next_timeslot_in,
            addresses,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ack,
    Reset,
    Blocked { expected_busy_seconds: i16 },
    ConfigReply(ConfigReply),
}

impl Response {
    pub fn opcode(&self) -> Opcode {
        match self {
            Response::Ack => Opcode::Ack,
            Response::Reset => Opcode::Reset,
            Response::Blocked { .. } => Opcode::Blocked,
            Response::ConfigReply(_) => Opcode::ConfigReply,
        }
    }

    pub fn encode(&self) -> Bytes {
        match self {
            Response::Ack => Bytes::from_static(&[Opcode::Ack as u8]),
            Response::Reset => Bytes::from_static(&[Opcode::Reset as u8]),
            Response::Blocked {
                expected_busy_seconds,
            } => {
                let mut buf = BytesMut::with_capacity(3);
                buf.put_u8(Opcode::Blocked.as_u8());
                buf.put_i16(*expected_busy_seconds);
                buf.freeze()
            }
            Response::ConfigReply(reply) => reply.encode(),
        }
    }

    pub fn decode(mut payload: Bytes) -> Result<Self, ProtocolError> {
        need(&payload, 1, "opcode")?;
        let raw = payload.get_u8();
        let opcode = Opcode::from_u8(raw).ok_or(ProtocolError::UnknownOpcode(raw))?;

        let response = match opcode {
            Opcode::Ack => Response::Ack,
            Opcode::Reset => Response::Reset,
            Opcode::Blocked => {
                need(&payload, 2, "blocked.expected_busy_seconds")?;
                Response::Blocked {
                    expected_busy_seconds: payload.get_i16(),
                }
            }
            Opcode::ConfigReply => Response::ConfigReply(ConfigReply::decode_body(&mut payload)?),
            other => return Err(ProtocolError::UnknownOpcode(other.as_u8())),
        };

        finish(&payload, opcode)?;
        Ok(response)
    }
}
