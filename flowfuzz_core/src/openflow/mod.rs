//! Structural OpenFlow decoding.
//!
//! Only the layouts needed to locate every field of the fuzzed message kinds are decoded;
//! everything else is carried as opaque bytes.

pub mod flow;
pub mod message;
mod wire;

pub use flow::{Match, OfAction, OfInstruction, Oxm};
pub use message::{FlowMod, FlowRemoved, HelloElement, MessageBody, OfMessage, PacketIn, PacketOut};

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Size of the fixed header shared by every OpenFlow message.
pub const HEADER_LEN: usize = 8;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Buffer truncated: needed {needed} byte(s) at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("Invalid length {length} for {what}")]
    BadLength { what: &'static str, length: usize },
    #[error("Unsupported OpenFlow version byte {0:#04x}")]
    UnknownVersion(u8),
    #[error("Unknown message type {code} for OpenFlow {version}")]
    UnknownType { version: OfVersion, code: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "String")]
pub enum OfVersion {
    V1_0,
    V1_1,
    V1_2,
    V1_3,
    V1_4,
    V1_5,
}

impl OfVersion {
    pub fn wire(self) -> u8 {
        match self {
            OfVersion::V1_0 => 0x01,
            OfVersion::V1_1 => 0x02,
            OfVersion::V1_2 => 0x03,
            OfVersion::V1_3 => 0x04,
            OfVersion::V1_4 => 0x05,
            OfVersion::V1_5 => 0x06,
        }
    }

    pub fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(OfVersion::V1_0),
            0x02 => Some(OfVersion::V1_1),
            0x03 => Some(OfVersion::V1_2),
            0x04 => Some(OfVersion::V1_3),
            0x05 => Some(OfVersion::V1_4),
            0x06 => Some(OfVersion::V1_5),
            _ => None,
        }
    }

    /// Whether packet-in/out, flow-mod, flow-removed and role request bodies are decoded
    /// for this version.
    pub fn has_structured_layouts(self) -> bool {
        matches!(self, OfVersion::V1_3 | OfVersion::V1_4)
    }
}

impl fmt::Display for OfVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            OfVersion::V1_0 => "1.0",
            OfVersion::V1_1 => "1.1",
            OfVersion::V1_2 => "1.2",
            OfVersion::V1_3 => "1.3",
            OfVersion::V1_4 => "1.4",
            OfVersion::V1_5 => "1.5",
        };
        f.write_str(text)
    }
}

impl FromStr for OfVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        let digits = normalized
            .trim_start_matches("OF_")
            .trim_start_matches("OF")
            .replace('.', "");
        match digits.as_str() {
            "10" => Ok(OfVersion::V1_0),
            "11" => Ok(OfVersion::V1_1),
            "12" => Ok(OfVersion::V1_2),
            "13" => Ok(OfVersion::V1_3),
            "14" => Ok(OfVersion::V1_4),
            "15" => Ok(OfVersion::V1_5),
            _ => Err(format!("Unknown OpenFlow version '{s}'")),
        }
    }
}

impl TryFrom<String> for OfVersion {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Hello,
    Error,
    EchoRequest,
    EchoReply,
    Experimenter,
    FeaturesRequest,
    FeaturesReply,
    GetConfigRequest,
    GetConfigReply,
    SetConfig,
    PacketIn,
    FlowRemoved,
    PortStatus,
    PacketOut,
    FlowMod,
    GroupMod,
    PortMod,
    TableMod,
    StatsRequest,
    StatsReply,
    BarrierRequest,
    BarrierReply,
    QueueGetConfigRequest,
    QueueGetConfigReply,
    RoleRequest,
    RoleReply,
    GetAsyncRequest,
    GetAsyncReply,
    SetAsync,
    MeterMod,
    RoleStatus,
    TableStatus,
    RequestForward,
    BundleControl,
    BundleAddMessage,
}

use MessageType as T;

const TYPES_V1_0: [MessageType; 22] = [
    T::Hello,
    T::Error,
    T::EchoRequest,
    T::EchoReply,
    T::Experimenter,
    T::FeaturesRequest,
    T::FeaturesReply,
    T::GetConfigRequest,
    T::GetConfigReply,
    T::SetConfig,
    T::PacketIn,
    T::FlowRemoved,
    T::PortStatus,
    T::PacketOut,
    T::FlowMod,
    T::PortMod,
    T::StatsRequest,
    T::StatsReply,
    T::BarrierRequest,
    T::BarrierReply,
    T::QueueGetConfigRequest,
    T::QueueGetConfigReply,
];

const TYPES_V1_1_PLUS: [MessageType; 35] = [
    T::Hello,
    T::Error,
    T::EchoRequest,
    T::EchoReply,
    T::Experimenter,
    T::FeaturesRequest,
    T::FeaturesReply,
    T::GetConfigRequest,
    T::GetConfigReply,
    T::SetConfig,
    T::PacketIn,
    T::FlowRemoved,
    T::PortStatus,
    T::PacketOut,
    T::FlowMod,
    T::GroupMod,
    T::PortMod,
    T::TableMod,
    T::StatsRequest,
    T::StatsReply,
    T::BarrierRequest,
    T::BarrierReply,
    T::QueueGetConfigRequest,
    T::QueueGetConfigReply,
    T::RoleRequest,
    T::RoleReply,
    T::GetAsyncRequest,
    T::GetAsyncReply,
    T::SetAsync,
    T::MeterMod,
    T::RoleStatus,
    T::TableStatus,
    T::RequestForward,
    T::BundleControl,
    T::BundleAddMessage,
];

fn type_table(version: OfVersion) -> &'static [MessageType] {
    match version {
        OfVersion::V1_0 => &TYPES_V1_0,
        _ => &TYPES_V1_1_PLUS,
    }
}

impl MessageType {
    pub fn from_wire(version: OfVersion, code: u8) -> Option<Self> {
        type_table(version).get(code as usize).copied()
    }

    pub fn code(self, version: OfVersion) -> Option<u8> {
        type_table(version)
            .iter()
            .position(|t| *t == self)
            .map(|i| i as u8)
    }

    pub fn name(self) -> &'static str {
        match self {
            T::Hello => "HELLO",
            T::Error => "ERROR",
            T::EchoRequest => "ECHO_REQUEST",
            T::EchoReply => "ECHO_REPLY",
            T::Experimenter => "EXPERIMENTER",
            T::FeaturesRequest => "FEATURES_REQUEST",
            T::FeaturesReply => "FEATURES_REPLY",
            T::GetConfigRequest => "GET_CONFIG_REQUEST",
            T::GetConfigReply => "GET_CONFIG_REPLY",
            T::SetConfig => "SET_CONFIG",
            T::PacketIn => "PACKET_IN",
            T::FlowRemoved => "FLOW_REMOVED",
            T::PortStatus => "PORT_STATUS",
            T::PacketOut => "PACKET_OUT",
            T::FlowMod => "FLOW_MOD",
            T::GroupMod => "GROUP_MOD",
            T::PortMod => "PORT_MOD",
            T::TableMod => "TABLE_MOD",
            T::StatsRequest => "STATS_REQUEST",
            T::StatsReply => "STATS_REPLY",
            T::BarrierRequest => "BARRIER_REQUEST",
            T::BarrierReply => "BARRIER_REPLY",
            T::QueueGetConfigRequest => "QUEUE_GET_CONFIG_REQUEST",
            T::QueueGetConfigReply => "QUEUE_GET_CONFIG_REPLY",
            T::RoleRequest => "ROLE_REQUEST",
            T::RoleReply => "ROLE_REPLY",
            T::GetAsyncRequest => "GET_ASYNC_REQUEST",
            T::GetAsyncReply => "GET_ASYNC_REPLY",
            T::SetAsync => "SET_ASYNC",
            T::MeterMod => "METER_MOD",
            T::RoleStatus => "ROLE_STATUS",
            T::TableStatus => "TABLE_STATUS",
            T::RequestForward => "REQUESTFORWARD",
            T::BundleControl => "BUNDLE_CONTROL",
            T::BundleAddMessage => "BUNDLE_ADD_MESSAGE",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        let alias = match wanted.to_ascii_uppercase().as_str() {
            "MULTIPART_REQUEST" => Some(T::StatsRequest),
            "MULTIPART_REPLY" => Some(T::StatsReply),
            "VENDOR" => Some(T::Experimenter),
            _ => None,
        };
        alias
            .or_else(|| {
                TYPES_V1_1_PLUS
                    .iter()
                    .find(|t| t.name().eq_ignore_ascii_case(wanted))
                    .copied()
            })
            .ok_or_else(|| format!("Unknown message type '{s}'"))
    }
}

/// Fixed header as read off the wire, before any validation of its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub msg_type: u8,
    pub length: u16,
    pub xid: u32,
}

/// Reads the header at the start of `bytes`, or `None` if fewer than 8 bytes are available.
pub fn peek_header(bytes: &[u8]) -> Option<Header> {
    let head: &[u8; HEADER_LEN] = bytes.get(..HEADER_LEN)?.try_into().ok()?;
    Some(Header {
        version: head[0],
        msg_type: head[1],
        length: u16::from_be_bytes([head[2], head[3]]),
        xid: u32::from_be_bytes([head[4], head[5], head[6], head[7]]),
    })
}
