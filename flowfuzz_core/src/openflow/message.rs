use super::flow::{Match, OfAction, OfInstruction, actions_len, encode_actions};
use super::wire::{Reader, WireWrite, pad8, wire_len};
use super::{DecodeError, HEADER_LEN, MessageType, OfVersion, peek_header};

pub const HELLO_ELEM_VERSIONBITMAP: u16 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelloElement {
    VersionBitmap { bitmaps: Vec<u32> },
    Other { elem_type: u16, data: Vec<u8> },
}

impl HelloElement {
    pub fn elem_type(&self) -> u16 {
        match self {
            HelloElement::VersionBitmap { .. } => HELLO_ELEM_VERSIONBITMAP,
            HelloElement::Other { elem_type, .. } => *elem_type,
        }
    }

    /// Declared length, without the padding that follows the element.
    pub fn length(&self) -> usize {
        match self {
            HelloElement::VersionBitmap { bitmaps } => 4 + 4 * bitmaps.len(),
            HelloElement::Other { data, .. } => 4 + data.len(),
        }
    }

    fn decode_list(bytes: &[u8]) -> Result<Vec<Self>, DecodeError> {
        let mut reader = Reader::new(bytes);
        let mut elements = Vec::new();
        while reader.remaining() > 0 {
            let elem_type = reader.u16()?;
            let length = reader.u16()? as usize;
            if length < 4 {
                return Err(DecodeError::BadLength {
                    what: "hello element",
                    length,
                });
            }
            let body = reader.take(length - 4)?;
            reader.skip(pad8(length))?;
            let element = if elem_type == HELLO_ELEM_VERSIONBITMAP && body.len() % 4 == 0 {
                let bitmaps = body
                    .chunks_exact(4)
                    .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                HelloElement::VersionBitmap { bitmaps }
            } else {
                HelloElement::Other {
                    elem_type,
                    data: body.to_vec(),
                }
            };
            elements.push(element);
        }
        Ok(elements)
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<(), DecodeError> {
        out.put_u16(self.elem_type());
        out.put_u16(wire_len("hello element", self.length())?);
        match self {
            HelloElement::VersionBitmap { bitmaps } => {
                bitmaps.iter().for_each(|b| out.put_u32(*b));
            }
            HelloElement::Other { data, .. } => out.extend_from_slice(data),
        }
        out.put_zeros(pad8(self.length()));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketIn {
    pub buffer_id: u32,
    pub total_len: u16,
    pub reason: u8,
    pub table_id: u8,
    pub cookie: u64,
    pub matcher: Match,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketOut {
    pub buffer_id: u32,
    pub in_port: u32,
    pub actions: Vec<OfAction>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowMod {
    pub cookie: u64,
    pub cookie_mask: u64,
    pub table_id: u8,
    pub command: u8,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub priority: u16,
    pub buffer_id: u32,
    pub out_port: u32,
    pub out_group: u32,
    pub flags: u16,
    /// Only meaningful for OpenFlow 1.4; padding in 1.3.
    pub importance: u16,
    pub matcher: Match,
    pub instructions: Vec<OfInstruction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRemoved {
    pub cookie: u64,
    pub priority: u16,
    pub reason: u8,
    pub table_id: u8,
    pub duration_sec: u32,
    pub duration_nsec: u32,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub packet_count: u64,
    pub byte_count: u64,
    pub matcher: Match,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Hello { elements: Vec<HelloElement> },
    Echo { data: Vec<u8> },
    Barrier,
    RoleRequest { role: u32, generation_id: u64 },
    PacketIn(PacketIn),
    PacketOut(PacketOut),
    FlowMod(FlowMod),
    FlowRemoved(FlowRemoved),
    /// Body of a message kind that is not decoded structurally.
    Raw(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfMessage {
    pub version: OfVersion,
    pub msg_type: MessageType,
    pub xid: u32,
    pub body: MessageBody,
}

impl OfMessage {
    /// Decodes exactly one message from the start of `bytes`. Bytes past the declared
    /// length are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let header = peek_header(bytes).ok_or(DecodeError::Truncated {
            offset: 0,
            needed: HEADER_LEN,
            available: bytes.len(),
        })?;
        let version = OfVersion::from_wire(header.version)
            .ok_or(DecodeError::UnknownVersion(header.version))?;
        let msg_type = MessageType::from_wire(version, header.msg_type).ok_or(
            DecodeError::UnknownType {
                version,
                code: header.msg_type,
            },
        )?;
        let length = header.length as usize;
        if length < HEADER_LEN {
            return Err(DecodeError::BadLength {
                what: "message",
                length,
            });
        }
        let body = bytes.get(HEADER_LEN..length).ok_or(DecodeError::Truncated {
            offset: 0,
            needed: length,
            available: bytes.len(),
        })?;

        Ok(Self {
            version,
            msg_type,
            xid: header.xid,
            body: decode_body(version, msg_type, body)?,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, DecodeError> {
        let mut body = Vec::new();
        encode_body(self.version, &self.body, &mut body)?;

        let code = self
            .msg_type
            .code(self.version)
            .ok_or(DecodeError::UnknownType {
                version: self.version,
                code: u8::MAX,
            })?;
        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.put_u8(self.version.wire());
        out.put_u8(code);
        out.put_u16(wire_len("message", HEADER_LEN + body.len())?);
        out.put_u32(self.xid);
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Ethernet frame carried by a packet-in or packet-out, if any.
    pub fn ethernet_payload(&self) -> Option<&[u8]> {
        match &self.body {
            MessageBody::PacketIn(p) => Some(&p.data),
            MessageBody::PacketOut(p) => Some(&p.data),
            _ => None,
        }
    }
}

fn decode_body(
    version: OfVersion,
    msg_type: MessageType,
    body: &[u8],
) -> Result<MessageBody, DecodeError> {
    let mut r = Reader::new(body);
    let structured = version.has_structured_layouts();
    let decoded = match msg_type {
        MessageType::Hello => MessageBody::Hello {
            elements: HelloElement::decode_list(body)?,
        },
        MessageType::EchoRequest | MessageType::EchoReply => MessageBody::Echo {
            data: body.to_vec(),
        },
        MessageType::BarrierRequest | MessageType::BarrierReply if structured => {
            if !body.is_empty() {
                return Err(DecodeError::BadLength {
                    what: "barrier",
                    length: HEADER_LEN + body.len(),
                });
            }
            MessageBody::Barrier
        }
        MessageType::RoleRequest if structured => {
            let role = r.u32()?;
            r.skip(4)?;
            let generation_id = r.u64()?;
            expect_consumed(&r, "role request", body.len())?;
            MessageBody::RoleRequest {
                role,
                generation_id,
            }
        }
        MessageType::PacketIn if structured => {
            let buffer_id = r.u32()?;
            let total_len = r.u16()?;
            let reason = r.u8()?;
            let table_id = r.u8()?;
            let cookie = r.u64()?;
            let matcher = Match::decode(&mut r)?;
            r.skip(2)?;
            MessageBody::PacketIn(PacketIn {
                buffer_id,
                total_len,
                reason,
                table_id,
                cookie,
                matcher,
                data: r.rest().to_vec(),
            })
        }
        MessageType::PacketOut if structured => {
            let buffer_id = r.u32()?;
            let in_port = r.u32()?;
            let declared_actions_len = r.u16()? as usize;
            r.skip(6)?;
            let actions = OfAction::decode_list(r.take(declared_actions_len)?)?;
            MessageBody::PacketOut(PacketOut {
                buffer_id,
                in_port,
                actions,
                data: r.rest().to_vec(),
            })
        }
        MessageType::FlowMod if structured => {
            let flow_mod = FlowMod {
                cookie: r.u64()?,
                cookie_mask: r.u64()?,
                table_id: r.u8()?,
                command: r.u8()?,
                idle_timeout: r.u16()?,
                hard_timeout: r.u16()?,
                priority: r.u16()?,
                buffer_id: r.u32()?,
                out_port: r.u32()?,
                out_group: r.u32()?,
                flags: r.u16()?,
                importance: r.u16()?,
                matcher: Match::decode(&mut r)?,
                instructions: OfInstruction::decode_list(r.rest())?,
            };
            MessageBody::FlowMod(flow_mod)
        }
        MessageType::FlowRemoved if structured => {
            let removed = FlowRemoved {
                cookie: r.u64()?,
                priority: r.u16()?,
                reason: r.u8()?,
                table_id: r.u8()?,
                duration_sec: r.u32()?,
                duration_nsec: r.u32()?,
                idle_timeout: r.u16()?,
                hard_timeout: r.u16()?,
                packet_count: r.u64()?,
                byte_count: r.u64()?,
                matcher: Match::decode(&mut r)?,
            };
            expect_consumed(&r, "flow removed", body.len())?;
            MessageBody::FlowRemoved(removed)
        }
        _ => MessageBody::Raw(body.to_vec()),
    };
    Ok(decoded)
}

fn expect_consumed(r: &Reader<'_>, what: &'static str, body_len: usize) -> Result<(), DecodeError> {
    if r.remaining() != 0 {
        return Err(DecodeError::BadLength {
            what,
            length: HEADER_LEN + body_len,
        });
    }
    Ok(())
}

fn encode_body(
    version: OfVersion,
    body: &MessageBody,
    out: &mut Vec<u8>,
) -> Result<(), DecodeError> {
    match body {
        MessageBody::Hello { elements } => {
            for element in elements {
                element.encode(out)?;
            }
        }
        MessageBody::Echo { data } | MessageBody::Raw(data) => out.extend_from_slice(data),
        MessageBody::Barrier => {}
        MessageBody::RoleRequest {
            role,
            generation_id,
        } => {
            out.put_u32(*role);
            out.put_zeros(4);
            out.put_u64(*generation_id);
        }
        MessageBody::PacketIn(p) => {
            out.put_u32(p.buffer_id);
            out.put_u16(p.total_len);
            out.put_u8(p.reason);
            out.put_u8(p.table_id);
            out.put_u64(p.cookie);
            p.matcher.encode(out)?;
            out.put_zeros(2);
            out.extend_from_slice(&p.data);
        }
        MessageBody::PacketOut(p) => {
            out.put_u32(p.buffer_id);
            out.put_u32(p.in_port);
            out.put_u16(wire_len("packet-out actions", actions_len(&p.actions))?);
            out.put_zeros(6);
            encode_actions(&p.actions, out)?;
            out.extend_from_slice(&p.data);
        }
        MessageBody::FlowMod(f) => {
            out.put_u64(f.cookie);
            out.put_u64(f.cookie_mask);
            out.put_u8(f.table_id);
            out.put_u8(f.command);
            out.put_u16(f.idle_timeout);
            out.put_u16(f.hard_timeout);
            out.put_u16(f.priority);
            out.put_u32(f.buffer_id);
            out.put_u32(f.out_port);
            out.put_u32(f.out_group);
            out.put_u16(f.flags);
            let importance = if version == OfVersion::V1_4 { f.importance } else { 0 };
            out.put_u16(importance);
            f.matcher.encode(out)?;
            for instruction in &f.instructions {
                instruction.encode(out)?;
            }
        }
        MessageBody::FlowRemoved(f) => {
            out.put_u64(f.cookie);
            out.put_u16(f.priority);
            out.put_u8(f.reason);
            out.put_u8(f.table_id);
            out.put_u32(f.duration_sec);
            out.put_u32(f.duration_nsec);
            out.put_u16(f.idle_timeout);
            out.put_u16(f.hard_timeout);
            out.put_u64(f.packet_count);
            out.put_u64(f.byte_count);
            f.matcher.encode(out)?;
        }
    }
    Ok(())
}
