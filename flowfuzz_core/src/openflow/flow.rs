use super::DecodeError;
use super::wire::{Reader, WireWrite, pad8, wire_len};

pub const OXM_HEADER_LEN: usize = 4;
pub const MATCH_HEADER_LEN: usize = 4;

pub mod action_type {
    pub const OUTPUT: u16 = 0;
    pub const COPY_TTL_OUT: u16 = 11;
    pub const COPY_TTL_IN: u16 = 12;
    pub const SET_MPLS_TTL: u16 = 15;
    pub const DEC_MPLS_TTL: u16 = 16;
    pub const PUSH_VLAN: u16 = 17;
    pub const POP_VLAN: u16 = 18;
    pub const PUSH_MPLS: u16 = 19;
    pub const POP_MPLS: u16 = 20;
    pub const SET_QUEUE: u16 = 21;
    pub const GROUP: u16 = 22;
    pub const SET_NW_TTL: u16 = 23;
    pub const DEC_NW_TTL: u16 = 24;
    pub const SET_FIELD: u16 = 25;
    pub const PUSH_PBB: u16 = 26;
    pub const POP_PBB: u16 = 27;
    pub const EXPERIMENTER: u16 = 0xffff;
}

pub mod instruction_type {
    pub const GOTO_TABLE: u16 = 1;
    pub const WRITE_METADATA: u16 = 2;
    pub const WRITE_ACTIONS: u16 = 3;
    pub const APPLY_ACTIONS: u16 = 4;
    pub const CLEAR_ACTIONS: u16 = 5;
    pub const METER: u16 = 6;
    pub const EXPERIMENTER: u16 = 0xffff;
}

/// One OXM TLV. When `has_mask` is set, `value` holds the value followed by the mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Oxm {
    pub class: u16,
    pub field: u8,
    pub has_mask: bool,
    pub value: Vec<u8>,
}

impl Oxm {
    pub fn wire_len(&self) -> usize {
        OXM_HEADER_LEN + self.value.len()
    }

    pub(crate) fn decode(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let class = reader.u16()?;
        let field_and_mask = reader.u8()?;
        let length = reader.u8()? as usize;
        let value = reader.take(length)?.to_vec();
        Ok(Self {
            class,
            field: field_and_mask >> 1,
            has_mask: field_and_mask & 0x01 != 0,
            value,
        })
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) -> Result<(), DecodeError> {
        let length = u8::try_from(self.value.len()).map_err(|_| DecodeError::BadLength {
            what: "oxm",
            length: self.value.len(),
        })?;
        out.put_u16(self.class);
        out.put_u8((self.field << 1) | u8::from(self.has_mask));
        out.put_u8(length);
        out.extend_from_slice(&self.value);
        Ok(())
    }
}

/// An OXM match. The declared length excludes the trailing padding to 8 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub match_type: u16,
    pub oxms: Vec<Oxm>,
}

impl Default for Match {
    fn default() -> Self {
        Self {
            match_type: 1,
            oxms: Vec::new(),
        }
    }
}

impl Match {
    pub fn length(&self) -> usize {
        MATCH_HEADER_LEN + self.oxms.iter().map(Oxm::wire_len).sum::<usize>()
    }

    pub fn padded_length(&self) -> usize {
        let len = self.length();
        len + pad8(len)
    }

    pub(crate) fn decode(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let match_type = reader.u16()?;
        let length = reader.u16()? as usize;
        if length < MATCH_HEADER_LEN {
            return Err(DecodeError::BadLength {
                what: "match",
                length,
            });
        }
        let body = reader.take(length - MATCH_HEADER_LEN)?;
        reader.skip(pad8(length))?;

        let mut oxms = Vec::new();
        let mut inner = Reader::new(body);
        while inner.remaining() > 0 {
            oxms.push(Oxm::decode(&mut inner)?);
        }
        Ok(Self { match_type, oxms })
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) -> Result<(), DecodeError> {
        out.put_u16(self.match_type);
        out.put_u16(wire_len("match", self.length())?);
        for oxm in &self.oxms {
            oxm.encode(out)?;
        }
        out.put_zeros(pad8(self.length()));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfAction {
    Output { port: u32, max_len: u16 },
    SetMplsTtl { ttl: u8 },
    /// PUSH_VLAN, PUSH_MPLS, PUSH_PBB and POP_MPLS: an ethertype and two bytes of padding.
    EtherType { action_type: u16, ethertype: u16 },
    SetQueue { queue_id: u32 },
    Group { group_id: u32 },
    SetNwTtl { ttl: u8 },
    SetField { oxm: Oxm },
    /// Actions with no arguments beyond four bytes of padding.
    Bare { action_type: u16 },
    Experimenter { experimenter: u32, data: Vec<u8> },
    Unknown { action_type: u16, body: Vec<u8> },
}

impl OfAction {
    pub fn action_type(&self) -> u16 {
        use action_type::*;
        match self {
            OfAction::Output { .. } => OUTPUT,
            OfAction::SetMplsTtl { .. } => SET_MPLS_TTL,
            OfAction::EtherType { action_type, .. } => *action_type,
            OfAction::SetQueue { .. } => SET_QUEUE,
            OfAction::Group { .. } => GROUP,
            OfAction::SetNwTtl { .. } => SET_NW_TTL,
            OfAction::SetField { .. } => SET_FIELD,
            OfAction::Bare { action_type } => *action_type,
            OfAction::Experimenter { .. } => EXPERIMENTER,
            OfAction::Unknown { action_type, .. } => *action_type,
        }
    }

    /// Length on the wire, type and length fields included.
    pub fn wire_len(&self) -> usize {
        match self {
            OfAction::Output { .. } => 16,
            OfAction::SetField { oxm } => {
                let len = 4 + oxm.wire_len();
                len + pad8(len)
            }
            OfAction::Experimenter { data, .. } => 8 + data.len(),
            OfAction::Unknown { body, .. } => 4 + body.len(),
            _ => 8,
        }
    }

    pub(crate) fn decode_list(bytes: &[u8]) -> Result<Vec<Self>, DecodeError> {
        let mut reader = Reader::new(bytes);
        let mut actions = Vec::new();
        while reader.remaining() > 0 {
            let action_type = reader.u16()?;
            let len = reader.u16()? as usize;
            if len < 8 {
                return Err(DecodeError::BadLength {
                    what: "action",
                    length: len,
                });
            }
            let body = reader.take(len - 4)?;
            let action = Self::decode_body(action_type, body)
                .map_err(short_body("action", len))?;
            if action.wire_len() != len {
                return Err(DecodeError::BadLength {
                    what: "action",
                    length: len,
                });
            }
            actions.push(action);
        }
        Ok(actions)
    }

    fn decode_body(action_type: u16, body: &[u8]) -> Result<Self, DecodeError> {
        use action_type::*;
        let mut r = Reader::new(body);
        let action = match action_type {
            OUTPUT => OfAction::Output {
                port: r.u32()?,
                max_len: r.u16()?,
            },
            SET_MPLS_TTL => OfAction::SetMplsTtl { ttl: r.u8()? },
            PUSH_VLAN | PUSH_MPLS | PUSH_PBB | POP_MPLS => OfAction::EtherType {
                action_type,
                ethertype: r.u16()?,
            },
            SET_QUEUE => OfAction::SetQueue { queue_id: r.u32()? },
            GROUP => OfAction::Group { group_id: r.u32()? },
            SET_NW_TTL => OfAction::SetNwTtl { ttl: r.u8()? },
            SET_FIELD => OfAction::SetField {
                oxm: Oxm::decode(&mut r)?,
            },
            COPY_TTL_OUT | COPY_TTL_IN | DEC_MPLS_TTL | POP_VLAN | DEC_NW_TTL | POP_PBB => {
                OfAction::Bare { action_type }
            }
            EXPERIMENTER => OfAction::Experimenter {
                experimenter: r.u32()?,
                data: r.rest().to_vec(),
            },
            _ => OfAction::Unknown {
                action_type,
                body: body.to_vec(),
            },
        };
        Ok(action)
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) -> Result<(), DecodeError> {
        out.put_u16(self.action_type());
        out.put_u16(wire_len("action", self.wire_len())?);
        match self {
            OfAction::Output { port, max_len } => {
                out.put_u32(*port);
                out.put_u16(*max_len);
                out.put_zeros(6);
            }
            OfAction::SetMplsTtl { ttl } | OfAction::SetNwTtl { ttl } => {
                out.put_u8(*ttl);
                out.put_zeros(3);
            }
            OfAction::EtherType { ethertype, .. } => {
                out.put_u16(*ethertype);
                out.put_zeros(2);
            }
            OfAction::SetQueue { queue_id: id } | OfAction::Group { group_id: id } => {
                out.put_u32(*id);
            }
            OfAction::SetField { oxm } => {
                oxm.encode(out)?;
                out.put_zeros(pad8(4 + oxm.wire_len()));
            }
            OfAction::Bare { .. } => out.put_zeros(4),
            OfAction::Experimenter { experimenter, data } => {
                out.put_u32(*experimenter);
                out.extend_from_slice(data);
            }
            OfAction::Unknown { body, .. } => out.extend_from_slice(body),
        }
        Ok(())
    }
}

/// A body shorter than its type requires is a length error of the enclosing element.
fn short_body(what: &'static str, length: usize) -> impl FnOnce(DecodeError) -> DecodeError {
    move |e| match e {
        DecodeError::Truncated { .. } => DecodeError::BadLength { what, length },
        other => other,
    }
}

pub(crate) fn encode_actions(actions: &[OfAction], out: &mut Vec<u8>) -> Result<(), DecodeError> {
    actions.iter().try_for_each(|a| a.encode(out))
}

pub fn actions_len(actions: &[OfAction]) -> usize {
    actions.iter().map(OfAction::wire_len).sum()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfInstruction {
    GotoTable {
        table_id: u8,
    },
    WriteMetadata {
        metadata: u64,
        metadata_mask: u64,
    },
    /// WRITE_ACTIONS, APPLY_ACTIONS and CLEAR_ACTIONS.
    Actions {
        instruction_type: u16,
        actions: Vec<OfAction>,
    },
    Meter {
        meter_id: u32,
    },
    Experimenter {
        experimenter: u32,
        data: Vec<u8>,
    },
    Unknown {
        instruction_type: u16,
        body: Vec<u8>,
    },
}

impl OfInstruction {
    pub fn instruction_type(&self) -> u16 {
        use instruction_type::*;
        match self {
            OfInstruction::GotoTable { .. } => GOTO_TABLE,
            OfInstruction::WriteMetadata { .. } => WRITE_METADATA,
            OfInstruction::Actions {
                instruction_type, ..
            } => *instruction_type,
            OfInstruction::Meter { .. } => METER,
            OfInstruction::Experimenter { .. } => EXPERIMENTER,
            OfInstruction::Unknown {
                instruction_type, ..
            } => *instruction_type,
        }
    }

    pub fn wire_len(&self) -> usize {
        match self {
            OfInstruction::GotoTable { .. } | OfInstruction::Meter { .. } => 8,
            OfInstruction::WriteMetadata { .. } => 24,
            OfInstruction::Actions { actions, .. } => 8 + actions_len(actions),
            OfInstruction::Experimenter { data, .. } => 8 + data.len(),
            OfInstruction::Unknown { body, .. } => 4 + body.len(),
        }
    }

    pub(crate) fn decode_list(bytes: &[u8]) -> Result<Vec<Self>, DecodeError> {
        let mut reader = Reader::new(bytes);
        let mut instructions = Vec::new();
        while reader.remaining() > 0 {
            let instruction_type = reader.u16()?;
            let len = reader.u16()? as usize;
            if len < 8 {
                return Err(DecodeError::BadLength {
                    what: "instruction",
                    length: len,
                });
            }
            let body = reader.take(len - 4)?;
            let instruction = Self::decode_body(instruction_type, body)
                .map_err(short_body("instruction", len))?;
            if instruction.wire_len() != len {
                return Err(DecodeError::BadLength {
                    what: "instruction",
                    length: len,
                });
            }
            instructions.push(instruction);
        }
        Ok(instructions)
    }

    fn decode_body(instruction_type: u16, body: &[u8]) -> Result<Self, DecodeError> {
        use instruction_type::*;
        let mut r = Reader::new(body);
        Ok(match instruction_type {
            GOTO_TABLE => OfInstruction::GotoTable { table_id: r.u8()? },
            WRITE_METADATA => {
                r.skip(4)?;
                OfInstruction::WriteMetadata {
                    metadata: r.u64()?,
                    metadata_mask: r.u64()?,
                }
            }
            WRITE_ACTIONS | APPLY_ACTIONS | CLEAR_ACTIONS => {
                r.skip(4)?;
                OfInstruction::Actions {
                    instruction_type,
                    actions: OfAction::decode_list(r.rest())?,
                }
            }
            METER => OfInstruction::Meter {
                meter_id: r.u32()?,
            },
            EXPERIMENTER => OfInstruction::Experimenter {
                experimenter: r.u32()?,
                data: r.rest().to_vec(),
            },
            _ => OfInstruction::Unknown {
                instruction_type,
                body: body.to_vec(),
            },
        })
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) -> Result<(), DecodeError> {
        out.put_u16(self.instruction_type());
        out.put_u16(wire_len("instruction", self.wire_len())?);
        match self {
            OfInstruction::GotoTable { table_id } => {
                out.put_u8(*table_id);
                out.put_zeros(3);
            }
            OfInstruction::WriteMetadata {
                metadata,
                metadata_mask,
            } => {
                out.put_zeros(4);
                out.put_u64(*metadata);
                out.put_u64(*metadata_mask);
            }
            OfInstruction::Actions { actions, .. } => {
                out.put_zeros(4);
                encode_actions(actions, out)?;
            }
            OfInstruction::Meter { meter_id } => out.put_u32(*meter_id),
            OfInstruction::Experimenter { experimenter, data } => {
                out.put_u32(*experimenter);
                out.extend_from_slice(data);
            }
            OfInstruction::Unknown { body, .. } => out.extend_from_slice(body),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_port_oxm(port: u32) -> Oxm {
        Oxm {
            class: 0x8000,
            field: 0,
            has_mask: false,
            value: port.to_be_bytes().to_vec(),
        }
    }

    #[test]
    fn match_pads_to_eight_bytes() {
        let matcher = Match {
            match_type: 1,
            oxms: vec![in_port_oxm(3)],
        };
        let mut out = Vec::new();
        matcher.encode(&mut out).unwrap();
        assert_eq!(matcher.length(), 12);
        assert_eq!(out.len(), 16);
        assert_eq!(&out[..4], &[0x00, 0x01, 0x00, 0x0c]);

        let decoded = Match::decode(&mut Reader::new(&out)).unwrap();
        assert_eq!(decoded, matcher);
    }

    #[test]
    fn action_list_decodes_every_layout() {
        let actions = vec![
            OfAction::Output {
                port: 2,
                max_len: 0xffff,
            },
            OfAction::SetField {
                oxm: in_port_oxm(1),
            },
            OfAction::EtherType {
                action_type: action_type::PUSH_VLAN,
                ethertype: 0x8100,
            },
            OfAction::Bare {
                action_type: action_type::DEC_NW_TTL,
            },
            OfAction::Experimenter {
                experimenter: 0x2320,
                data: vec![1, 2, 3, 4, 5, 6, 7, 8],
            },
        ];
        let mut out = Vec::new();
        encode_actions(&actions, &mut out).unwrap();
        assert_eq!(out.len(), actions_len(&actions));
        assert_eq!(OfAction::decode_list(&out).unwrap(), actions);
    }

    #[test]
    fn action_with_wrong_length_is_rejected() {
        // OUTPUT declared with 8 bytes instead of 16.
        let bytes = [0, 0, 0, 8, 0, 0, 0, 1];
        assert!(matches!(
            OfAction::decode_list(&bytes),
            Err(DecodeError::BadLength { what: "action", .. })
        ));
    }

    #[test]
    fn instruction_with_short_body_is_rejected() {
        // WRITE_METADATA declared with 8 bytes instead of 24.
        let bytes = [0, 2, 0, 8, 0, 0, 0, 0];
        assert!(matches!(
            OfInstruction::decode_list(&bytes),
            Err(DecodeError::BadLength {
                what: "instruction",
                length: 8
            })
        ));
    }

    #[test]
    fn nested_instruction_actions_decode() {
        let instructions = vec![
            OfInstruction::GotoTable { table_id: 3 },
            OfInstruction::WriteMetadata {
                metadata: 7,
                metadata_mask: u64::MAX,
            },
            OfInstruction::Actions {
                instruction_type: instruction_type::APPLY_ACTIONS,
                actions: vec![OfAction::Group { group_id: 9 }],
            },
            OfInstruction::Meter { meter_id: 4 },
        ];
        let mut out = Vec::new();
        for instruction in &instructions {
            instruction.encode(&mut out).unwrap();
        }
        assert_eq!(out.len(), 8 + 24 + 16 + 8);
        assert_eq!(OfInstruction::decode_list(&out).unwrap(), instructions);
    }
}
