//! Builds the exact wire layout of a decoded OpenFlow message as a [`PacketStructure`].
//!
//! Every supported message starts with the four header fields `version`, `type`, `length`
//! and `xid`. Variable-length lists are walked in wire order and their entries are
//! prefixed with their index: `oxm_N_`, `action_N_`, `instr_N_`, `instr_N_action_M_`,
//! `hello_elem_N_`. Packet-in/out payloads are described down to ARP or IPv4 fields.

use crate::ethernet::{ETHERNET_HEADER_LEN, EthType, peek_ethernet};
use crate::openflow::flow::Oxm;
use crate::openflow::message::HelloElement;
use crate::openflow::{
    FlowMod, FlowRemoved, Match, MessageBody, MessageType, OfAction, OfInstruction, OfMessage,
    OfVersion, PacketIn, PacketOut,
};
use crate::structure::{PacketStructure, StructureError};
use etherparse::Ipv4HeaderSlice;
use log::trace;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("No field layout for {msg_type} messages on OpenFlow {version}")]
    UnsupportedMessageKind {
        msg_type: MessageType,
        version: OfVersion,
    },
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),
    #[error("Invalid field layout: {0}")]
    Structure(#[from] StructureError),
}

const IPV4_FIXED_HEADER_LEN: usize = 20;
const ARP_FIXED_LEN: usize = 8;

/// Derives the field layout of `msg`.
///
/// # Errors
/// * `UnsupportedMessageKind` when the message type/version pair has no known layout.
/// * `UnsupportedFeature` for IPv6 payloads and action or instruction types that are not
///   described.
pub fn extract(msg: &OfMessage) -> Result<PacketStructure, ExtractError> {
    let mut s = PacketStructure::new();
    s.append("version", 1);
    s.append("type", 1);
    s.append("length", 2);
    s.append("xid", 4);

    match &msg.body {
        MessageBody::Hello { elements } => {
            for (i, element) in elements.iter().enumerate() {
                let sub = hello_element_structure(element);
                let base = s.next_offset();
                s.extend_prefixed(&sub, &format!("hello_elem_{i}_"), base);
            }
        }
        MessageBody::Echo { data } => s.append("data", data.len()),
        MessageBody::Barrier => {}
        MessageBody::RoleRequest { .. } => {
            s.append("role", 4);
            s.append("pad", 4);
            s.append("generation_id", 8);
        }
        MessageBody::PacketIn(p) => packet_in_fields(&mut s, p)?,
        MessageBody::PacketOut(p) => packet_out_fields(&mut s, p)?,
        MessageBody::FlowMod(f) => flow_mod_fields(&mut s, f, msg.version)?,
        MessageBody::FlowRemoved(f) => flow_removed_fields(&mut s, f)?,
        MessageBody::Raw(_) => {
            return Err(ExtractError::UnsupportedMessageKind {
                msg_type: msg.msg_type,
                version: msg.version,
            });
        }
    }

    trace!(
        "Extracted {} field(s) covering {} byte(s) from {}",
        s.len(),
        s.byte_length(),
        msg.msg_type
    );
    Ok(s)
}

fn append_sub(s: &mut PacketStructure, sub: &PacketStructure, prefix: &str) {
    let base = s.next_offset();
    s.extend_prefixed(sub, prefix, base);
}

fn packet_in_fields(s: &mut PacketStructure, p: &PacketIn) -> Result<(), ExtractError> {
    s.append("buffer_id", 4);
    s.append("total_len", 2);
    s.append("reason", 1);
    s.append("table_id", 1);
    s.append("cookie", 8);
    append_sub(s, &match_structure(&p.matcher)?, "");
    s.append("pad", 2);
    append_sub(s, &extract_ethernet(&p.data)?, "");
    Ok(())
}

fn packet_out_fields(s: &mut PacketStructure, p: &PacketOut) -> Result<(), ExtractError> {
    s.append("buffer_id", 4);
    s.append("in_port", 4);
    s.append("actions_len", 2);
    s.append("pad", 6);
    for (i, action) in p.actions.iter().enumerate() {
        append_sub(s, &action_structure(action)?, &format!("action_{i}_"));
    }
    append_sub(s, &extract_ethernet(&p.data)?, "");
    Ok(())
}

fn flow_mod_fields(
    s: &mut PacketStructure,
    f: &FlowMod,
    version: OfVersion,
) -> Result<(), ExtractError> {
    s.append("cookie", 8);
    s.append("cookie_mask", 8);
    s.append("table_id", 1);
    s.append("command", 1);
    s.append("idle_timeout", 2);
    s.append("hard_timeout", 2);
    s.append("priority", 2);
    s.append("buffer_id", 4);
    s.append("out_port", 4);
    s.append("out_group", 4);
    s.append("flags", 2);
    if version == OfVersion::V1_4 {
        s.append("importance", 2);
    } else {
        s.append("pad", 2);
    }
    append_sub(s, &match_structure(&f.matcher)?, "");
    for (i, instruction) in f.instructions.iter().enumerate() {
        append_sub(s, &instruction_structure(instruction)?, &format!("instr_{i}_"));
    }
    Ok(())
}

fn flow_removed_fields(s: &mut PacketStructure, f: &FlowRemoved) -> Result<(), ExtractError> {
    s.append("cookie", 8);
    s.append("priority", 2);
    s.append("reason", 1);
    s.append("table_id", 1);
    s.append("duration_sec", 4);
    s.append("duration_nsec", 4);
    s.append("idle_timeout", 2);
    s.append("hard_timeout", 2);
    s.append("packet_count", 8);
    s.append("byte_count", 8);
    append_sub(s, &match_structure(&f.matcher)?, "");
    Ok(())
}

fn hello_element_structure(element: &HelloElement) -> PacketStructure {
    let mut s = PacketStructure::new();
    s.append("type", 2);
    s.append("length", 2);
    match element {
        HelloElement::VersionBitmap { bitmaps } => {
            for j in 0..bitmaps.len() {
                s.append(format!("bitmap_{j}"), 4);
            }
        }
        HelloElement::Other { data, .. } => s.append("data", data.len()),
    }
    let length = element.length();
    s.append("pad", length.div_ceil(8) * 8 - length);
    s
}

fn push_oxm(s: &mut PacketStructure, oxm: &Oxm, prefix: &str) -> Result<(), ExtractError> {
    s.append(format!("{prefix}class"), 2);
    let field = format!("{prefix}field");
    let has_mask = format!("{prefix}has_mask");
    s.append_masked(1, &[(field.as_str(), 0xFE), (has_mask.as_str(), 0x01)])?;
    s.append(format!("{prefix}length"), 1);
    s.append(format!("{prefix}value"), oxm.value.len());
    Ok(())
}

fn match_structure(matcher: &Match) -> Result<PacketStructure, ExtractError> {
    let mut s = PacketStructure::new();
    s.append("match_type", 2);
    s.append("match_length", 2);
    for (i, oxm) in matcher.oxms.iter().enumerate() {
        push_oxm(&mut s, oxm, &format!("oxm_{i}_"))?;
    }
    s.append("match_pad", matcher.padded_length() - matcher.length());
    Ok(s)
}

fn action_structure(action: &OfAction) -> Result<PacketStructure, ExtractError> {
    let mut s = PacketStructure::new();
    s.append("type", 2);
    s.append("len", 2);
    match action {
        OfAction::Output { .. } => {
            s.append("port", 4);
            s.append("max_len", 2);
            s.append("pad", 6);
        }
        OfAction::SetMplsTtl { .. } => {
            s.append("mpls_ttl", 1);
            s.append("pad", 3);
        }
        OfAction::EtherType { .. } => {
            s.append("ethertype", 2);
            s.append("pad", 2);
        }
        OfAction::SetQueue { .. } => s.append("queue_id", 4),
        OfAction::Group { .. } => s.append("group_id", 4),
        OfAction::SetNwTtl { .. } => {
            s.append("nw_ttl", 1);
            s.append("pad", 3);
        }
        OfAction::SetField { oxm } => {
            push_oxm(&mut s, oxm, "oxm_")?;
            s.append("pad", action.wire_len() - s.next_offset());
        }
        OfAction::Bare { .. } => s.append("pad", 4),
        OfAction::Experimenter { data, .. } => {
            s.append("experimenter", 4);
            s.append("data", data.len());
        }
        OfAction::Unknown { action_type, .. } => {
            return Err(ExtractError::UnsupportedFeature(format!(
                "action type {action_type}"
            )));
        }
    }
    Ok(s)
}

fn instruction_structure(instruction: &OfInstruction) -> Result<PacketStructure, ExtractError> {
    let mut s = PacketStructure::new();
    s.append("type", 2);
    s.append("len", 2);
    match instruction {
        OfInstruction::GotoTable { .. } => {
            s.append("table_id", 1);
            s.append("pad", 3);
        }
        OfInstruction::WriteMetadata { .. } => {
            s.append("pad", 4);
            s.append("metadata", 8);
            s.append("metadata_mask", 8);
        }
        OfInstruction::Actions { actions, .. } => {
            s.append("pad", 4);
            for (j, action) in actions.iter().enumerate() {
                append_sub(&mut s, &action_structure(action)?, &format!("action_{j}_"));
            }
        }
        OfInstruction::Meter { .. } => s.append("meter_id", 4),
        OfInstruction::Experimenter { data, .. } => {
            s.append("experimenter", 4);
            s.append("data", data.len());
        }
        OfInstruction::Unknown {
            instruction_type, ..
        } => {
            return Err(ExtractError::UnsupportedFeature(format!(
                "instruction type {instruction_type}"
            )));
        }
    }
    Ok(s)
}

/// Describes an Ethernet frame. Frames too short for an Ethernet header become one `data`
/// field; unparseable ARP/IPv4 payloads become one `eth_data` field. Bytes past the L3
/// payload are reported as `eth_pad`.
///
/// # Errors
/// `UnsupportedFeature` for IPv6 payloads.
pub fn extract_ethernet(frame: &[u8]) -> Result<PacketStructure, ExtractError> {
    let mut s = PacketStructure::new();
    let Some(summary) = peek_ethernet(frame) else {
        s.append("data", frame.len());
        return Ok(s);
    };

    s.append("eth_dst", 6);
    s.append("eth_src", 6);
    s.append("eth_type", 2);
    let payload = &frame[ETHERNET_HEADER_LEN..];

    let consumed = match summary.eth_type {
        EthType::ARP => arp(&mut s, payload),
        EthType::IPV4 => ipv4(&mut s, payload)?,
        EthType::IPV6 => {
            return Err(ExtractError::UnsupportedFeature(
                "IPv6 payload".to_string(),
            ));
        }
        _ => None,
    };
    let consumed = consumed.unwrap_or_else(|| {
        s.append("eth_data", payload.len());
        payload.len()
    });
    s.append("eth_pad", payload.len() - consumed);
    Ok(s)
}

fn arp(s: &mut PacketStructure, payload: &[u8]) -> Option<usize> {
    if payload.len() < ARP_FIXED_LEN {
        return None;
    }
    let hlen = payload[4] as usize;
    let plen = payload[5] as usize;
    let total = ARP_FIXED_LEN + 2 * (hlen + plen);
    if payload.len() < total {
        return None;
    }
    s.append("arp_htype", 2);
    s.append("arp_ptype", 2);
    s.append("arp_hlen", 1);
    s.append("arp_plen", 1);
    s.append("arp_oper", 2);
    s.append("arp_sha", hlen);
    s.append("arp_spa", plen);
    s.append("arp_tha", hlen);
    s.append("arp_tpa", plen);
    Some(total)
}

fn ipv4(s: &mut PacketStructure, payload: &[u8]) -> Result<Option<usize>, ExtractError> {
    let Ok(header) = Ipv4HeaderSlice::from_slice(payload) else {
        return Ok(None);
    };
    let header_len = header.ihl() as usize * 4;
    let total_len = (header.total_len() as usize).min(payload.len());

    s.append_masked(1, &[("ipv4_version", 0xF0), ("ipv4_ihl", 0x0F)])?;
    s.append("ipv4_tos", 1);
    s.append("ipv4_total_len", 2);
    s.append("ipv4_identification", 2);
    s.append_masked(2, &[("ipv4_flags", 0xE000), ("ipv4_frag_offset", 0x1FFF)])?;
    s.append("ipv4_ttl", 1);
    s.append("ipv4_protocol", 1);
    s.append("ipv4_checksum", 2);
    s.append("ipv4_src_addr", 4);
    s.append("ipv4_dst_addr", 4);
    ipv4_options(s, header.options())?;
    debug_assert_eq!(s.next_offset(), ETHERNET_HEADER_LEN + header_len);
    debug_assert!(header_len >= IPV4_FIXED_HEADER_LEN);

    let data_len = total_len.saturating_sub(header_len);
    s.append("ipv4_data", data_len);
    Ok(Some(header_len + data_len))
}

fn ipv4_options(s: &mut PacketStructure, options: &[u8]) -> Result<(), ExtractError> {
    let mut i = 0;
    let mut n = 0;
    while i < options.len() {
        let prefix = format!("ipv4_opt_{n}_");
        let copied = format!("{prefix}copied");
        let class = format!("{prefix}class");
        let number = format!("{prefix}number");
        s.append_masked(
            1,
            &[
                (copied.as_str(), 0x80),
                (class.as_str(), 0x60),
                (number.as_str(), 0x1F),
            ],
        )?;
        match options[i] {
            // End of option list; anything after is padding.
            0 => {
                s.append("ipv4_opt_padding", options.len() - i - 1);
                return Ok(());
            }
            // No-op
            1 => i += 1,
            _ => match options.get(i + 1).map(|l| *l as usize) {
                Some(len) if len >= 2 && i + len <= options.len() => {
                    s.append(format!("{prefix}length"), 1);
                    s.append(format!("{prefix}data"), len - 2);
                    i += len;
                }
                _ => {
                    s.append(format!("{prefix}raw"), options.len() - i - 1);
                    return Ok(());
                }
            },
        }
        n += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    fn assert_layout_matches_wire(msg: &OfMessage) -> PacketStructure {
        let wire = msg.encode().expect("fixture must encode");
        let structure = extract(msg).expect("fixture must extract");
        assert_eq!(
            structure.byte_length(),
            wire.len(),
            "byte_length must equal the wire length for {}",
            msg.msg_type
        );
        let mut covered = 0;
        for field in &structure {
            assert!(field.end() <= wire.len(), "{} runs past the message", field.name());
            covered = covered.max(field.end());
        }
        assert_eq!(covered, wire.len(), "fields must reach the last byte");
        structure
    }

    #[test]
    fn header_fields_come_first() {
        let structure = assert_layout_matches_wire(&barrier_request(7));
        let names: Vec<&str> = structure.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["version", "type", "length", "xid"]);
        assert_eq!(structure.header_end(), 8);
    }

    #[test]
    fn hello_and_echo_layouts_match_wire() {
        assert_layout_matches_wire(&hello(OfVersion::V1_3, vec![]));
        let s = assert_layout_matches_wire(&hello(
            OfVersion::V1_4,
            vec![
                HelloElement::VersionBitmap {
                    bitmaps: vec![0x30, 0x1],
                },
                HelloElement::Other {
                    elem_type: 9,
                    data: vec![1, 2, 3],
                },
            ],
        ));
        assert_eq!(s.get("hello_elem_1_pad").map(|f| f.length()), Some(1));
        assert_eq!(s.get("hello_elem_0_bitmap_1").map(|f| f.offset()), Some(16));

        assert_layout_matches_wire(&echo_request(vec![]));
        let s = assert_layout_matches_wire(&echo_request(vec![1, 2, 3, 4, 5]));
        assert_eq!(s.get("data").map(|f| (f.offset(), f.length())), Some((8, 5)));
    }

    #[test]
    fn role_request_and_barrier_layouts_match_wire() {
        let s = assert_layout_matches_wire(&role_request(2, 0xdead_beef));
        assert_eq!(s.get("generation_id").map(|f| f.offset()), Some(16));
        assert_layout_matches_wire(&barrier_request(1));
    }

    #[test]
    fn packet_in_layouts_match_wire() {
        assert_layout_matches_wire(&packet_in(0xffff_ffff, Match::default(), vec![]));
        let s = assert_layout_matches_wire(&packet_in(100, rich_match(), arp_frame(1)));
        assert!(s.get("oxm_2_has_mask").is_some());
        assert!(s.get("arp_tpa").is_some());
        assert_layout_matches_wire(&packet_in(1, Match::default(), ipv4_frame(&[], 12)));
        let s = assert_layout_matches_wire(&packet_in(
            1,
            in_port_match(1),
            ipv4_frame(&[0x01, 0x07, 0x07, 1, 2, 3, 4, 5, 0x00, 0x00, 0x00, 0x00], 40),
        ));
        assert!(s.get("ipv4_opt_0_number").is_some(), "NOP option");
        assert_eq!(s.get("ipv4_opt_1_data").map(|f| f.length()), Some(5));
        assert_eq!(s.get("ipv4_opt_padding").map(|f| f.length()), Some(3));
    }

    #[test]
    fn packet_out_layouts_match_wire() {
        assert_layout_matches_wire(&packet_out(vec![], vec![]));
        let s = assert_layout_matches_wire(&packet_out(every_action(), arp_frame(2)));
        assert!(s.get("action_1_oxm_value").is_some());
        assert_eq!(s.get("action_0_port").map(|f| f.offset()), Some(28));
    }

    #[test]
    fn flow_mod_layouts_match_wire_for_both_versions() {
        let minimal = flow_mod(OfVersion::V1_3, Match::default(), vec![]);
        let s = assert_layout_matches_wire(&minimal);
        assert!(s.get("importance").is_none());

        let full = flow_mod(OfVersion::V1_4, rich_match(), every_instruction());
        let s = assert_layout_matches_wire(&full);
        assert_eq!(s.get("importance").map(|f| f.offset()), Some(46));
        assert!(s.get("instr_2_action_1_oxm_class").is_some());
        assert!(s.get("instr_1_metadata_mask").is_some());
    }

    #[test]
    fn flow_removed_layouts_match_wire() {
        assert_layout_matches_wire(&flow_removed(Match::default()));
        assert_layout_matches_wire(&flow_removed(rich_match()));
    }

    #[test]
    fn arp_payload_field_offsets() {
        let s = extract(&packet_in(100, in_port_match(1), arp_frame(1))).unwrap();
        let oper = s.get("arp_oper").expect("arp_oper must be extracted");
        // header(8) + fixed(16) + padded match(16) + pad(2) + ethernet(14) + 6
        assert_eq!((oper.offset(), oper.length()), (62, 2));
        assert_eq!(s.get("eth_pad").map(|f| f.length()), Some(18));
    }

    #[test]
    fn ipv6_payload_is_unsupported() {
        let mut frame = ethernet_header(EthType::IPV6);
        frame.extend_from_slice(&[0x60; 40]);
        let err = extract(&packet_in(1, Match::default(), frame)).unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedFeature(_)));
    }

    #[test]
    fn malformed_payloads_degrade_to_opaque_fields() {
        let s = extract_ethernet(&[1, 2, 3]).unwrap();
        assert_eq!(s.len(), 1);
        assert_eq!(s.get("data").map(|f| f.length()), Some(3));

        let mut truncated_arp = ethernet_header(EthType::ARP);
        truncated_arp.extend_from_slice(&[0, 1, 8, 0, 6, 4, 0]);
        let s = extract_ethernet(&truncated_arp).unwrap();
        assert_eq!(s.get("eth_data").map(|f| f.length()), Some(7));
        assert_eq!(s.byte_length(), truncated_arp.len());

        let mut vlan = ethernet_header(EthType::DOT1Q_VLAN_TAGGED_FRAMES);
        vlan.extend_from_slice(&[0; 10]);
        assert_eq!(extract_ethernet(&vlan).unwrap().byte_length(), vlan.len());
    }

    #[test]
    fn unknown_subtypes_and_raw_bodies_are_rejected() {
        let out = packet_out(
            vec![OfAction::Unknown {
                action_type: 99,
                body: vec![0; 4],
            }],
            vec![],
        );
        assert!(matches!(extract(&out), Err(ExtractError::UnsupportedFeature(_))));

        let fm = flow_mod(
            OfVersion::V1_3,
            Match::default(),
            vec![OfInstruction::Unknown {
                instruction_type: 77,
                body: vec![0; 4],
            }],
        );
        assert!(matches!(extract(&fm), Err(ExtractError::UnsupportedFeature(_))));

        let features = OfMessage {
            version: OfVersion::V1_3,
            msg_type: MessageType::FeaturesRequest,
            xid: 1,
            body: MessageBody::Raw(vec![]),
        };
        assert!(matches!(
            extract(&features),
            Err(ExtractError::UnsupportedMessageKind { .. })
        ));
    }
}
