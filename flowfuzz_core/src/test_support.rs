//! Message builders shared by the unit tests.

use crate::ethernet::EthType;
use crate::openflow::flow::{action_type, instruction_type};
use crate::openflow::message::HelloElement;
use crate::openflow::{
    FlowMod, FlowRemoved, Match, MessageBody, MessageType, OfAction, OfInstruction, OfMessage,
    OfVersion, Oxm, PacketIn, PacketOut,
};

pub const SWITCH_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
pub const HOST_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x02];

pub fn message(version: OfVersion, msg_type: MessageType, body: MessageBody) -> OfMessage {
    OfMessage {
        version,
        msg_type,
        xid: 0x1234,
        body,
    }
}

pub fn hello(version: OfVersion, elements: Vec<HelloElement>) -> OfMessage {
    message(version, MessageType::Hello, MessageBody::Hello { elements })
}

pub fn echo_request(data: Vec<u8>) -> OfMessage {
    message(
        OfVersion::V1_3,
        MessageType::EchoRequest,
        MessageBody::Echo { data },
    )
}

pub fn barrier_request(xid: u32) -> OfMessage {
    let mut msg = message(OfVersion::V1_3, MessageType::BarrierRequest, MessageBody::Barrier);
    msg.xid = xid;
    msg
}

pub fn role_request(role: u32, generation_id: u64) -> OfMessage {
    message(
        OfVersion::V1_3,
        MessageType::RoleRequest,
        MessageBody::RoleRequest {
            role,
            generation_id,
        },
    )
}

pub fn in_port_match(port: u32) -> Match {
    Match {
        match_type: 1,
        oxms: vec![Oxm {
            class: 0x8000,
            field: 0,
            has_mask: false,
            value: port.to_be_bytes().to_vec(),
        }],
    }
}

/// in_port, eth_type and a masked ipv4_src.
pub fn rich_match() -> Match {
    let mut matcher = in_port_match(3);
    matcher.oxms.push(Oxm {
        class: 0x8000,
        field: 5,
        has_mask: false,
        value: vec![0x08, 0x00],
    });
    matcher.oxms.push(Oxm {
        class: 0x8000,
        field: 11,
        has_mask: true,
        value: vec![10, 0, 0, 0, 255, 0, 0, 0],
    });
    matcher
}

pub fn ethernet_header(eth_type: EthType) -> Vec<u8> {
    let mut frame = Vec::with_capacity(64);
    frame.extend_from_slice(&HOST_MAC);
    frame.extend_from_slice(&SWITCH_MAC);
    frame.extend_from_slice(&eth_type.0.to_be_bytes());
    frame
}

/// A 60-byte ARP frame: 14 bytes of Ethernet, 28 of ARP and 18 of padding.
pub fn arp_frame(oper: u16) -> Vec<u8> {
    let mut frame = ethernet_header(EthType::ARP);
    frame.extend_from_slice(&[0x00, 0x01, 0x08, 0x00, 6, 4]);
    frame.extend_from_slice(&oper.to_be_bytes());
    frame.extend_from_slice(&SWITCH_MAC);
    frame.extend_from_slice(&[10, 0, 0, 1]);
    frame.extend_from_slice(&[0; 6]);
    frame.extend_from_slice(&[10, 0, 0, 2]);
    frame.resize(60, 0);
    frame
}

/// An IPv4 frame with the given options (multiple of 4 bytes) and `payload_len` bytes of data.
pub fn ipv4_frame(options: &[u8], payload_len: usize) -> Vec<u8> {
    let header_len = 20 + options.len();
    let total_len = (header_len + payload_len) as u16;
    let mut frame = ethernet_header(EthType::IPV4);
    frame.push(0x40 | (header_len / 4) as u8);
    frame.push(0);
    frame.extend_from_slice(&total_len.to_be_bytes());
    frame.extend_from_slice(&[0x00, 0x01, 0x40, 0x00, 64, 17, 0, 0]);
    frame.extend_from_slice(&[10, 0, 0, 1]);
    frame.extend_from_slice(&[10, 0, 0, 2]);
    frame.extend_from_slice(options);
    frame.extend((0..payload_len).map(|i| i as u8));
    frame
}

pub fn packet_in(buffer_id: u32, matcher: Match, data: Vec<u8>) -> OfMessage {
    message(
        OfVersion::V1_3,
        MessageType::PacketIn,
        MessageBody::PacketIn(PacketIn {
            buffer_id,
            total_len: data.len() as u16,
            reason: 1,
            table_id: 0,
            cookie: 0xfeed,
            matcher,
            data,
        }),
    )
}

pub fn packet_out(actions: Vec<OfAction>, data: Vec<u8>) -> OfMessage {
    message(
        OfVersion::V1_3,
        MessageType::PacketOut,
        MessageBody::PacketOut(PacketOut {
            buffer_id: 0xffff_ffff,
            in_port: 1,
            actions,
            data,
        }),
    )
}

/// One action of every described layout.
pub fn every_action() -> Vec<OfAction> {
    vec![
        OfAction::Output {
            port: 2,
            max_len: 0xffe5,
        },
        OfAction::SetField {
            oxm: Oxm {
                class: 0x8000,
                field: 6,
                has_mask: false,
                value: HOST_MAC.to_vec(),
            },
        },
        OfAction::SetMplsTtl { ttl: 9 },
        OfAction::EtherType {
            action_type: action_type::PUSH_MPLS,
            ethertype: 0x8847,
        },
        OfAction::SetQueue { queue_id: 3 },
        OfAction::Group { group_id: 4 },
        OfAction::SetNwTtl { ttl: 32 },
        OfAction::Bare {
            action_type: action_type::POP_VLAN,
        },
        OfAction::Experimenter {
            experimenter: 0x2320,
            data: vec![0; 8],
        },
    ]
}

/// One instruction of every described layout.
pub fn every_instruction() -> Vec<OfInstruction> {
    vec![
        OfInstruction::GotoTable { table_id: 1 },
        OfInstruction::WriteMetadata {
            metadata: 0xabc,
            metadata_mask: 0xfff,
        },
        OfInstruction::Actions {
            instruction_type: instruction_type::APPLY_ACTIONS,
            actions: every_action(),
        },
        OfInstruction::Actions {
            instruction_type: instruction_type::CLEAR_ACTIONS,
            actions: vec![],
        },
        OfInstruction::Meter { meter_id: 5 },
        OfInstruction::Experimenter {
            experimenter: 0x4f4e4600,
            data: vec![],
        },
    ]
}

pub fn flow_mod(version: OfVersion, matcher: Match, instructions: Vec<OfInstruction>) -> OfMessage {
    message(
        version,
        MessageType::FlowMod,
        MessageBody::FlowMod(FlowMod {
            cookie: 1,
            cookie_mask: 0,
            table_id: 0,
            command: 0,
            idle_timeout: 10,
            hard_timeout: 30,
            priority: 100,
            buffer_id: 0xffff_ffff,
            out_port: 0xffff_ffff,
            out_group: 0xffff_ffff,
            flags: 1,
            importance: if version == OfVersion::V1_4 { 7 } else { 0 },
            matcher,
            instructions,
        }),
    )
}

pub fn flow_removed(matcher: Match) -> OfMessage {
    message(
        OfVersion::V1_3,
        MessageType::FlowRemoved,
        MessageBody::FlowRemoved(FlowRemoved {
            cookie: 1,
            priority: 100,
            reason: 0,
            table_id: 0,
            duration_sec: 12,
            duration_nsec: 500,
            idle_timeout: 10,
            hard_timeout: 0,
            packet_count: 4,
            byte_count: 256,
            matcher,
        }),
    )
}

/// Wire bytes of `msg`.
pub fn wire(msg: &OfMessage) -> Vec<u8> {
    msg.encode().expect("fixture must encode")
}
