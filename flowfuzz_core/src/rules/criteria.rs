use crate::ethernet::{EthType, MacAddress, peek_ethernet};
use crate::openflow::{MessageType, OfMessage};
use serde_json::{Value, json};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddrSide {
    Source,
    Destination,
}

/// A single predicate over a decoded message.
///
/// Ethernet predicates look at the frame carried by packet-in/packet-out messages and are
/// simply unsatisfied when there is no parseable frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Criterion {
    MessageType(MessageType),
    EthType(EthType),
    EthAddr { side: AddrSide, addr: MacAddress },
}

impl Criterion {
    pub fn is_satisfied(&self, msg: &OfMessage) -> bool {
        match self {
            Criterion::MessageType(t) => msg.msg_type == *t,
            Criterion::EthType(t) => ethernet_of(msg).is_some_and(|e| e.eth_type == *t),
            Criterion::EthAddr { side, addr } => ethernet_of(msg).is_some_and(|e| match side {
                AddrSide::Source => e.source == *addr,
                AddrSide::Destination => e.destination == *addr,
            }),
        }
    }

    fn json_entry(&self) -> (&'static str, Value) {
        match self {
            Criterion::MessageType(t) => ("packetType", json!(t.name())),
            Criterion::EthType(t) => ("ethType", json!(t.to_string())),
            Criterion::EthAddr {
                side: AddrSide::Source,
                addr,
            } => ("ethSrc", json!(addr.to_string())),
            Criterion::EthAddr {
                side: AddrSide::Destination,
                addr,
            } => ("ethDst", json!(addr.to_string())),
        }
    }
}

fn ethernet_of(msg: &OfMessage) -> Option<crate::ethernet::EthernetSummary> {
    msg.ethernet_payload().and_then(peek_ethernet)
}

/// Conjunction of criteria. An empty set is always satisfied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CriteriaSet {
    criteria: Vec<Criterion>,
}

impl CriteriaSet {
    pub fn new(criteria: Vec<Criterion>) -> Self {
        Self { criteria }
    }

    pub fn is_satisfied(&self, msg: &OfMessage) -> bool {
        self.criteria.iter().all(|c| c.is_satisfied(msg))
    }

    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    pub fn to_json(&self) -> Value {
        let obj = self
            .criteria
            .iter()
            .map(|c| {
                let (key, value) = c.json_entry();
                (key.to_string(), value)
            })
            .collect();
        Value::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openflow::Match;
    use crate::test_support::*;

    #[test]
    fn message_type_criterion_compares_types() {
        let msg = echo_request(vec![]);
        assert!(Criterion::MessageType(MessageType::EchoRequest).is_satisfied(&msg));
        assert!(!Criterion::MessageType(MessageType::PacketIn).is_satisfied(&msg));
    }

    #[test]
    fn ethernet_criteria_read_the_payload() {
        let msg = packet_in(1, Match::default(), arp_frame(1));
        assert!(Criterion::EthType(EthType::ARP).is_satisfied(&msg));
        assert!(!Criterion::EthType(EthType::IPV4).is_satisfied(&msg));
        assert!(
            Criterion::EthAddr {
                side: AddrSide::Source,
                addr: MacAddress(SWITCH_MAC)
            }
            .is_satisfied(&msg)
        );
        assert!(
            !Criterion::EthAddr {
                side: AddrSide::Destination,
                addr: MacAddress(SWITCH_MAC)
            }
            .is_satisfied(&msg)
        );
    }

    #[test]
    fn ethernet_criteria_are_unsatisfied_without_a_frame() {
        let short = packet_in(1, Match::default(), vec![0x08, 0x06]);
        assert!(!Criterion::EthType(EthType::ARP).is_satisfied(&short));
        assert!(!Criterion::EthType(EthType::ARP).is_satisfied(&barrier_request(1)));
    }

    #[test]
    fn criteria_set_is_a_conjunction() {
        let msg = packet_in(1, Match::default(), arp_frame(2));
        let both = CriteriaSet::new(vec![
            Criterion::MessageType(MessageType::PacketIn),
            Criterion::EthType(EthType::ARP),
        ]);
        let mixed = CriteriaSet::new(vec![
            Criterion::MessageType(MessageType::PacketOut),
            Criterion::EthType(EthType::ARP),
        ]);
        assert!(both.is_satisfied(&msg));
        assert!(!mixed.is_satisfied(&msg));
        assert!(CriteriaSet::default().is_satisfied(&msg));
        assert_eq!(both.to_json()["packetType"], "PACKET_IN");
    }
}
