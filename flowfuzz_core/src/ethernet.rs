use etherparse::Ethernet2HeaderSlice;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const ETHERNET_HEADER_LEN: usize = 14;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EthernetParseError {
    #[error("Invalid MAC address '{0}'")]
    InvalidMac(String),
    #[error("Unknown ethernet type '{0}'")]
    UnknownEthType(String),
}

/// EtherType value carried in an Ethernet II header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EthType(pub u16);

impl EthType {
    pub const IPV4: EthType = EthType(0x0800);
    pub const ARP: EthType = EthType(0x0806);
    pub const RARP: EthType = EthType(0x8035);
    pub const APPLETALK: EthType = EthType(0x809B);
    pub const DOT1Q_VLAN_TAGGED_FRAMES: EthType = EthType(0x8100);
    pub const IPV6: EthType = EthType(0x86DD);
    pub const PPPOE_DISCOVERY_STAGE: EthType = EthType(0x8863);
    pub const PPPOE_SESSION_STAGE: EthType = EthType(0x8864);

    const NAMED: [(&'static str, EthType); 8] = [
        ("IPV4", Self::IPV4),
        ("ARP", Self::ARP),
        ("RARP", Self::RARP),
        ("APPLETALK", Self::APPLETALK),
        ("DOT1Q_VLAN_TAGGED_FRAMES", Self::DOT1Q_VLAN_TAGGED_FRAMES),
        ("IPV6", Self::IPV6),
        ("PPPOE_DISCOVERY_STAGE", Self::PPPOE_DISCOVERY_STAGE),
        ("PPPOE_SESSION_STAGE", Self::PPPOE_SESSION_STAGE),
    ];

    pub fn name(&self) -> Option<&'static str> {
        Self::NAMED
            .iter()
            .find(|(_, t)| t == self)
            .map(|(name, _)| *name)
    }
}

impl fmt::Display for EthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "0x{:04x}", self.0),
        }
    }
}

/// Accepts a known name (case-insensitive) or a `0x`-prefixed hexadecimal value.
impl FromStr for EthType {
    type Err = EthernetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some((_, t)) = Self::NAMED
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(trimmed))
        {
            return Ok(*t);
        }
        trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .and_then(|hex| u16::from_str_radix(hex, 16).ok())
            .map(EthType)
            .ok_or_else(|| EthernetParseError::UnknownEthType(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress(pub [u8; 6]);

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddress {
    type Err = EthernetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EthernetParseError::InvalidMac(s.to_string());
        let parts: Vec<&str> = s.trim().split([':', '-']).collect();
        if parts.len() != 6 {
            return Err(invalid());
        }
        let mut octets = [0u8; 6];
        for (octet, part) in octets.iter_mut().zip(parts) {
            if part.is_empty() || part.len() > 2 {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        Ok(MacAddress(octets))
    }
}

/// Addressing part of an Ethernet II frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetSummary {
    pub destination: MacAddress,
    pub source: MacAddress,
    pub eth_type: EthType,
}

/// Reads the Ethernet II header at the start of `frame`, or `None` when it is too short.
pub fn peek_ethernet(frame: &[u8]) -> Option<EthernetSummary> {
    let header = Ethernet2HeaderSlice::from_slice(frame).ok()?;
    Some(EthernetSummary {
        destination: MacAddress(header.destination()),
        source: MacAddress(header.source()),
        eth_type: EthType(header.ether_type().0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eth_type_parses_names_and_hex() {
        assert_eq!("arp".parse::<EthType>().unwrap(), EthType::ARP);
        assert_eq!("Dot1q_Vlan_Tagged_Frames".parse::<EthType>().unwrap(), EthType(0x8100));
        assert_eq!("0x88cc".parse::<EthType>().unwrap(), EthType(0x88CC));
        assert!("LLDP".parse::<EthType>().is_err());
        assert_eq!(EthType(0x88CC).to_string(), "0x88cc");
        assert_eq!(EthType::IPV6.to_string(), "IPV6");
    }

    #[test]
    fn mac_address_round_trips_through_text() {
        let mac: MacAddress = "AA-bb-CC-00-11-ff".parse().unwrap();
        assert_eq!(mac.0, [0xAA, 0xBB, 0xCC, 0x00, 0x11, 0xFF]);
        assert_eq!(mac.to_string(), "aa:bb:cc:00:11:ff");
        assert!("aa:bb:cc:00:11".parse::<MacAddress>().is_err());
        assert!("aa:bb:cc:00:11:zz".parse::<MacAddress>().is_err());
    }

    #[test]
    fn peek_ethernet_reads_header_fields() {
        let mut frame = vec![0xFF; 6];
        frame.extend_from_slice(&[0x02, 0, 0, 0, 0, 1]);
        frame.extend_from_slice(&[0x08, 0x06]);
        let summary = peek_ethernet(&frame).expect("14 bytes is a full header");
        assert_eq!(summary.eth_type, EthType::ARP);
        assert_eq!(summary.source.to_string(), "02:00:00:00:00:01");
        assert!(peek_ethernet(&frame[..13]).is_none());
    }
}
