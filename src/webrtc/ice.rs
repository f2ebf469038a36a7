//! ICE candidate wire syntax (RFC 8839 `candidate-attribute`).

use crate::errors::StreamError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateProtocol {
    Udp,
    Tcp,
}

impl FromStr for CandidateProtocol {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "udp" => Ok(CandidateProtocol::Udp),
            "tcp" => Ok(CandidateProtocol::Tcp),
            _ => Err(StreamError::CandidateParse(format!(
                "unknown transport \"{}\"",
                s
            ))),
        }
    }
}

impl fmt::Display for CandidateProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateProtocol::Udp => f.write_str("udp"),
            CandidateProtocol::Tcp => f.write_str("tcp"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateType {
    Host,
    Srflx,
    Prflx,
    Relay,
}

impl FromStr for CandidateType {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host" => Ok(CandidateType::Host),
            "srflx" => Ok(CandidateType::Srflx),
            "prflx" => Ok(CandidateType::Prflx),
            "relay" => Ok(CandidateType::Relay),
            _ => Err(StreamError::CandidateParse(format!(
                "unknown candidate type \"{}\"",
                s
            ))),
        }
    }
}

impl fmt::Display for CandidateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CandidateType::Host => "host",
            CandidateType::Srflx => "srflx",
            CandidateType::Prflx => "prflx",
            CandidateType::Relay => "relay",
        };
        f.write_str(s)
    }
}

/// Remote ICE candidate, parsed from its SDP attribute form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub foundation: String,
    pub component: u16,
    pub protocol: CandidateProtocol,
    pub priority: u32,
    /// IP address or mDNS hostname
    pub address: String,
    pub port: u16,
    pub candidate_type: CandidateType,
    pub related_address: Option<String>,
    pub related_port: Option<u16>,
    pub tcp_type: Option<String>,
    pub generation: Option<u32>,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

fn parse_field<T: FromStr>(value: &str, name: &str) -> Result<T, StreamError> {
    value.parse().map_err(|_| {
        StreamError::CandidateParse(format!("invalid {} \"{}\"", name, value))
    })
}

impl IceCandidate {
    /// Parse a candidate line.
    ///
    /// Accepts the bare attribute value as well as the `candidate:` and
    /// `a=candidate:` prefixed forms signaling layers commonly send.
    pub fn from_sdp(line: &str) -> Result<Self, StreamError> {
        let line = line.trim();
        let line = line.strip_prefix("a=").unwrap_or(line);
        let line = line.strip_prefix("candidate:").unwrap_or(line);

        let bits: Vec<&str> = line.split_whitespace().collect();
        if bits.len() < 8 {
            return Err(StreamError::CandidateParse(format!(
                "expected at least 8 fields, got {}",
                bits.len()
            )));
        }
        if bits[6] != "typ" {
            return Err(StreamError::CandidateParse(format!(
                "expected \"typ\" at field 7, got \"{}\"",
                bits[6]
            )));
        }

        let mut candidate = IceCandidate {
            foundation: bits[0].to_string(),
            component: parse_field(bits[1], "component")?,
            protocol: bits[2].parse()?,
            priority: parse_field(bits[3], "priority")?,
            address: bits[4].to_string(),
            port: parse_field(bits[5], "port")?,
            candidate_type: bits[7].parse()?,
            related_address: None,
            related_port: None,
            tcp_type: None,
            generation: None,
            sdp_mid: None,
            sdp_mline_index: None,
        };

        // Trailing name/value pairs; unknown extensions are ignored.
        for pair in bits[8..].chunks(2) {
            let [name, value] = pair else {
                return Err(StreamError::CandidateParse(format!(
                    "extension \"{}\" has no value",
                    pair[0]
                )));
            };
            match *name {
                "raddr" => candidate.related_address = Some(value.to_string()),
                "rport" => candidate.related_port = Some(parse_field(value, "rport")?),
                "tcptype" => candidate.tcp_type = Some(value.to_string()),
                "generation" => candidate.generation = Some(parse_field(value, "generation")?),
                _ => {}
            }
        }

        Ok(candidate)
    }

    pub fn with_sdp_mid(mut self, sdp_mid: Option<String>) -> Self {
        self.sdp_mid = sdp_mid;
        self
    }

    pub fn with_sdp_mline_index(mut self, index: Option<u16>) -> Self {
        self.sdp_mline_index = index;
        self
    }

    /// Attribute value without the `candidate:` prefix
    pub fn to_sdp(&self) -> String {
        let mut sdp = format!(
            "{} {} {} {} {} {} typ {}",
            self.foundation,
            self.component,
            self.protocol,
            self.priority,
            self.address,
            self.port,
            self.candidate_type
        );
        if let Some(addr) = &self.related_address {
            sdp.push_str(&format!(" raddr {}", addr));
        }
        if let Some(port) = self.related_port {
            sdp.push_str(&format!(" rport {}", port));
        }
        if let Some(tcp_type) = &self.tcp_type {
            sdp.push_str(&format!(" tcptype {}", tcp_type));
        }
        if let Some(generation) = self.generation {
            sdp.push_str(&format!(" generation {}", generation));
        }
        sdp
    }
}

impl fmt::Display for IceCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "candidate:{}", self.to_sdp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: &str = "candidate:842163049 1 udp 1677729535 192.168.1.20 54321 typ host generation 0";

    #[test]
    fn test_parse_host_candidate() {
        let c = IceCandidate::from_sdp(HOST).unwrap();
        assert_eq!(c.foundation, "842163049");
        assert_eq!(c.component, 1);
        assert_eq!(c.protocol, CandidateProtocol::Udp);
        assert_eq!(c.priority, 1677729535);
        assert_eq!(c.address, "192.168.1.20");
        assert_eq!(c.port, 54321);
        assert_eq!(c.candidate_type, CandidateType::Host);
        assert_eq!(c.generation, Some(0));
        assert_eq!(c.sdp_mid, None);
    }

    #[test]
    fn test_parse_relay_with_related_address() {
        let c = IceCandidate::from_sdp(
            "a=candidate:1 1 UDP 41885439 203.0.113.7 61000 typ relay raddr 198.51.100.2 rport 50000",
        )
        .unwrap();
        assert_eq!(c.candidate_type, CandidateType::Relay);
        assert_eq!(c.related_address.as_deref(), Some("198.51.100.2"));
        assert_eq!(c.related_port, Some(50000));
    }

    #[test]
    fn test_parse_tcp_and_unknown_extensions() {
        let c = IceCandidate::from_sdp(
            "4 1 tcp 1518280447 10.0.0.5 9 typ host tcptype active network-id 1 network-cost 10",
        )
        .unwrap();
        assert_eq!(c.protocol, CandidateProtocol::Tcp);
        assert_eq!(c.tcp_type.as_deref(), Some("active"));
    }

    #[test]
    fn test_round_trip_through_sdp() {
        let c = IceCandidate::from_sdp(HOST).unwrap();
        assert_eq!(c.to_string(), HOST);
        assert_eq!(IceCandidate::from_sdp(&c.to_sdp()).unwrap(), c);
    }

    #[test]
    fn test_malformed_candidates() {
        for line in [
            "",
            "candidate:",
            "candidate:1 1 udp 100 10.0.0.1 5000 host",
            "candidate:1 1 udp 100 10.0.0.1 notaport typ host",
            "candidate:1 x udp 100 10.0.0.1 5000 typ host",
            "candidate:1 1 sctp 100 10.0.0.1 5000 typ host",
            "candidate:1 1 udp 100 10.0.0.1 5000 typ bogus",
            "candidate:1 1 udp 100 10.0.0.1 5000 typ host rport",
            "candidate:1 1 udp 100 10.0.0.1 5000 typ host rport abc",
        ] {
            assert!(
                matches!(IceCandidate::from_sdp(line), Err(StreamError::CandidateParse(_))),
                "expected parse failure for {:?}",
                line
            );
        }
    }

    #[test]
    fn test_media_line_identifiers() {
        let c = IceCandidate::from_sdp(HOST)
            .unwrap()
            .with_sdp_mid(Some("0".to_string()))
            .with_sdp_mline_index(Some(0));
        assert_eq!(c.sdp_mid.as_deref(), Some("0"));
        assert_eq!(c.sdp_mline_index, Some(0));
    }
}
