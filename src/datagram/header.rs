//! Headers the router prepends to forwarded UDP packets.
//!
//! DATAGRAM / DATAGRAM2: `<base64 destination> FROM_PORT=n TO_PORT=n\n<payload>`
//! DATAGRAM3:            `<base64 32-byte hash> FROM_PORT=n TO_PORT=n\n<payload>`
//! RAW:                  `<payload>`, or with `HEADER=true`
//!                       `FROM_PORT=n TO_PORT=n PROTOCOL=n\n<payload>`

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::destination::{Destination, DestinationHash};
use crate::error::{Result, SamError};
use crate::protocol::Reply;
use crate::session::Style;

/// Datagram flavours a session can speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatagramKind {
    /// Repliable and signed.
    Datagram,
    /// Repliable, signed, with replay protection.
    Datagram2,
    /// Repliable but unauthenticated; the sender arrives as a hash.
    Datagram3,
    /// Anonymous.
    Raw,
}

/// Largest payload accepted for repliable datagrams.
pub const MAX_REPLIABLE_PAYLOAD: usize = 31 * 1024;
/// Largest payload accepted for raw datagrams.
pub const MAX_RAW_PAYLOAD: usize = 32 * 1024;

impl DatagramKind {
    pub fn style(&self) -> Style {
        match self {
            DatagramKind::Datagram => Style::Datagram,
            DatagramKind::Datagram2 => Style::Datagram2,
            DatagramKind::Datagram3 => Style::Datagram3,
            DatagramKind::Raw => Style::Raw,
        }
    }

    pub fn max_payload(&self) -> usize {
        match self {
            DatagramKind::Raw => MAX_RAW_PAYLOAD,
            _ => MAX_REPLIABLE_PAYLOAD,
        }
    }
}

/// Who sent a forwarded datagram, as far as the style reveals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sender {
    /// Full, router-verified destination.
    Destination(Destination),
    /// Unverified hash; resolve it with a naming lookup before replying.
    Hash(DestinationHash),
}

/// One inbound message, consumed by exactly one reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedDatagram {
    pub payload: Bytes,
    pub sender: Option<Sender>,
    pub from_port: u16,
    pub to_port: u16,
    /// I2CP protocol number, only reported for raw sessions with headers on.
    pub protocol: Option<u8>,
    pub session_id: String,
}

impl ForwardedDatagram {
    pub fn sender_destination(&self) -> Option<&Destination> {
        match &self.sender {
            Some(Sender::Destination(dest)) => Some(dest),
            _ => None,
        }
    }

    pub fn sender_hash(&self) -> Option<DestinationHash> {
        match &self.sender {
            Some(Sender::Destination(dest)) => Some(dest.hash()),
            Some(Sender::Hash(hash)) => Some(*hash),
            None => None,
        }
    }
}

/// Rebuild a forwarded datagram from one UDP packet.
pub(crate) fn parse_forwarded(
    kind: DatagramKind,
    raw_header: bool,
    packet: &[u8],
    session_id: &str,
) -> Result<ForwardedDatagram> {
    let mut datagram = ForwardedDatagram {
        payload: Bytes::new(),
        sender: None,
        from_port: 0,
        to_port: 0,
        protocol: None,
        session_id: session_id.to_string(),
    };

    if kind == DatagramKind::Raw && !raw_header {
        datagram.payload = Bytes::copy_from_slice(packet);
        return Ok(datagram);
    }

    let (header, payload) = split_header(packet)?;
    datagram.payload = Bytes::copy_from_slice(payload);

    if kind == DatagramKind::Raw {
        let fields = Reply::parse_fields(header)?;
        datagram.from_port = port_field(&fields, "FROM_PORT")?;
        datagram.to_port = port_field(&fields, "TO_PORT")?;
        datagram.protocol = fields
            .get("PROTOCOL")
            .map(|p| {
                p.parse::<u8>()
                    .map_err(|_| SamError::protocol(format!("PROTOCOL={p} is not a protocol number")))
            })
            .transpose()?;
        return Ok(datagram);
    }

    let reply = Reply::parse(header)?;
    datagram.from_port = reply.port("FROM_PORT")?.unwrap_or(0);
    datagram.to_port = reply.port("TO_PORT")?.unwrap_or(0);
    datagram.sender = Some(match kind {
        DatagramKind::Datagram3 => Sender::Hash(DestinationHash::from_base64(reply.status())?),
        _ => Sender::Destination(Destination::from_base64(reply.status())?),
    });
    Ok(datagram)
}

fn split_header(packet: &[u8]) -> Result<(&str, &[u8])> {
    let newline = packet
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| SamError::protocol("forwarded datagram has no header line"))?;
    let header = std::str::from_utf8(&packet[..newline])
        .map_err(|_| SamError::protocol("forwarded datagram header is not UTF-8"))?;
    Ok((header, &packet[newline + 1..]))
}

fn port_field(fields: &BTreeMap<String, String>, key: &str) -> Result<u16> {
    match fields.get(key) {
        Some(v) => v
            .parse()
            .map_err(|_| SamError::protocol(format!("{key}={v} is not a port"))),
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::tests::sample_public;
    use crate::utils::encoding::i2p_base64_encode;

    fn packet(header: &str, payload: &[u8]) -> Vec<u8> {
        let mut packet = format!("{header}\n").into_bytes();
        packet.extend_from_slice(payload);
        packet
    }

    #[test]
    fn datagram_carries_full_destination() {
        let dest = i2p_base64_encode(&sample_public(7));
        for kind in [DatagramKind::Datagram, DatagramKind::Datagram2] {
            let pkt = packet(&format!("{dest} FROM_PORT=5 TO_PORT=6"), b"hi\nthere");
            let dg = parse_forwarded(kind, false, &pkt, "d1").unwrap();

            assert_eq!(dg.payload.as_ref(), b"hi\nthere");
            assert_eq!(dg.sender_destination().unwrap().to_base64(), dest);
            assert_eq!((dg.from_port, dg.to_port), (5, 6));
            assert_eq!(dg.session_id, "d1");
        }
    }

    #[test]
    fn datagram3_carries_hash() {
        let dest = Destination::from_public_bytes(sample_public(8)).unwrap();
        let pkt = packet(&format!("{} FROM_PORT=0 TO_PORT=0", dest.hash().to_base64()), b"x");
        let dg = parse_forwarded(DatagramKind::Datagram3, false, &pkt, "d3").unwrap();

        assert_eq!(dg.sender, Some(Sender::Hash(dest.hash())));
        assert!(dg.sender_destination().is_none());
        assert_eq!(dg.sender_hash(), Some(dest.hash()));
    }

    #[test]
    fn raw_is_payload_only() {
        let dg = parse_forwarded(DatagramKind::Raw, false, b"hello", "r").unwrap();
        assert_eq!(dg.payload.as_ref(), b"hello");
        assert!(dg.sender.is_none());
        assert_eq!(dg.protocol, None);
    }

    #[test]
    fn raw_with_header_reports_ports_and_protocol() {
        let pkt = packet("FROM_PORT=1 TO_PORT=2 PROTOCOL=18", b"body");
        let dg = parse_forwarded(DatagramKind::Raw, true, &pkt, "r").unwrap();
        assert_eq!((dg.from_port, dg.to_port, dg.protocol), (1, 2, Some(18)));
        assert_eq!(dg.payload.as_ref(), b"body");
        assert!(dg.sender.is_none());
    }

    #[test]
    fn missing_header_line_is_rejected() {
        assert!(parse_forwarded(DatagramKind::Datagram, false, b"no newline", "d").is_err());
    }

    #[test]
    fn wrong_sender_shape_is_rejected() {
        let dest = i2p_base64_encode(&sample_public(9));
        let pkt = packet(&dest, b"x");
        assert!(parse_forwarded(DatagramKind::Datagram3, false, &pkt, "d").is_err());
    }

    #[test]
    fn payload_limits_follow_kind() {
        assert_eq!(DatagramKind::Raw.max_payload(), 32768);
        assert_eq!(DatagramKind::Datagram2.max_payload(), 31744);
        assert_eq!(DatagramKind::Datagram3.style(), Style::Datagram3);
    }
}
