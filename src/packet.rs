//! QUIC packet header parsing.
//!
//! Parses the version-independent parts of RFC 9000 long (§17.2) and short
//! (§17.3) headers: enough to classify a datagram, extract its connection
//! ids and, for Initial and Retry packets, its address-validation token.
//! Packet protection is never removed here; payload bytes stay opaque and
//! are handed to the engine as received.

use std::fmt;

use bytes::{Buf, Bytes};

use crate::connection_id::{ConnectionId, MAX_CONN_ID_LEN};
use crate::error::ProtocolError;
use crate::varint;

/// The QUIC wire version this endpoint speaks (QUIC version 1).
pub const PROTOCOL_VERSION: u32 = 0x0000_0001;

/// Minimum UDP payload length of a client Initial (RFC 9000 §14.1).
pub const MIN_CLIENT_INITIAL_LEN: usize = 1200;

/// Largest datagram this endpoint emits.
pub const MAX_DATAGRAM_SIZE: usize = 1350;

/// Length of the AEAD tag trailing a Retry packet (RFC 9001 §5.8).
pub const RETRY_INTEGRITY_TAG_LEN: usize = 16;

/// Upper bound on the address-validation tokens this endpoint mints
/// (marker + IPv6 octets + port + full-length connection id).
pub const MAX_TOKEN_LEN: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Initial,
    ZeroRtt,
    Handshake,
    Retry,
    Short,
    VersionNegotiation,
}

impl PacketType {
    pub fn is_long_header(self) -> bool {
        !matches!(self, PacketType::Short)
    }
}

/// Parsed, read-only view of one datagram's header fields.
///
/// `token` is non-empty only for Initial and Retry packets. Short headers
/// carry no version on the wire; `version` is reported as 0 for them.
#[derive(Debug, Clone)]
pub struct QuicHeader {
    pub version: u32,
    pub packet_type: PacketType,
    pub dcid: ConnectionId,
    pub scid: ConnectionId,
    pub token: Bytes,
}

impl QuicHeader {
    /// Parse the header of one UDP datagram.
    ///
    /// Pure: no side effects, never reads past the datagram. Errors are
    /// per-datagram and recoverable.
    pub fn parse(datagram: &[u8]) -> Result<Self, ProtocolError> {
        let mut buf = Bytes::copy_from_slice(datagram);
        if buf.is_empty() {
            return Err(ProtocolError::TruncatedInput {
                needed: 1,
                remaining: 0,
            });
        }
        let first = buf.get_u8();

        if first & 0x80 == 0 {
            // Short header: no version, no source id, no token. The wire
            // does not encode the dcid length; take up to the maximum the
            // peer could have been given.
            let take = buf.remaining().min(MAX_CONN_ID_LEN);
            return Ok(Self {
                version: 0,
                packet_type: PacketType::Short,
                dcid: ConnectionId::from_bytes(buf.split_to(take)),
                scid: ConnectionId::empty(),
                token: Bytes::new(),
            });
        }

        check(&buf, 4)?;
        let version = buf.get_u32();
        let packet_type = long_packet_type(first, version)?;

        let dcid = read_cid(&mut buf)?;
        let scid = read_cid(&mut buf)?;

        let token = match packet_type {
            PacketType::Initial => {
                let len = varint::decode(&mut buf)? as usize;
                check(&buf, len)?;
                buf.split_to(len)
            }
            PacketType::Retry => {
                // The token is everything up to the trailing integrity tag.
                let Some(len) = buf.remaining().checked_sub(RETRY_INTEGRITY_TAG_LEN) else {
                    return Err(ProtocolError::ProtocolViolation(format!(
                        "retry packet too short for integrity tag: {} bytes left",
                        buf.remaining()
                    )));
                };
                buf.split_to(len)
            }
            _ => Bytes::new(),
        };

        Ok(Self {
            version,
            packet_type,
            dcid,
            scid,
            token,
        })
    }
}

impl fmt::Display for QuicHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "version={:#010x} type={:?} dcid={} scid={} token={}B",
            self.version,
            self.packet_type,
            self.dcid,
            self.scid,
            self.token.len()
        )
    }
}

fn long_packet_type(first: u8, version: u32) -> Result<PacketType, ProtocolError> {
    if version == 0 {
        // A zero version always marks Version Negotiation; the type bits in
        // the first byte carry no meaning there (RFC 9000 §17.2.1).
        return Ok(PacketType::VersionNegotiation);
    }
    match (first & 0x30) >> 4 {
        0x00 => Ok(PacketType::Initial),
        0x01 => Ok(PacketType::ZeroRtt),
        0x02 => Ok(PacketType::Handshake),
        0x03 => Ok(PacketType::Retry),
        other => Err(ProtocolError::ProtocolViolation(format!(
            "unknown long packet type: {other}"
        ))),
    }
}

fn read_cid(buf: &mut Bytes) -> Result<ConnectionId, ProtocolError> {
    check(buf, 1)?;
    let len = buf.get_u8() as usize;
    if len > MAX_CONN_ID_LEN {
        return Err(ProtocolError::ProtocolViolation(format!(
            "connection id too large: {len} > {MAX_CONN_ID_LEN}"
        )));
    }
    check(buf, len)?;
    Ok(ConnectionId::from_bytes(buf.split_to(len)))
}

fn check(buf: &Bytes, needed: usize) -> Result<(), ProtocolError> {
    if buf.remaining() < needed {
        return Err(ProtocolError::TruncatedInput {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}
