//! Stateless retry address-validation tokens.
//!
//! A token binds the original destination connection id of a client Initial
//! to the exact source address and port it arrived from. The server keeps no
//! state between minting a token and validating it; everything needed to
//! check the token is re-derived from the presented peer address.

use std::net::{IpAddr, SocketAddr};

use bytes::{BufMut, Bytes, BytesMut};

use crate::connection_id::ConnectionId;

/// Marker prefix identifying tokens minted by this endpoint.
const TOKEN_MARKER: &[u8] = b"quicgate";

/// Mints and validates stateless retry tokens.
///
/// The wire format is the flat concatenation `marker || ip octets ||
/// port (4 bytes, big endian) || original dcid`; field boundaries follow
/// from the fixed marker length and the presented address family. The token
/// carries no MAC and no expiry: it is bound to the exact (source IP, source
/// port) pair but is not authenticated.
#[derive(Debug, Default, Clone, Copy)]
pub struct RetryTokenService;

impl RetryTokenService {
    pub fn new() -> Self {
        Self
    }

    /// Mint a token for `peer`, embedding the original destination
    /// connection id so it can be recovered on the next Initial.
    pub fn mint(&self, odcid: &ConnectionId, peer: SocketAddr) -> Bytes {
        let ip = ip_octets(peer.ip());
        let mut token =
            BytesMut::with_capacity(TOKEN_MARKER.len() + ip.len() + 4 + odcid.len());
        token.put_slice(TOKEN_MARKER);
        token.put_slice(&ip);
        token.put_u32(u32::from(peer.port()));
        token.put_slice(odcid.as_ref());
        token.freeze()
    }

    /// Validate a token presented by `peer`.
    ///
    /// Returns the recovered original destination connection id, or `None`
    /// on any length or content mismatch. A token minted for one address or
    /// port never validates for another.
    pub fn validate(&self, token: &[u8], peer: SocketAddr) -> Option<ConnectionId> {
        let rest = token.strip_prefix(TOKEN_MARKER)?;
        let rest = rest.strip_prefix(ip_octets(peer.ip()).as_slice())?;
        if rest.len() < 4 {
            return None;
        }
        let (port, odcid) = rest.split_at(4);
        if u32::from_be_bytes(port.try_into().ok()?) != u32::from(peer.port()) {
            return None;
        }
        ConnectionId::from_slice(odcid).ok()
    }
}

fn ip_octets(ip: IpAddr) -> Vec<u8> {
    match ip {
        IpAddr::V4(ip) => ip.octets().to_vec(),
        IpAddr::V6(ip) => ip.octets().to_vec(),
    }
}
