//! Connection identifiers.
//!
//! A [`ConnectionId`] is the routing key of the connection table: an opaque
//! byte sequence of at most 20 bytes, compared and hashed by content so that
//! a parsed id and a freshly generated one with the same bytes route to the
//! same session.

use std::fmt;

use bytes::Bytes;
use rand::RngCore;

use crate::error::ProtocolError;

/// Maximum length of a connection id in QUIC version 1 (RFC 9000 §17.2).
pub const MAX_CONN_ID_LEN: usize = 20;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ConnectionId(Bytes);

impl ConnectionId {
    /// Copy a connection id out of a wire buffer, enforcing the length bound.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() > MAX_CONN_ID_LEN {
            return Err(ProtocolError::ProtocolViolation(format!(
                "connection id too large: {} > {MAX_CONN_ID_LEN}",
                bytes.len()
            )));
        }
        Ok(Self(Bytes::copy_from_slice(bytes)))
    }

    /// Wrap already-validated bytes without copying.
    pub(crate) fn from_bytes(bytes: Bytes) -> Self {
        debug_assert!(bytes.len() <= MAX_CONN_ID_LEN);
        Self(bytes)
    }

    /// Generate a random connection id.
    ///
    /// Server-chosen ids are always full length so the retry handshake can
    /// distinguish them from client-picked ones.
    pub fn random() -> Self {
        let mut data = [0u8; MAX_CONN_ID_LEN];
        rand::thread_rng().fill_bytes(&mut data);
        Self(Bytes::copy_from_slice(&data))
    }

    pub fn empty() -> Self {
        Self(Bytes::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for ConnectionId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}
