//! quicgate: a QUIC server-side transport endpoint.
//!
//! quicgate owns the UDP socket side of a QUIC server: it parses RFC 9000
//! packet headers, performs connection-less admission (version negotiation
//! and stateless retry with address-validation tokens), routes datagrams to
//! per-connection sessions by destination connection id, and drives an
//! opaque QUIC engine through the traits in [`engine`]. The engine itself
//! (handshake crypto, loss recovery, congestion control, streams) is an
//! external collaborator this crate deliberately does not implement.

// Wire parsing and connection-less validation
pub mod connection_id;
pub mod packet;
pub mod token;
pub mod varint;

// The opaque engine boundary
pub mod engine;

// Per-connection state and routing
pub mod session;
pub mod table;

// The dispatcher
pub mod server;

pub mod error;

// Re-export main types
pub use connection_id::{ConnectionId, MAX_CONN_ID_LEN};
pub use error::{ProtocolError, QuicError, Result};
pub use packet::{MAX_DATAGRAM_SIZE, PROTOCOL_VERSION, PacketType, QuicHeader};
pub use server::{QuicServer, ServerConfig, ServerStats};

pub mod prelude {
    pub use crate::connection_id::{ConnectionId, MAX_CONN_ID_LEN};
    pub use crate::engine::{EngineError, EngineFactory, QuicEngine, RecvInfo, SendInfo};
    pub use crate::error::{ProtocolError, QuicError, Result};
    pub use crate::packet::{MAX_DATAGRAM_SIZE, PROTOCOL_VERSION, PacketType, QuicHeader};
    pub use crate::server::{
        ConnectionHandler, LogHandler, QuicServer, ServerConfig, ServerStats,
    };
    pub use crate::session::{ConnectionSession, SessionState};
    pub use crate::token::RetryTokenService;
}
