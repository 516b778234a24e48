//! The opaque QUIC engine boundary.
//!
//! quicgate does not implement the QUIC state machine. It drives an external
//! engine through the traits here: [`EngineFactory`] covers connection-less
//! work (version support, Version Negotiation and Retry datagram encoding,
//! accepting new connections) and [`QuicEngine`] is one live connection's
//! handshake, flow-control and stream machinery. Implementations own their
//! native resources and release them on drop; nothing unsafe leaks past this
//! module's signatures.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::connection_id::ConnectionId;
use crate::server::config::ServerConfig;

/// Addressing metadata for one received datagram.
#[derive(Debug, Clone, Copy)]
pub struct RecvInfo {
    pub from: SocketAddr,
    pub to: SocketAddr,
}

/// Addressing and pacing metadata for one outgoing datagram.
#[derive(Debug, Clone, Copy)]
pub struct SendInfo {
    pub from: SocketAddr,
    pub to: SocketAddr,
    /// Earliest instant the datagram should leave the socket.
    pub at: Instant,
}

/// A connection-level error reported by the engine.
#[derive(Debug, Clone)]
pub struct TransportError {
    /// Application-level close rather than a transport-level one.
    pub is_app: bool,
    pub code: u64,
    pub reason: Vec<u8>,
}

/// An engine failure, carrying the engine's negative return code.
///
/// Engine errors are recoverable per datagram: the session survives unless
/// the engine separately reports the connection closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("engine error {}: {}", .code, error_name(.code))]
pub struct EngineError {
    pub code: i64,
}

impl EngineError {
    pub const DONE: i64 = -1;
    pub const BUFFER_TOO_SHORT: i64 = -2;
    pub const UNKNOWN_VERSION: i64 = -3;
    pub const INVALID_FRAME: i64 = -4;
    pub const INVALID_PACKET: i64 = -5;
    pub const INVALID_STATE: i64 = -6;
    pub const INVALID_STREAM_STATE: i64 = -7;
    pub const INVALID_TRANSPORT_PARAM: i64 = -8;
    pub const CRYPTO_FAIL: i64 = -9;
    pub const TLS_FAIL: i64 = -10;
    pub const FLOW_CONTROL: i64 = -11;
    pub const STREAM_LIMIT: i64 = -12;
    pub const FINAL_SIZE: i64 = -13;
    pub const CONGESTION_CONTROL: i64 = -14;
    pub const ID_LIMIT: i64 = -17;
    pub const OUT_OF_IDENTIFIERS: i64 = -18;
    pub const KEY_UPDATE: i64 = -19;

    pub fn new(code: i64) -> Self {
        Self { code }
    }

    pub fn name(&self) -> &'static str {
        error_name(&self.code)
    }
}

fn error_name(code: &i64) -> &'static str {
    match *code {
        EngineError::DONE => "done",
        EngineError::BUFFER_TOO_SHORT => "buffer too short",
        EngineError::UNKNOWN_VERSION => "unknown version",
        EngineError::INVALID_FRAME => "invalid frame",
        EngineError::INVALID_PACKET => "invalid packet",
        EngineError::INVALID_STATE => "invalid state",
        EngineError::INVALID_STREAM_STATE => "invalid stream state",
        EngineError::INVALID_TRANSPORT_PARAM => "invalid transport param",
        EngineError::CRYPTO_FAIL => "crypto failure",
        EngineError::TLS_FAIL => "tls failure",
        EngineError::FLOW_CONTROL => "flow control violation",
        EngineError::STREAM_LIMIT => "stream limit violation",
        EngineError::FINAL_SIZE => "final size violation",
        EngineError::CONGESTION_CONTROL => "congestion control error",
        EngineError::ID_LIMIT => "id limit",
        EngineError::OUT_OF_IDENTIFIERS => "out of identifiers",
        EngineError::KEY_UPDATE => "key update error",
        _ => "unknown engine error",
    }
}

/// One live QUIC connection's state machine.
///
/// Not reentrant: callers must serialize access. The session wraps every
/// engine behind a single lock for exactly that reason.
pub trait QuicEngine: Send {
    /// Process one received datagram. Returns the number of bytes consumed.
    fn recv(&mut self, buf: &mut [u8], info: &RecvInfo) -> Result<usize, EngineError>;

    /// Write the next outgoing datagram into `out`. `Ok(None)` means the
    /// engine has nothing to send right now.
    fn send(&mut self, out: &mut [u8]) -> Result<Option<(usize, SendInfo)>, EngineError>;

    /// Time until the next timeout event, if one is pending.
    fn timeout(&self) -> Option<Duration>;

    /// Notify the engine that its timeout deadline elapsed.
    fn on_timeout(&mut self);

    fn is_established(&self) -> bool;

    fn is_closed(&self) -> bool;

    /// Stream ids with data ready for the application.
    fn readable(&self) -> Vec<u64>;

    /// The local error that closed the connection, if any.
    fn local_error(&self) -> Option<TransportError>;

    /// Begin closing the connection.
    fn close(&mut self, app: bool, code: u64, reason: &[u8]) -> Result<(), EngineError>;
}

/// Process-wide engine handle, initialized once before the dispatcher
/// starts. Performs everything that happens before a connection exists.
pub trait EngineFactory: Send + Sync {
    /// Whether the engine can speak `version`.
    fn is_version_supported(&self, version: u32) -> bool;

    /// Accept a new server-side connection.
    ///
    /// `scid` is the id this server chose during retry (the client now uses
    /// it as destination); `odcid` is the destination id of the client's
    /// very first Initial, recovered from the address-validation token.
    fn accept(
        &self,
        scid: &ConnectionId,
        odcid: &ConnectionId,
        local: SocketAddr,
        peer: SocketAddr,
        config: &ServerConfig,
    ) -> Result<Box<dyn QuicEngine>, EngineError>;

    /// Encode a Version Negotiation datagram into `out`; returns its length.
    fn negotiate_version(
        &self,
        scid: &ConnectionId,
        dcid: &ConnectionId,
        out: &mut [u8],
    ) -> Result<usize, EngineError>;

    /// Encode a Retry datagram into `out`; returns its length.
    ///
    /// `scid`/`dcid` are the client's ids as parsed from its Initial,
    /// `new_scid` is the fresh server-chosen id and `token` the freshly
    /// minted address-validation token.
    fn retry(
        &self,
        scid: &ConnectionId,
        dcid: &ConnectionId,
        new_scid: &ConnectionId,
        token: &[u8],
        version: u32,
        out: &mut [u8],
    ) -> Result<usize, EngineError>;
}
