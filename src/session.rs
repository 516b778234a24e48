//! Per-connection session state.
//!
//! A [`ConnectionSession`] owns one engine handle and the scratch buffer its
//! outgoing datagrams are written through. Both live behind a single async
//! mutex: the engine is not reentrant, so every `feed`/`drain`/timeout call
//! for one connection serializes here, while sessions for different
//! connection ids proceed independently.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex as StateMutex;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use crate::connection_id::ConnectionId;
use crate::engine::{EngineError, QuicEngine, RecvInfo, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created but not yet inserted into the connection table.
    Pending,
    /// Accepting datagrams and producing responses.
    Active,
    /// Terminal; the engine has been told to close and the session is out
    /// of (or on its way out of) the table.
    Closed,
}

struct EngineCell {
    engine: Box<dyn QuicEngine>,
    send_buf: Vec<u8>,
}

pub struct ConnectionSession {
    scid: ConnectionId,
    odcid: ConnectionId,
    local: SocketAddr,
    peer: SocketAddr,
    state: StateMutex<SessionState>,
    cell: Mutex<EngineCell>,
    activity: Notify,
    established: AtomicBool,
}

impl ConnectionSession {
    pub(crate) fn new(
        engine: Box<dyn QuicEngine>,
        scid: ConnectionId,
        odcid: ConnectionId,
        local: SocketAddr,
        peer: SocketAddr,
        max_send_udp_payload: usize,
    ) -> Self {
        Self {
            scid,
            odcid,
            local,
            peer,
            state: StateMutex::new(SessionState::Pending),
            cell: Mutex::new(EngineCell {
                engine,
                send_buf: vec![0u8; max_send_udp_payload],
            }),
            activity: Notify::new(),
            established: AtomicBool::new(false),
        }
    }

    /// The server-chosen connection id this session is keyed under.
    pub fn scid(&self) -> &ConnectionId {
        &self.scid
    }

    /// The destination id of the client's very first Initial.
    pub fn odcid(&self) -> &ConnectionId {
        &self.odcid
    }

    pub fn local(&self) -> SocketAddr {
        self.local
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub(crate) fn activate(&self) {
        let mut state = self.state.lock();
        if *state == SessionState::Pending {
            *state = SessionState::Active;
        }
    }

    /// Feed one received datagram to the engine, in arrival order.
    pub(crate) async fn feed(
        &self,
        datagram: &mut [u8],
        info: RecvInfo,
    ) -> Result<usize, EngineError> {
        let mut cell = self.cell.lock().await;
        let consumed = cell.engine.recv(datagram, &info)?;
        self.activity.notify_waiters();
        Ok(consumed)
    }

    /// Collect every datagram the engine wants to transmit right now.
    pub(crate) async fn drain(&self) -> Result<Vec<(Bytes, SocketAddr)>, EngineError> {
        let mut cell = self.cell.lock().await;
        let EngineCell { engine, send_buf } = &mut *cell;
        let mut out = Vec::new();
        loop {
            match engine.send(send_buf)? {
                Some((len, info)) => out.push((Bytes::copy_from_slice(&send_buf[..len]), info.to)),
                None => break,
            }
        }
        Ok(out)
    }

    pub(crate) async fn timeout(&self) -> Option<Duration> {
        self.cell.lock().await.engine.timeout()
    }

    pub(crate) async fn handle_timeout(&self) {
        self.cell.lock().await.engine.on_timeout();
    }

    pub(crate) async fn is_established(&self) -> bool {
        self.cell.lock().await.engine.is_established()
    }

    pub(crate) async fn is_closed(&self) -> bool {
        self.cell.lock().await.engine.is_closed()
    }

    pub(crate) async fn readable(&self) -> Vec<u64> {
        self.cell.lock().await.engine.readable()
    }

    pub(crate) async fn local_error(&self) -> Option<TransportError> {
        self.cell.lock().await.engine.local_error()
    }

    /// Record that the handshake completed; true only on the first call.
    pub(crate) fn mark_established(&self) -> bool {
        !self.established.swap(true, Ordering::AcqRel)
    }

    /// Wait until a datagram for this session is fed to the engine.
    pub(crate) async fn notified_activity(&self) {
        self.activity.notified().await;
    }

    /// Close the session. Returns true only for the call that performed the
    /// transition; later calls are no-ops, so resources release exactly once.
    pub(crate) async fn close(&self, code: u64, reason: &[u8]) -> bool {
        {
            let mut state = self.state.lock();
            if *state == SessionState::Closed {
                return false;
            }
            *state = SessionState::Closed;
        }
        let mut cell = self.cell.lock().await;
        if let Err(err) = cell.engine.close(false, code, reason) {
            // Already-closed engines report this as an error; nothing to do.
            if err.code != EngineError::DONE {
                debug!("close on connection {}: {err}", self.scid);
            }
        }
        self.activity.notify_waiters();
        true
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::StubEngine;
    use super::*;

    fn session() -> ConnectionSession {
        ConnectionSession::new(
            Box::new(StubEngine::default()),
            ConnectionId::random(),
            ConnectionId::from_slice(&[1; 8]).unwrap(),
            "127.0.0.1:4433".parse().unwrap(),
            "127.0.0.1:5555".parse().unwrap(),
            1350,
        )
    }

    #[test]
    fn feed_then_drain_roundtrips_datagram() {
        tokio_test::block_on(async {
            let session = session();
            session.activate();

            let mut datagram = *b"ping";
            let info = RecvInfo {
                from: session.peer(),
                to: session.local(),
            };
            assert_eq!(session.feed(&mut datagram, info).await.unwrap(), 4);

            let sent = session.drain().await.unwrap();
            assert_eq!(sent.len(), 1);
            assert_eq!(&sent[0].0[..], b"ping");
            assert_eq!(sent[0].1, session.peer());
            assert!(session.drain().await.unwrap().is_empty());
        });
    }

    #[test]
    fn activate_moves_pending_to_active() {
        let session = session();
        assert_eq!(session.state(), SessionState::Pending);
        session.activate();
        assert_eq!(session.state(), SessionState::Active);
    }

    #[test]
    fn close_is_idempotent() {
        tokio_test::block_on(async {
            let session = session();
            session.activate();

            assert!(session.close(0, b"done").await);
            assert_eq!(session.state(), SessionState::Closed);
            assert!(!session.close(0, b"again").await);

            // A closed session never reactivates.
            session.activate();
            assert_eq!(session.state(), SessionState::Closed);
        });
    }

    #[test]
    fn mark_established_fires_once() {
        let session = session();
        assert!(session.mark_established());
        assert!(!session.mark_established());
    }
}
