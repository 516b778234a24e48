//! The server dispatcher.
//!
//! One receive loop per bound socket: read a datagram, parse its header,
//! route it to the session owning its destination connection id, or run the
//! admission ladder (version negotiation, stateless retry, token
//! validation, engine accept) when no session exists. After every feed the
//! engine's send queue is drained back onto the socket; a per-session timer
//! task drives retransmission and idle timeout independently of datagram
//! arrival.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex as SyncMutex, RwLock};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::connection_id::{ConnectionId, MAX_CONN_ID_LEN};
use crate::engine::{EngineError, EngineFactory, RecvInfo};
use crate::error::{ProtocolError, QuicError, Result};
use crate::packet::{MAX_DATAGRAM_SIZE, MIN_CLIENT_INITIAL_LEN, PacketType, QuicHeader};
use crate::session::{ConnectionSession, SessionState};
use crate::table::ConnectionTable;
use crate::token::RetryTokenService;

pub mod config;
pub mod handler;

pub use config::{CongestionControl, ServerConfig, ServerConfigBuilder};
pub use handler::{ConnectionHandler, LogHandler};

/// Receive buffer size; larger than any datagram a sane path delivers.
const RECV_BUF_LEN: usize = 65536;

/// Counters describing one server's lifetime so far.
#[derive(Debug, Default, Clone)]
pub struct ServerStats {
    pub datagrams_received: u64,
    pub datagrams_sent: u64,
    pub datagrams_dropped: u64,
    pub retries_sent: u64,
    pub version_negotiations_sent: u64,
    pub sessions_accepted: u64,
    pub sessions_closed: u64,
}

/// A QUIC server endpoint bound to one UDP socket.
///
/// Cheap to clone; all clones drive the same socket and connection table.
/// Call [`QuicServer::run`] on one task and [`QuicServer::shutdown`] from
/// anywhere to stop it; `run` releases every session before returning.
#[derive(Clone)]
pub struct QuicServer {
    inner: Arc<Inner>,
}

impl QuicServer {
    /// Bind the UDP socket and assemble the dispatcher.
    ///
    /// Fatal errors (address in use, bad config) surface here; once `run`
    /// starts, per-datagram errors never escape the loop.
    pub async fn bind(
        config: ServerConfig,
        factory: Arc<dyn EngineFactory>,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(config.bind_addr).await?;
        let local_addr = socket.local_addr()?;
        info!("quic server listening on {local_addr}");
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(Inner {
                socket,
                local_addr,
                config,
                factory,
                handler,
                table: ConnectionTable::new(),
                tokens: RetryTokenService::new(),
                stats: RwLock::new(ServerStats::default()),
                shutdown,
                timers: SyncMutex::new(Vec::new()),
            }),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> ServerStats {
        self.inner.stats.read().clone()
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.inner.table.session_count()
    }

    /// Drive the receive loop until [`QuicServer::shutdown`] is called or
    /// the socket fails.
    pub async fn run(&self) -> Result<()> {
        self.inner.clone().run().await
    }

    /// Stop the receive loop. The pending receive is unblocked and every
    /// live session is closed and released exactly once before `run`
    /// returns.
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown.send(true);
    }
}

struct Inner {
    socket: UdpSocket,
    local_addr: SocketAddr,
    config: ServerConfig,
    factory: Arc<dyn EngineFactory>,
    handler: Arc<dyn ConnectionHandler>,
    table: ConnectionTable,
    tokens: RetryTokenService,
    stats: RwLock<ServerStats>,
    shutdown: watch::Sender<bool>,
    timers: SyncMutex<Vec<JoinHandle<()>>>,
}

impl Inner {
    async fn run(self: Arc<Self>) -> Result<()> {
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut buf = vec![0u8; RECV_BUF_LEN];
        let result = loop {
            // Checked every iteration so a shutdown signalled before this
            // task subscribed is not lost.
            if *shutdown_rx.borrow() {
                break Ok(());
            }
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    let (len, peer) = match received {
                        Ok(received) => received,
                        // The socket is gone; only this ends the loop.
                        Err(err) => break Err(QuicError::Io(err)),
                    };
                    self.stats.write().datagrams_received += 1;
                    if let Err(err) = Inner::handle_datagram(&self, &mut buf[..len], peer).await {
                        self.stats.write().datagrams_dropped += 1;
                        debug!("dropping datagram from {peer}: {err}");
                    }
                }
                _ = shutdown_rx.changed() => {}
            }
        };

        // Sessions release exactly once on every exit path, and the timer
        // tasks must observe the shutdown flag before they are joined.
        let _ = self.shutdown.send(true);
        self.close_all_sessions().await;
        let timers: Vec<JoinHandle<()>> = self.timers.lock().drain(..).collect();
        for timer in timers {
            let _ = timer.await;
        }
        info!("server on {} stopped", self.local_addr);
        result
    }

    /// Process one datagram. Errors returned here are per-datagram and only
    /// ever drop that datagram.
    async fn handle_datagram(
        inner: &Arc<Inner>,
        datagram: &mut [u8],
        peer: SocketAddr,
    ) -> Result<()> {
        let header = QuicHeader::parse(datagram)?;
        trace!("datagram from {peer}: {header}");

        let session = match inner.table.get(&header.dcid) {
            Some(session) => session,
            None => match Inner::admit(inner, &header, datagram.len(), peer).await? {
                Some(session) => session,
                // Handled without a connection (version negotiation, retry,
                // or an intentional silent drop).
                None => return Ok(()),
            },
        };

        let info = RecvInfo {
            from: peer,
            to: inner.local_addr,
        };
        if let Err(err) = session.feed(datagram, info).await {
            // Engine-level receive errors are per-datagram; the session
            // lives on unless the engine reports itself closed below.
            error!("engine failed to process datagram from {peer}: {err}");
        }
        inner.flush_session(&session).await;
        Ok(())
    }

    /// The admission ladder for datagrams with no matching session.
    async fn admit(
        inner: &Arc<Inner>,
        header: &QuicHeader,
        datagram_len: usize,
        peer: SocketAddr,
    ) -> Result<Option<Arc<ConnectionSession>>> {
        if header.packet_type == PacketType::Short {
            trace!(
                "no session for short-header packet from {peer} (dcid {})",
                header.dcid
            );
            inner.stats.write().datagrams_dropped += 1;
            return Ok(None);
        }

        if datagram_len < MIN_CLIENT_INITIAL_LEN {
            // Answering undersized first flights would turn this server
            // into a traffic amplifier.
            debug!("undersized {datagram_len}-byte long-header datagram from {peer}");
            inner.stats.write().datagrams_dropped += 1;
            return Ok(None);
        }

        if !inner.factory.is_version_supported(header.version) {
            inner.negotiate_version(header, peer).await?;
            return Ok(None);
        }

        if header.packet_type != PacketType::Initial {
            debug!(
                "dropping {:?} packet for unknown connection {}",
                header.packet_type, header.dcid
            );
            inner.stats.write().datagrams_dropped += 1;
            return Ok(None);
        }

        if header.token.is_empty() {
            inner.stateless_retry(header, peer).await?;
            return Ok(None);
        }

        let Some(odcid) = inner.tokens.validate(&header.token, peer) else {
            warn!("invalid address validation token from {peer}");
            return Err(QuicError::TokenInvalid);
        };

        if header.dcid.len() != MAX_CONN_ID_LEN {
            return Err(ProtocolError::ProtocolViolation(format!(
                "destination id length {} is not a server-chosen id",
                header.dcid.len()
            ))
            .into());
        }

        if let Some(limit) = inner.config.max_connections {
            if inner.table.session_count() >= limit {
                return Err(QuicError::ResourceExhaustion(format!(
                    "connection limit {limit} reached"
                )));
            }
        }

        let scid = header.dcid.clone();
        let (session, created) = inner.table.get_or_try_insert_with(scid.clone(), || {
            let engine =
                inner
                    .factory
                    .accept(&scid, &odcid, inner.local_addr, peer, &inner.config)?;
            let session = Arc::new(ConnectionSession::new(
                engine,
                scid.clone(),
                odcid.clone(),
                inner.local_addr,
                peer,
                inner.config.max_send_udp_payload(),
            ));
            session.activate();
            Ok::<_, EngineError>(session)
        })?;

        if created {
            // The client keeps addressing us by the id we chose during
            // retry, but its very first flight used the original id; both
            // must route here.
            if odcid != scid {
                inner.table.insert_alias(odcid, session.clone());
            }
            inner.stats.write().sessions_accepted += 1;
            Inner::spawn_timer(inner, session.clone());
            info!("accepted connection {} from {peer}", session.scid());
        }
        Ok(Some(session))
    }

    async fn negotiate_version(&self, header: &QuicHeader, peer: SocketAddr) -> Result<()> {
        debug!(
            "version negotiation with {peer} (version {:#010x})",
            header.version
        );
        let mut out = vec![0u8; MAX_DATAGRAM_SIZE];
        let len = self
            .factory
            .negotiate_version(&header.scid, &header.dcid, &mut out)?;
        self.transmit(&out[..len], peer).await?;
        self.stats.write().version_negotiations_sent += 1;
        Ok(())
    }

    async fn stateless_retry(&self, header: &QuicHeader, peer: SocketAddr) -> Result<()> {
        debug!("stateless retry for {peer}");
        let token = self.tokens.mint(&header.dcid, peer);
        let new_scid = ConnectionId::random();
        let mut out = vec![0u8; MAX_DATAGRAM_SIZE];
        let len = self.factory.retry(
            &header.scid,
            &header.dcid,
            &new_scid,
            &token,
            header.version,
            &mut out,
        )?;
        self.transmit(&out[..len], peer).await?;
        self.stats.write().retries_sent += 1;
        Ok(())
    }

    /// Drain the engine's outgoing datagrams, surface handler events, and
    /// retire the session if the engine reports it closed.
    async fn flush_session(&self, session: &Arc<ConnectionSession>) {
        match session.drain().await {
            Ok(datagrams) => {
                for (payload, dest) in datagrams {
                    if let Err(err) = self.transmit(&payload, dest).await {
                        warn!("failed to send datagram to {dest}: {err}");
                    }
                }
            }
            Err(err) => warn!(
                "engine send failure on connection {}: {err}",
                session.scid()
            ),
        }

        if session.is_established().await {
            if session.mark_established() {
                self.handler.on_established(session).await;
            }
            for stream_id in session.readable().await {
                self.handler.on_readable(session, stream_id).await;
            }
        }

        if session.is_closed().await {
            self.finish_session(session).await;
        }
    }

    /// Remove a session whose engine reported closed or timed out.
    async fn finish_session(&self, session: &Arc<ConnectionSession>) {
        self.table.remove_session(session);
        if session.close(0, b"").await {
            self.stats.write().sessions_closed += 1;
            if let Some(err) = session.local_error().await {
                debug!(
                    "connection {} closed with local error {:#x}",
                    session.scid(),
                    err.code
                );
            }
            self.handler.on_closed(session).await;
            info!(
                "connection {} from {} removed",
                session.scid(),
                session.peer()
            );
        }
    }

    fn spawn_timer(inner: &Arc<Inner>, session: Arc<ConnectionSession>) {
        let task = inner.clone();
        let handle = tokio::spawn(async move { task.drive_timer(session).await });
        inner.timers.lock().push(handle);
    }

    /// Per-session timer: drives the engine's retransmission and idle
    /// timeout handling independently of datagram arrival.
    async fn drive_timer(self: Arc<Self>, session: Arc<ConnectionSession>) {
        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            if session.state() == SessionState::Closed || *shutdown_rx.borrow() {
                break;
            }
            let deadline = session.timeout().await;
            tokio::select! {
                _ = shutdown_rx.changed() => {}
                // New datagram activity moves the deadline; recompute it.
                _ = session.notified_activity() => {}
                _ = wait_deadline(deadline) => {
                    session.handle_timeout().await;
                    self.flush_session(&session).await;
                }
            }
        }
    }

    /// Close every session exactly once, flushing final frames to peers.
    async fn close_all_sessions(&self) {
        for session in self.table.drain_all() {
            if session.close(0, b"server shutdown").await {
                if let Ok(datagrams) = session.drain().await {
                    for (payload, dest) in datagrams {
                        let _ = self.transmit(&payload, dest).await;
                    }
                }
                self.stats.write().sessions_closed += 1;
                self.handler.on_closed(&session).await;
            }
        }
    }

    async fn transmit(&self, payload: &[u8], dest: SocketAddr) -> Result<()> {
        self.socket.send_to(payload, dest).await?;
        self.stats.write().datagrams_sent += 1;
        Ok(())
    }
}

async fn wait_deadline(deadline: Option<Duration>) {
    match deadline {
        Some(delay) => tokio::time::sleep(delay).await,
        None => std::future::pending::<()>().await,
    }
}
