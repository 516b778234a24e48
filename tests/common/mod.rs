//! Shared test support: a scriptable mock engine behind the factory seam,
//! wire builders for client packets, and a loopback UDP client.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use bytes::{BufMut, BytesMut};
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use quicgate::engine::{
    EngineError, EngineFactory, QuicEngine, RecvInfo, SendInfo, TransportError,
};
use quicgate::server::{ConnectionHandler, ServerConfig};
use quicgate::session::ConnectionSession;
use quicgate::varint;
use quicgate::{ConnectionId, PROTOCOL_VERSION};

/// How a [`MockEngine`] behaves once accepted.
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Handshake completes after this many received datagrams.
    pub establish_after: usize,
    /// Queue a short ack-like datagram in response to every recv.
    pub respond_on_recv: bool,
    /// Deadline reported from `timeout()`.
    pub timeout: Option<Duration>,
    /// Report the connection closed after the first `on_timeout` call.
    pub close_on_timeout: bool,
    /// Stream ids reported readable (once) after establishment.
    pub readable_streams: Vec<u64>,
    /// Refuse every accept with a TLS failure.
    pub fail_accept: bool,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            establish_after: 1,
            respond_on_recv: true,
            timeout: None,
            close_on_timeout: false,
            readable_streams: Vec::new(),
            fail_accept: false,
        }
    }
}

/// Counters shared between the mock engines and the test body.
#[derive(Debug, Default)]
pub struct EngineProbe {
    pub recv_count: AtomicUsize,
    pub close_calls: AtomicUsize,
    pub timeout_fires: AtomicUsize,
}

pub struct MockEngine {
    behavior: MockBehavior,
    probe: Arc<EngineProbe>,
    local: SocketAddr,
    peer: SocketAddr,
    recvs: usize,
    closed: bool,
    pending: VecDeque<Vec<u8>>,
    readable: RefCell<Vec<u64>>,
}

impl QuicEngine for MockEngine {
    fn recv(&mut self, buf: &mut [u8], _info: &RecvInfo) -> Result<usize, EngineError> {
        self.recvs += 1;
        self.probe.recv_count.fetch_add(1, Ordering::SeqCst);
        if self.behavior.respond_on_recv {
            self.pending.push_back(vec![0x40, self.recvs as u8]);
        }
        Ok(buf.len())
    }

    fn send(&mut self, out: &mut [u8]) -> Result<Option<(usize, SendInfo)>, EngineError> {
        match self.pending.pop_front() {
            Some(datagram) => {
                let len = datagram.len().min(out.len());
                out[..len].copy_from_slice(&datagram[..len]);
                Ok(Some((
                    len,
                    SendInfo {
                        from: self.local,
                        to: self.peer,
                        at: Instant::now(),
                    },
                )))
            }
            None => Ok(None),
        }
    }

    fn timeout(&self) -> Option<Duration> {
        if self.closed { None } else { self.behavior.timeout }
    }

    fn on_timeout(&mut self) {
        self.probe.timeout_fires.fetch_add(1, Ordering::SeqCst);
        if self.behavior.close_on_timeout {
            self.closed = true;
        }
    }

    fn is_established(&self) -> bool {
        self.recvs >= self.behavior.establish_after
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn readable(&self) -> Vec<u64> {
        if self.is_established() {
            self.readable.borrow_mut().drain(..).collect()
        } else {
            Vec::new()
        }
    }

    fn local_error(&self) -> Option<TransportError> {
        None
    }

    fn close(&mut self, _app: bool, _code: u64, _reason: &[u8]) -> Result<(), EngineError> {
        self.probe.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.closed {
            return Err(EngineError::new(EngineError::DONE));
        }
        self.closed = true;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptRecord {
    pub scid: ConnectionId,
    pub odcid: ConnectionId,
    pub peer: SocketAddr,
}

pub struct MockFactory {
    pub behavior: MockBehavior,
    pub probe: Arc<EngineProbe>,
    pub accepts: Mutex<Vec<AcceptRecord>>,
}

impl MockFactory {
    pub fn new(behavior: MockBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            probe: Arc::new(EngineProbe::default()),
            accepts: Mutex::new(Vec::new()),
        })
    }
}

impl EngineFactory for MockFactory {
    fn is_version_supported(&self, version: u32) -> bool {
        version == PROTOCOL_VERSION
    }

    fn accept(
        &self,
        scid: &ConnectionId,
        odcid: &ConnectionId,
        local: SocketAddr,
        peer: SocketAddr,
        _config: &ServerConfig,
    ) -> Result<Box<dyn QuicEngine>, EngineError> {
        if self.behavior.fail_accept {
            return Err(EngineError::new(EngineError::TLS_FAIL));
        }
        self.accepts.lock().push(AcceptRecord {
            scid: scid.clone(),
            odcid: odcid.clone(),
            peer,
        });
        Ok(Box::new(MockEngine {
            behavior: self.behavior.clone(),
            probe: self.probe.clone(),
            local,
            peer,
            recvs: 0,
            closed: false,
            pending: VecDeque::new(),
            readable: RefCell::new(self.behavior.readable_streams.clone()),
        }))
    }

    fn negotiate_version(
        &self,
        scid: &ConnectionId,
        dcid: &ConnectionId,
        out: &mut [u8],
    ) -> Result<usize, EngineError> {
        // Version Negotiation addressed back to the client: its source id
        // becomes our destination id and vice versa.
        let mut buf = BytesMut::new();
        buf.put_u8(0x80);
        buf.put_u32(0);
        buf.put_u8(scid.len() as u8);
        buf.put_slice(scid.as_ref());
        buf.put_u8(dcid.len() as u8);
        buf.put_slice(dcid.as_ref());
        buf.put_u32(PROTOCOL_VERSION);
        write_out(&buf, out)
    }

    fn retry(
        &self,
        scid: &ConnectionId,
        _dcid: &ConnectionId,
        new_scid: &ConnectionId,
        token: &[u8],
        version: u32,
        out: &mut [u8],
    ) -> Result<usize, EngineError> {
        let mut buf = BytesMut::new();
        buf.put_u8(0xf0);
        buf.put_u32(version);
        buf.put_u8(scid.len() as u8);
        buf.put_slice(scid.as_ref());
        buf.put_u8(new_scid.len() as u8);
        buf.put_slice(new_scid.as_ref());
        buf.put_slice(token);
        // A mock cannot compute the real AEAD integrity tag.
        buf.put_slice(&[0u8; 16]);
        write_out(&buf, out)
    }
}

fn write_out(buf: &[u8], out: &mut [u8]) -> Result<usize, EngineError> {
    if buf.len() > out.len() {
        return Err(EngineError::new(EngineError::BUFFER_TOO_SHORT));
    }
    out[..buf.len()].copy_from_slice(buf);
    Ok(buf.len())
}

/// Handler that records every callback.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    pub established: AtomicUsize,
    pub closed: AtomicUsize,
    pub readable: Mutex<Vec<u64>>,
}

#[async_trait::async_trait]
impl ConnectionHandler for RecordingHandler {
    async fn on_established(&self, _session: &Arc<ConnectionSession>) {
        self.established.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_readable(&self, _session: &Arc<ConnectionSession>, stream_id: u64) {
        self.readable.lock().push(stream_id);
    }

    async fn on_closed(&self, _session: &Arc<ConnectionSession>) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Build a client Initial, padded to the minimum first-flight size.
pub fn client_initial(dcid: &[u8], scid: &[u8], token: &[u8]) -> Vec<u8> {
    pad_vec(client_initial_unpadded(dcid, scid, token), 1200)
}

/// Build a client Initial without the mandatory padding.
pub fn client_initial_unpadded(dcid: &[u8], scid: &[u8], token: &[u8]) -> Vec<u8> {
    let mut buf = raw_long_header(0xc0, PROTOCOL_VERSION, dcid, scid);
    varint::encode(token.len() as u64, &mut buf).unwrap();
    buf.put_slice(token);
    buf.to_vec()
}

/// Build a long header with arbitrary first byte and version, padded so the
/// server treats it as a plausible first flight.
pub fn raw_long_datagram(first: u8, version: u32, dcid: &[u8], scid: &[u8]) -> Vec<u8> {
    pad(raw_long_header(first, version, dcid, scid), 1200)
}

/// Build a short-header packet carrying `dcid`.
pub fn short_packet(dcid: &[u8]) -> Vec<u8> {
    let mut buf = vec![0x40];
    buf.extend_from_slice(dcid);
    buf
}

fn raw_long_header(first: u8, version: u32, dcid: &[u8], scid: &[u8]) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u8(first);
    buf.put_u32(version);
    buf.put_u8(dcid.len() as u8);
    buf.put_slice(dcid);
    buf.put_u8(scid.len() as u8);
    buf.put_slice(scid);
    buf
}

fn pad(buf: BytesMut, to: usize) -> Vec<u8> {
    pad_vec(buf.to_vec(), to)
}

fn pad_vec(mut datagram: Vec<u8>, to: usize) -> Vec<u8> {
    if datagram.len() < to {
        datagram.resize(to, 0);
    }
    datagram
}

/// Loopback UDP client talking to one server.
pub struct TestClient {
    socket: UdpSocket,
    server: SocketAddr,
}

impl TestClient {
    pub async fn connect(server: SocketAddr) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        Self { socket, server }
    }

    pub fn addr(&self) -> SocketAddr {
        self.socket.local_addr().unwrap()
    }

    pub async fn send(&self, datagram: &[u8]) {
        self.socket.send_to(datagram, self.server).await.unwrap();
    }

    /// Receive one datagram, or `None` if the server stays silent.
    pub async fn recv(&self) -> Option<Vec<u8>> {
        let mut buf = vec![0u8; 65536];
        match timeout(Duration::from_millis(500), self.socket.recv_from(&mut buf)).await {
            Ok(Ok((len, _))) => Some(buf[..len].to_vec()),
            _ => None,
        }
    }
}

/// Poll `cond` until it holds or a couple of seconds elapse.
pub async fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
