//! Server and transport configuration.
//!
//! [`ServerConfig`] is handed to the engine on every accept. Every transport
//! field is optional: an absent field leaves the engine's own default
//! untouched.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{QuicError, Result};
use crate::packet::MAX_DATAGRAM_SIZE;

/// Congestion control algorithm selector, passed through to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CongestionControl {
    Reno,
    Cubic,
    Bbr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the UDP socket binds to.
    pub bind_addr: SocketAddr,
    /// Require and verify a client certificate.
    pub verify_peer: bool,
    pub cert_chain_pem_path: Option<PathBuf>,
    pub private_key_pem_path: Option<PathBuf>,
    pub trusted_ca_pem_path: Option<PathBuf>,
    /// ALPN identifiers offered during the handshake.
    pub application_protocols: Vec<String>,
    /// Upper bound on concurrent connections; admission fails beyond it.
    pub max_connections: Option<usize>,
    /// Idle timeout in milliseconds.
    pub max_idle_timeout: Option<u64>,
    pub max_recv_udp_payload_size: Option<usize>,
    pub max_send_udp_payload_size: Option<usize>,
    pub initial_max_data: Option<u64>,
    pub initial_max_stream_data_bidi_local: Option<u64>,
    pub initial_max_stream_data_bidi_remote: Option<u64>,
    pub initial_max_stream_data_uni: Option<u64>,
    pub initial_max_streams_bidi: Option<u64>,
    pub initial_max_streams_uni: Option<u64>,
    pub congestion_control: Option<CongestionControl>,
    pub enable_early_data: bool,
    pub grease: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:4433".parse().expect("static address"),
            verify_peer: false,
            cert_chain_pem_path: None,
            private_key_pem_path: None,
            trusted_ca_pem_path: None,
            application_protocols: vec![
                "hq-interop".to_string(),
                "hq-29".to_string(),
                "hq-28".to_string(),
                "hq-27".to_string(),
                "http/0.9".to_string(),
            ],
            max_connections: None,
            max_idle_timeout: None,
            max_recv_udp_payload_size: None,
            max_send_udp_payload_size: None,
            initial_max_data: None,
            initial_max_stream_data_bidi_local: None,
            initial_max_stream_data_bidi_remote: None,
            initial_max_stream_data_uni: None,
            initial_max_streams_bidi: None,
            initial_max_streams_uni: None,
            congestion_control: None,
            enable_early_data: false,
            grease: false,
        }
    }
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::new()
    }

    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let contents = std::fs::read_to_string(&path)?;
        serde_json::from_str(&contents)
            .map_err(|err| QuicError::Config(format!("{}: {err}", path.display())))
    }

    /// Size of the per-session send buffer.
    pub fn max_send_udp_payload(&self) -> usize {
        self.max_send_udp_payload_size.unwrap_or(MAX_DATAGRAM_SIZE)
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    pub fn verify_peer(mut self, verify: bool) -> Self {
        self.config.verify_peer = verify;
        self
    }

    /// Set the TLS certificate chain and private key files, checking that
    /// both exist.
    pub fn with_tls_files(
        mut self,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let cert_path = cert_path.into();
        let key_path = key_path.into();
        if !cert_path.exists() {
            return Err(QuicError::Config(format!(
                "certificate file not found: {}",
                cert_path.display()
            )));
        }
        if !key_path.exists() {
            return Err(QuicError::Config(format!(
                "private key file not found: {}",
                key_path.display()
            )));
        }
        self.config.cert_chain_pem_path = Some(cert_path);
        self.config.private_key_pem_path = Some(key_path);
        Ok(self)
    }

    pub fn with_trusted_ca(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.trusted_ca_pem_path = Some(path.into());
        self
    }

    pub fn application_protocols(mut self, protocols: Vec<String>) -> Self {
        self.config.application_protocols = protocols;
        self
    }

    pub fn max_connections(mut self, limit: usize) -> Self {
        self.config.max_connections = Some(limit);
        self
    }

    pub fn max_idle_timeout(mut self, millis: u64) -> Self {
        self.config.max_idle_timeout = Some(millis);
        self
    }

    pub fn max_udp_payload_sizes(mut self, recv: usize, send: usize) -> Self {
        self.config.max_recv_udp_payload_size = Some(recv);
        self.config.max_send_udp_payload_size = Some(send);
        self
    }

    pub fn initial_max_data(mut self, bytes: u64) -> Self {
        self.config.initial_max_data = Some(bytes);
        self
    }

    pub fn initial_max_stream_data(mut self, bidi_local: u64, bidi_remote: u64, uni: u64) -> Self {
        self.config.initial_max_stream_data_bidi_local = Some(bidi_local);
        self.config.initial_max_stream_data_bidi_remote = Some(bidi_remote);
        self.config.initial_max_stream_data_uni = Some(uni);
        self
    }

    pub fn initial_max_streams(mut self, bidi: u64, uni: u64) -> Self {
        self.config.initial_max_streams_bidi = Some(bidi);
        self.config.initial_max_streams_uni = Some(uni);
        self
    }

    pub fn congestion_control(mut self, algorithm: CongestionControl) -> Self {
        self.config.congestion_control = Some(algorithm);
        self
    }

    pub fn enable_early_data(mut self) -> Self {
        self.config.enable_early_data = true;
        self
    }

    pub fn grease(mut self, grease: bool) -> Self {
        self.config.grease = grease;
        self
    }

    pub fn build(self) -> ServerConfig {
        self.config
    }
}
