//! Application callbacks for connection lifecycle events.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::session::ConnectionSession;

/// Hooks the dispatcher invokes as connections make progress.
///
/// All methods default to no-ops so implementations override only what they
/// need. Callbacks run on the dispatcher task; keep them short.
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    /// Called once per connection when its handshake completes.
    async fn on_established(&self, _session: &Arc<ConnectionSession>) {}

    /// Called when `stream_id` has data ready to read.
    async fn on_readable(&self, _session: &Arc<ConnectionSession>, _stream_id: u64) {}

    /// Called after the connection closed and left the table.
    async fn on_closed(&self, _session: &Arc<ConnectionSession>) {}
}

/// Default handler that only logs; useful for interop smoke testing.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHandler;

#[async_trait]
impl ConnectionHandler for LogHandler {
    async fn on_established(&self, session: &Arc<ConnectionSession>) {
        info!(
            "connection {} from {} established",
            session.scid(),
            session.peer()
        );
    }

    async fn on_readable(&self, session: &Arc<ConnectionSession>, stream_id: u64) {
        info!("stream {stream_id} is readable on {}", session.scid());
    }

    async fn on_closed(&self, session: &Arc<ConnectionSession>) {
        debug!("connection {} closed", session.scid());
    }
}
