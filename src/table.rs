//! Connection table: destination connection id to live session.
//!
//! The table is the only cross-task shared structure besides each session's
//! own lock. Admission uses the map's entry API so that insert-if-absent is
//! atomic: two datagrams racing on the same new connection id can never
//! build two engines.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::connection_id::ConnectionId;
use crate::session::ConnectionSession;

#[derive(Default)]
pub struct ConnectionTable {
    sessions: DashMap<ConnectionId, Arc<ConnectionSession>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ConnectionSession>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Look up `id`, or admit the session built by `create`.
    ///
    /// `create` runs inside the vacant-entry critical section, so concurrent
    /// calls for the same id build at most one session; the second caller
    /// observes the first one's insert. Returns the session and whether this
    /// call created it.
    pub fn get_or_try_insert_with<E>(
        &self,
        id: ConnectionId,
        create: impl FnOnce() -> Result<Arc<ConnectionSession>, E>,
    ) -> Result<(Arc<ConnectionSession>, bool), E> {
        match self.sessions.entry(id) {
            Entry::Occupied(entry) => Ok((entry.get().clone(), false)),
            Entry::Vacant(entry) => {
                let session = create()?;
                entry.insert(session.clone());
                Ok((session, true))
            }
        }
    }

    /// Register an additional routing key for an existing session.
    pub fn insert_alias(&self, id: ConnectionId, session: Arc<ConnectionSession>) {
        self.sessions.insert(id, session);
    }

    /// Remove every key routing to `session`.
    pub fn remove_session(&self, session: &ConnectionSession) {
        self.sessions.remove(session.scid());
        if session.odcid() != session.scid() {
            self.sessions.remove(session.odcid());
        }
    }

    /// Number of routing keys currently registered.
    pub fn key_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of distinct live sessions.
    pub fn session_count(&self) -> usize {
        self.distinct().len()
    }

    /// Take every distinct session out of the table.
    pub fn drain_all(&self) -> Vec<Arc<ConnectionSession>> {
        let sessions = self.distinct();
        self.sessions.clear();
        sessions
    }

    fn distinct(&self) -> Vec<Arc<ConnectionSession>> {
        let mut out: Vec<Arc<ConnectionSession>> = Vec::new();
        for entry in self.sessions.iter() {
            if !out.iter().any(|s| Arc::ptr_eq(s, entry.value())) {
                out.push(entry.value().clone());
            }
        }
        out
    }
}
