//! Session registry (§9 Design Notes: "Registry — owns sessions keyed by id"), grounded in the
//! id-slot-reuse pattern of `t51core::net::endpoint::Endpoint::new_channel`/`reclaim_channel` but
//! simplified to a plain keyed map: sessions here are reference-counted and independently locked
//! (one mutex per `Session`, §5), so the registry itself only needs to serialize id assignment and
//! peer lookup, not session contents.
use crate::error::{CoreError, CoreResult};
use crate::session::{ConnectFlags, Session, SessionId};
use hashbrown::HashMap;
use std::sync::Arc;

pub struct Registry {
    sessions: HashMap<SessionId, Arc<Session>>,
    by_peer: HashMap<(String, String), SessionId>,
    free_ids: Vec<SessionId>,
    next_id: SessionId,
}

impl Registry {
    pub fn new() -> Registry {
        Registry {
            sessions: HashMap::new(),
            by_peer: HashMap::new(),
            free_ids: Vec::new(),
            next_id: 1,
        }
    }

    /// Admits a new session for `host:service`, rejecting a connect to a peer already bound to a
    /// live session (§7 `DuplicateConnect`: "attempting to connect to a host:service already bound
    /// to a live session — return failure synchronously").
    pub fn connect(
        &mut self,
        host: String,
        service: String,
        flags: ConnectFlags,
        fps: f32,
    ) -> CoreResult<Arc<Session>> {
        let peer = (host.clone(), service.clone());
        if self.by_peer.contains_key(&peer) {
            return Err(CoreError::DuplicateConnect);
        }

        let id = self.free_ids.pop().unwrap_or_else(|| {
            let id = self.next_id;
            self.next_id += 1;
            id
        });
        let session = Arc::new(Session::new(id, host, service, flags, fps));
        self.sessions.insert(id, session.clone());
        self.by_peer.insert(peer, id);
        Ok(session)
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).cloned()
    }

    /// Drops a session and frees its id for reuse by a later connect.
    pub fn remove(&mut self, id: SessionId) -> Option<Arc<Session>> {
        let session = self.sessions.remove(&id)?;
        self.by_peer.remove(&(session.host.clone(), session.service.clone()));
        self.free_ids.push(id);
        Some(session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SessionId, &Arc<Session>)> {
        self.sessions.iter()
    }
}
