//! Login sessions with absolute expiry.
//!
//! Expiry is logical: a session whose deadline has passed is refused by
//! every read even while its record still exists. `sweep_expired` removes
//! the records.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use gt_rs_store::{Clock, IdAllocator, RecordStore, RecordStoreExt, Session};
use tracing::{debug, info, warn};

use crate::error::SessionError;

pub struct SessionStore {
    sessions: DashMap<String, Session>,
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    ids: IdAllocator,
}

impl SessionStore {
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: DashMap::new(),
            store,
            clock,
            ids: IdAllocator::default(),
        }
    }

    /// Restore live sessions from the store; expired ones are deleted.
    pub fn load(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>) -> Result<Self, SessionError> {
        let now = clock.now_ms();
        let records: Vec<Session> = store.scan_records("")?;
        let ids = IdAllocator::after(records.iter().map(|s| s.id));

        let sessions = DashMap::new();
        let mut dropped = 0;
        for session in records {
            if session.is_expired(now) {
                store.remove::<Session>(&session.sid)?;
                dropped += 1;
            } else {
                sessions.insert(session.sid.clone(), session);
            }
        }
        info!(
            "loaded {} session(s), discarded {dropped} expired",
            sessions.len()
        );

        Ok(Self {
            sessions,
            store,
            clock,
            ids,
        })
    }

    /// Start a session. A live session with the same id is a conflict; an
    /// expired one is replaced.
    pub fn create(&self, sid: &str, data: &str, ttl: Duration) -> Result<Session, SessionError> {
        let now = self.clock.now_ms();
        match self.sessions.entry(sid.to_string()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().is_expired(now) {
                    return Err(SessionError::Conflict);
                }
                let session = self.fresh(sid, data, ttl);
                self.store.save(&session)?;
                occupied.insert(session.clone());
                debug!("replaced expired session {}", session.id);
                Ok(session)
            }
            Entry::Vacant(vacant) => {
                let session = self.fresh(sid, data, ttl);
                self.store.insert_record(&session).map_err(|e| match e {
                    gt_rs_store::StoreError::Conflict { .. } => SessionError::Conflict,
                    other => other.into(),
                })?;
                vacant.insert(session.clone());
                debug!("created session {}", session.id);
                Ok(session)
            }
        }
    }

    fn fresh(&self, sid: &str, data: &str, ttl: Duration) -> Session {
        Session {
            id: self.ids.allocate(),
            sid: sid.to_string(),
            data: data.to_string(),
            expires_at: self.clock.deadline(ttl),
        }
    }

    pub fn get(&self, sid: &str) -> Result<Session, SessionError> {
        let session = self.sessions.get(sid).ok_or(SessionError::NotFound)?;
        if session.is_expired(self.clock.now_ms()) {
            return Err(SessionError::Expired);
        }
        Ok(session.clone())
    }

    /// Push the deadline out to `now + ttl`.
    pub fn touch(&self, sid: &str, ttl: Duration) -> Result<Session, SessionError> {
        let deadline = self.clock.deadline(ttl);
        self.modify(sid, |session| session.expires_at = deadline)
    }

    /// Replace the payload of a live session.
    pub fn set_data(&self, sid: &str, data: &str) -> Result<Session, SessionError> {
        self.modify(sid, |session| session.data = data.to_string())
    }

    fn modify(&self, sid: &str, f: impl FnOnce(&mut Session)) -> Result<Session, SessionError> {
        let mut entry = self.sessions.get_mut(sid).ok_or(SessionError::NotFound)?;
        if entry.is_expired(self.clock.now_ms()) {
            return Err(SessionError::Expired);
        }
        let mut next = entry.clone();
        f(&mut next);
        self.store.save(&next)?;
        *entry = next.clone();
        Ok(next)
    }

    /// Logout. Returns whether a session existed.
    ///
    /// The row is deleted while the map entry is held, so a concurrent
    /// `create` of the same sid lands strictly before or after.
    pub fn destroy(&self, sid: &str) -> Result<bool, SessionError> {
        match self.sessions.entry(sid.to_string()) {
            Entry::Occupied(occupied) => {
                self.store.remove::<Session>(sid)?;
                occupied.remove();
                Ok(true)
            }
            Entry::Vacant(_) => Ok(self.store.remove::<Session>(sid)?),
        }
    }

    /// Delete every expired session. Returns how many were removed.
    ///
    /// Each sid is re-checked under its map entry before the row goes, so a
    /// session recreated since the scan is left alone.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|e| e.value().is_expired(now))
            .map(|e| e.key().clone())
            .collect();

        let mut removed = 0;
        for sid in expired {
            let Entry::Occupied(occupied) = self.sessions.entry(sid) else {
                continue;
            };
            if !occupied.get().is_expired(now) {
                continue;
            }
            if let Err(e) = self.store.remove::<Session>(occupied.key()) {
                warn!("failed to delete expired session: {e}");
                continue;
            }
            occupied.remove();
            removed += 1;
        }
        if removed > 0 {
            debug!("swept {removed} expired session(s)");
        }
        removed
    }

    /// Sessions held in memory, expired or not.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
