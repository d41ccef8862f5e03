// src/services/session_store.rs
//! In-memory, TTL-bounded session store.
//!
//! A session is created `Pending` when an authorization request is served
//! and becomes `Verified` once the wallet's proof checks out. The variant
//! stored is the session's state; absence means unknown or expired, and the
//! two are indistinguishable to callers.

use crate::models::protocol::AuthorizationRequest;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;

/// Default session lifetime and sweep interval.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, PartialEq)]
pub enum Session {
    /// Waiting for the wallet's proof.
    Pending(AuthorizationRequest),
    /// Holder DID returned by a successful proof check.
    Verified(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session {0} is unknown or expired")]
    Unknown(String),

    #[error("session {0} is already verified")]
    AlreadyClosed(String),
}

struct Entry {
    session: Session,
    expires_at: Instant,
}

/// Thread-safe session map. Every mutation takes the single lock, so
/// concurrent callbacks for one session are serialised.
pub struct SessionStore {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TTL)
    }
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        // A panic while holding the lock cannot leave a half-written entry.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn live<'a>(entries: &'a mut HashMap<String, Entry>, id: &str) -> Option<&'a mut Entry> {
        let now = Instant::now();
        if entries.get(id).is_some_and(|e| e.expires_at <= now) {
            entries.remove(id);
        }
        entries.get_mut(id)
    }

    /// Stores a new pending session.
    ///
    /// # Returns
    /// `false`, leaving the store untouched, if `id` is already in use.
    pub fn put_pending(&self, id: &str, request: AuthorizationRequest) -> bool {
        let mut entries = self.lock();
        if Self::live(&mut entries, id).is_some() {
            return false;
        }
        entries.insert(
            id.to_string(),
            Entry {
                session: Session::Pending(request),
                expires_at: Instant::now() + self.ttl,
            },
        );
        true
    }

    /// Writes `session` under `id`.
    ///
    /// A `Pending` write over an existing session is a no-op, and a
    /// `Verified` session is never overwritten.
    pub fn put(&self, id: &str, session: Session) -> Result<(), SessionError> {
        let mut entries = self.lock();
        let expires_at = Instant::now() + self.ttl;
        match (Self::live(&mut entries, id), session) {
            (Some(entry), _) if matches!(entry.session, Session::Verified(_)) => {
                Err(SessionError::AlreadyClosed(id.to_string()))
            }
            (Some(_), Session::Pending(_)) => Ok(()),
            (Some(entry), verified) => {
                entry.session = verified;
                entry.expires_at = expires_at;
                Ok(())
            }
            (None, session) => {
                entries.insert(
                    id.to_string(),
                    Entry {
                        session,
                        expires_at,
                    },
                );
                Ok(())
            }
        }
    }

    /// Returns the live session under `id`.
    pub fn get(&self, id: &str) -> Option<Session> {
        let mut entries = self.lock();
        Self::live(&mut entries, id).map(|e| e.session.clone())
    }

    /// Moves a pending session to `Verified(did)`.
    ///
    /// # Errors
    /// - `Unknown` if there is no live session under `id`
    /// - `AlreadyClosed` if the session was verified already
    pub fn complete(&self, id: &str, did: &str) -> Result<(), SessionError> {
        let mut entries = self.lock();
        let ttl = self.ttl;
        let entry = Self::live(&mut entries, id).ok_or_else(|| SessionError::Unknown(id.into()))?;
        match entry.session {
            Session::Verified(_) => Err(SessionError::AlreadyClosed(id.to_string())),
            Session::Pending(_) => {
                entry.session = Session::Verified(did.to_string());
                entry.expires_at = Instant::now() + ttl;
                Ok(())
            }
        }
    }

    /// Drops every session expired at `now`.
    ///
    /// # Returns
    /// The number of sessions removed.
    pub fn expire_eligible(&self, now: Instant) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs [`expire_eligible`](Self::expire_eligible) every `interval` on
    /// the current runtime.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = store.expire_eligible(Instant::now());
                if removed > 0 {
                    log::debug!("expired {} sessions", removed);
                }
            }
        })
    }
}
