//! Time-bounded named locks shared by world-level and cell-level callers.
//!
//! A lock is identified by an opaque resource string. Expiry is lazy: every
//! query compares against the clock, and [`LockManager::sweep_expired`] drops
//! dead entries in bulk.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use gt_rs_store::Clock;
use thiserror::Error;
use tracing::debug;

// ---------------------------------------------------------------------------
// Resource ids
// ---------------------------------------------------------------------------

/// The two kinds of lockable resource, with an unambiguous string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceId {
    /// `world:<id>`
    World(u64),
    /// `block:<worldId>:<x>:<y>`
    Cell { world_id: u64, x: i32, y: i32 },
}

impl ResourceId {
    pub fn world(world_id: u64) -> Self {
        ResourceId::World(world_id)
    }

    pub fn cell(world_id: u64, x: i32, y: i32) -> Self {
        ResourceId::Cell { world_id, x, y }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceId::World(id) => write!(f, "world:{id}"),
            ResourceId::Cell { world_id, x, y } => write!(f, "block:{world_id}:{x}:{y}"),
        }
    }
}

impl FromStr for ResourceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || format!("not a resource id: {s:?}");
        let mut parts = s.split(':');
        match parts.next() {
            Some("world") => {
                let id = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
                if parts.next().is_some() {
                    return Err(bad());
                }
                Ok(ResourceId::World(id))
            }
            Some("block") => {
                let world_id = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
                let x = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
                let y = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
                if parts.next().is_some() {
                    return Err(bad());
                }
                Ok(ResourceId::Cell { world_id, x, y })
            }
            _ => Err(bad()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tokens and grants
// ---------------------------------------------------------------------------

/// Opaque proof of lock ownership.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    fn generate() -> Self {
        Self(format!("{:016x}", rand::random::<u64>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for LockToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for LockToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of a successful [`LockManager::acquire`].
#[derive(Debug, Clone)]
pub struct LockGrant {
    pub resource: String,
    pub holder: String,
    pub token: LockToken,
    pub expires_at: u64,
    /// The holder already owned this lock; the existing token was extended.
    pub renewed: bool,
}

/// Snapshot of a live lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    pub holder: String,
    pub token: LockToken,
    pub expires_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("{resource} is held by {holder}")]
    AlreadyLocked { resource: String, holder: String },

    #[error("token does not hold {resource}")]
    NotHolder { resource: String },

    #[error("lock on {resource} has expired")]
    Expired { resource: String },
}

#[derive(Debug, Clone)]
struct LockEntry {
    holder: String,
    token: LockToken,
    expires_at: u64,
}

impl LockEntry {
    fn is_live(&self, now: u64) -> bool {
        now < self.expires_at
    }

    fn info(&self) -> LockInfo {
        LockInfo {
            holder: self.holder.clone(),
            token: self.token.clone(),
            expires_at: self.expires_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Keyed mutex table. Sharded, so unrelated resources never contend on a
/// single global lock.
pub struct LockManager {
    locks: DashMap<String, LockEntry>,
    clock: Arc<dyn Clock>,
}

impl LockManager {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            locks: DashMap::new(),
            clock,
        }
    }

    /// Claim `resource` for `holder` for `ttl`.
    ///
    /// An expired lock is taken over. A live lock already owned by `holder`
    /// is renewed (expiry becomes the later of the current expiry and
    /// `now + ttl`) and keeps its token. A live lock owned by someone else
    /// fails with [`LockError::AlreadyLocked`].
    pub fn acquire(
        &self,
        resource: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<LockGrant, LockError> {
        let now = self.clock.now_ms();
        let deadline = self.clock.deadline(ttl);

        match self.locks.entry(resource.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.is_live(now) {
                    if entry.holder != holder {
                        return Err(LockError::AlreadyLocked {
                            resource: resource.to_string(),
                            holder: entry.holder.clone(),
                        });
                    }
                    entry.expires_at = entry.expires_at.max(deadline);
                    return Ok(LockGrant {
                        resource: resource.to_string(),
                        holder: holder.to_string(),
                        token: entry.token.clone(),
                        expires_at: entry.expires_at,
                        renewed: true,
                    });
                }

                debug!("taking over expired lock {resource} from {}", entry.holder);
                let fresh = LockEntry {
                    holder: holder.to_string(),
                    token: LockToken::generate(),
                    expires_at: deadline,
                };
                let grant = Self::grant(resource, &fresh);
                occupied.insert(fresh);
                Ok(grant)
            }
            Entry::Vacant(vacant) => {
                let fresh = LockEntry {
                    holder: holder.to_string(),
                    token: LockToken::generate(),
                    expires_at: deadline,
                };
                let grant = Self::grant(resource, &fresh);
                vacant.insert(fresh);
                Ok(grant)
            }
        }
    }

    fn grant(resource: &str, entry: &LockEntry) -> LockGrant {
        LockGrant {
            resource: resource.to_string(),
            holder: entry.holder.clone(),
            token: entry.token.clone(),
            expires_at: entry.expires_at,
            renewed: false,
        }
    }

    /// Release a lock. A mismatched token fails with
    /// [`LockError::NotHolder`] and leaves the lock untouched; a matching
    /// but already expired token drops the stale entry and reports
    /// [`LockError::Expired`].
    pub fn release(&self, resource: &str, token: &LockToken) -> Result<(), LockError> {
        let now = self.clock.now_ms();
        match self.locks.entry(resource.to_string()) {
            Entry::Occupied(occupied) => {
                if occupied.get().token != *token {
                    return Err(LockError::NotHolder {
                        resource: resource.to_string(),
                    });
                }
                let live = occupied.get().is_live(now);
                occupied.remove();
                if live {
                    Ok(())
                } else {
                    Err(LockError::Expired {
                        resource: resource.to_string(),
                    })
                }
            }
            Entry::Vacant(_) => Err(LockError::NotHolder {
                resource: resource.to_string(),
            }),
        }
    }

    /// Extend a live lock to `now + ttl`. Returns the new expiry.
    pub fn renew(&self, resource: &str, token: &LockToken, ttl: Duration) -> Result<u64, LockError> {
        let now = self.clock.now_ms();
        let deadline = self.clock.deadline(ttl);
        match self.locks.entry(resource.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().token != *token {
                    return Err(LockError::NotHolder {
                        resource: resource.to_string(),
                    });
                }
                if !occupied.get().is_live(now) {
                    occupied.remove();
                    return Err(LockError::Expired {
                        resource: resource.to_string(),
                    });
                }
                occupied.get_mut().expires_at = deadline;
                Ok(deadline)
            }
            Entry::Vacant(_) => Err(LockError::NotHolder {
                resource: resource.to_string(),
            }),
        }
    }

    pub fn is_locked(&self, resource: &str) -> bool {
        self.holder(resource).is_some()
    }

    /// The live holder of `resource`, if any.
    pub fn holder(&self, resource: &str) -> Option<LockInfo> {
        let now = self.clock.now_ms();
        self.locks
            .get(resource)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.info())
    }

    /// Whether `token` is the live token for `resource`.
    pub fn is_held_with(&self, resource: &str, token: &str) -> bool {
        let now = self.clock.now_ms();
        self.locks
            .get(resource)
            .is_some_and(|entry| entry.is_live(now) && entry.token.as_str() == token)
    }

    /// Drop every expired entry. Returns the affected resource ids.
    pub fn sweep_expired(&self) -> Vec<String> {
        let now = self.clock.now_ms();
        let mut expired = Vec::new();
        self.locks.retain(|resource, entry| {
            if entry.is_live(now) {
                true
            } else {
                expired.push(resource.clone());
                false
            }
        });
        if !expired.is_empty() {
            debug!("swept {} expired lock(s)", expired.len());
        }
        expired
    }

    /// Number of entries, live or not yet swept.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
