use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::error::AuthnResult;

/// Opaque key/value cache consulted for refresh and revocation state.
///
/// Typically backed by Redis in production; the framework never relies on
/// anything beyond get/set/delete with an optional TTL.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn get(&self, key: &str) -> AuthnResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> AuthnResult<()>;

    async fn delete(&self, key: &str) -> AuthnResult<()>;
}

/// Blacklist key for a token: its `jti` when present, otherwise the hex SHA-256 of the token.
pub fn revocation_key(jti: Option<&str>, token: &str) -> String {
    match jti {
        Some(jti) if !jti.is_empty() => format!("revoked:{jti}"),
        _ => format!("revoked:{}", hex::encode(Sha256::digest(token.as_bytes()))),
    }
}

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// Process-local [`TokenStore`]. Expired entries are dropped lazily on read
/// and swept on every write.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self, key: &str) -> AuthnResult<Option<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> AuthnResult<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| entry.is_live(now));
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> AuthnResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}
