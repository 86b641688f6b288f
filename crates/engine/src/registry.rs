//! Session Entity Registry
//!
//! Maps normalized raw values to their canonical masked tokens per session,
//! so the same sensitive value always masks to the same token within one
//! session regardless of call order or content chunking. Token assignment is
//! get-or-insert under a per-session mutex; no registry-wide lock is ever
//! held while a token is computed, so independent sessions never contend.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::error::EngineError;

/// Boundary for the session-consistency store. The engine ships and defaults
/// to the in-memory [`EntityRegistry`]; a shared backend (e.g. Redis) can be
/// swapped in behind the same contract to share consistency across engine
/// instances.
pub trait SessionStore: Send + Sync {
    /// Look up the token for `key` in `session_id`, computing and storing it
    /// via `compute` when absent. Must be atomic per session: two concurrent
    /// calls with the same new key converge on one token.
    fn resolve(
        &self,
        session_id: &str,
        key: &str,
        compute: &mut dyn FnMut() -> String,
    ) -> Result<String, EngineError>;

    /// Number of live sessions (after expiry), for health reporting.
    fn session_count(&self) -> usize;

    /// Opportunistic housekeeping hook; the service calls this periodically.
    fn sweep(&self) {}
}

struct SessionEntry {
    tokens: HashMap<String, String>,
    /// Keys in least-recently-used-first order.
    lru: VecDeque<String>,
    last_touch: Instant,
}

impl SessionEntry {
    fn new() -> Self {
        SessionEntry {
            tokens: HashMap::new(),
            lru: VecDeque::new(),
            last_touch: Instant::now(),
        }
    }

    fn touch_key(&mut self, key: &str) {
        if let Some(pos) = self.lru.iter().position(|k| k == key) {
            self.lru.remove(pos);
        }
        self.lru.push_back(key.to_string());
    }
}

/// In-memory session store with a per-session LRU bound and idle TTL.
pub struct EntityRegistry {
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionEntry>>>>,
    max_entries_per_session: usize,
    idle_ttl: Duration,
}

impl EntityRegistry {
    pub const DEFAULT_MAX_ENTRIES: usize = 512;
    pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(30 * 60);

    pub fn new(max_entries_per_session: usize, idle_ttl: Duration) -> Self {
        EntityRegistry {
            sessions: RwLock::new(HashMap::new()),
            max_entries_per_session: max_entries_per_session.max(1),
            idle_ttl,
        }
    }

    fn session(&self, session_id: &str) -> Result<Arc<Mutex<SessionEntry>>, EngineError> {
        {
            let sessions = self
                .sessions
                .read()
                .map_err(|_| EngineError::RegistryUnavailable("session map poisoned".into()))?;
            if let Some(entry) = sessions.get(session_id) {
                return Ok(entry.clone());
            }
        }
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| EngineError::RegistryUnavailable("session map poisoned".into()))?;
        Ok(sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SessionEntry::new())))
            .clone())
    }

    /// Drop sessions idle longer than the TTL. Called opportunistically by
    /// the service; there is no background task to manage.
    pub fn sweep_expired(&self) {
        let Ok(mut sessions) = self.sessions.write() else {
            return;
        };
        sessions.retain(|_, entry| match entry.lock() {
            Ok(guard) => guard.last_touch.elapsed() < self.idle_ttl,
            Err(_) => false,
        });
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        EntityRegistry::new(Self::DEFAULT_MAX_ENTRIES, Self::DEFAULT_IDLE_TTL)
    }
}

impl SessionStore for EntityRegistry {
    fn resolve(
        &self,
        session_id: &str,
        key: &str,
        compute: &mut dyn FnMut() -> String,
    ) -> Result<String, EngineError> {
        let entry = self.session(session_id)?;
        let mut guard = entry
            .lock()
            .map_err(|_| EngineError::RegistryUnavailable("session poisoned".into()))?;

        // An idle session past its TTL starts fresh rather than reviving
        // stale tokens.
        if guard.last_touch.elapsed() >= self.idle_ttl {
            guard.tokens.clear();
            guard.lru.clear();
        }
        guard.last_touch = Instant::now();

        if let Some(token) = guard.tokens.get(key) {
            let token = token.clone();
            guard.touch_key(key);
            return Ok(token);
        }

        let token = compute();
        guard.tokens.insert(key.to_string(), token.clone());
        guard.touch_key(key);

        while guard.tokens.len() > self.max_entries_per_session {
            match guard.lru.pop_front() {
                Some(oldest) => {
                    guard.tokens.remove(&oldest);
                }
                None => break,
            }
        }

        Ok(token)
    }

    fn session_count(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    fn sweep(&self) {
        self.sweep_expired();
    }
}
