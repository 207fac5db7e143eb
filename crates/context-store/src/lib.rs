//! Session-scoped working memory.
//!
//! Every value is keyed under one session and carries an expiry; reads never
//! observe expired entries, and a session's entries disappear with the
//! session. The engine is the only writer for a given session, so writes
//! land in the order they were issued.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use voxpilot_core_types::SessionId;

/// Turn history is bounded per session; oldest entries fall off.
const MAX_TURNS: usize = 50;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("unknown session {0}")]
    UnknownSession(String),
    #[error("context transport unavailable: {0}")]
    Unavailable(String),
}

/// One recorded conversation turn (submitted intent plus its outcome).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn: u64,
    pub payload: Value,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct ContextStats {
    pub entries: usize,
    pub turns: u64,
}

/// Transport contract for the per-session key/value cache.
#[async_trait]
pub trait ContextStore: Send + Sync {
    async fn get(&self, session: &SessionId, key: &str) -> Result<Option<Value>, ContextError>;

    async fn set(
        &self,
        session: &SessionId,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<(), ContextError>;

    /// Last-write-wins per key.
    async fn merge(
        &self,
        session: &SessionId,
        patch: BTreeMap<String, Value>,
        ttl: Option<Duration>,
    ) -> Result<(), ContextError>;

    /// All live entries for a session; the planner treats this as its
    /// immutable context snapshot.
    async fn snapshot(&self, session: &SessionId) -> Result<BTreeMap<String, Value>, ContextError>;

    /// Append to the session's bounded turn history. Returns the turn number.
    async fn push_turn(&self, session: &SessionId, payload: Value) -> Result<u64, ContextError>;

    /// Most recent turns first.
    async fn recent_turns(
        &self,
        session: &SessionId,
        limit: usize,
    ) -> Result<Vec<TurnRecord>, ContextError>;

    async fn stats(&self, session: &SessionId) -> Result<ContextStats, ContextError>;

    /// Drop everything the session owns.
    async fn end_session(&self, session: &SessionId) -> Result<(), ContextError>;
}

#[derive(Debug)]
struct StoredEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

#[derive(Debug, Default)]
struct SessionContext {
    entries: HashMap<String, StoredEntry>,
    turns: VecDeque<TurnRecord>,
    turn_seq: u64,
}

impl SessionContext {
    fn purge_expired(&mut self, now: Instant) {
        self.entries.retain(|_, entry| !entry.expired(now));
    }
}

/// In-memory implementation backing tests and single-process deployments.
pub struct InMemoryContextStore {
    sessions: DashMap<SessionId, Arc<RwLock<SessionContext>>>,
    default_ttl: Duration,
}

impl InMemoryContextStore {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            default_ttl,
        }
    }

    fn session(&self, session: &SessionId) -> Arc<RwLock<SessionContext>> {
        self.sessions
            .entry(session.clone())
            .or_insert_with(|| Arc::new(RwLock::new(SessionContext::default())))
            .clone()
    }

    /// Sweep expired entries across all sessions. Reads already skip expired
    /// values; this just reclaims the space.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        for entry in self.sessions.iter() {
            entry.value().write().purge_expired(now);
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for InMemoryContextStore {
    fn default() -> Self {
        // matches the 1h session TTL of the original cache layer
        Self::new(Duration::from_secs(3600))
    }
}

#[async_trait]
impl ContextStore for InMemoryContextStore {
    async fn get(&self, session: &SessionId, key: &str) -> Result<Option<Value>, ContextError> {
        let ctx = match self.sessions.get(session) {
            Some(entry) => Arc::clone(entry.value()),
            None => return Ok(None),
        };
        let now = Instant::now();
        let mut guard = ctx.write();
        let expired = match guard.entries.get(key) {
            Some(entry) => entry.expired(now),
            None => return Ok(None),
        };
        if expired {
            guard.entries.remove(key);
            return Ok(None);
        }
        Ok(guard.entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(
        &self,
        session: &SessionId,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<(), ContextError> {
        let ctx = self.session(session);
        let expires_at = Some(Instant::now() + ttl.unwrap_or(self.default_ttl));
        ctx.write().entries.insert(
            key.to_string(),
            StoredEntry { value, expires_at },
        );
        Ok(())
    }

    async fn merge(
        &self,
        session: &SessionId,
        patch: BTreeMap<String, Value>,
        ttl: Option<Duration>,
    ) -> Result<(), ContextError> {
        let ctx = self.session(session);
        let expires_at = Some(Instant::now() + ttl.unwrap_or(self.default_ttl));
        let mut guard = ctx.write();
        for (key, value) in patch {
            guard.entries.insert(key, StoredEntry { value, expires_at });
        }
        Ok(())
    }

    async fn snapshot(&self, session: &SessionId) -> Result<BTreeMap<String, Value>, ContextError> {
        let ctx = match self.sessions.get(session) {
            Some(entry) => Arc::clone(entry.value()),
            None => return Ok(BTreeMap::new()),
        };
        let now = Instant::now();
        let mut guard = ctx.write();
        guard.purge_expired(now);
        Ok(guard
            .entries
            .iter()
            .map(|(k, entry)| (k.clone(), entry.value.clone()))
            .collect())
    }

    async fn push_turn(&self, session: &SessionId, payload: Value) -> Result<u64, ContextError> {
        let ctx = self.session(session);
        let mut guard = ctx.write();
        guard.turn_seq += 1;
        let turn = guard.turn_seq;
        guard.turns.push_back(TurnRecord {
            turn,
            payload,
            recorded_at: Utc::now(),
        });
        while guard.turns.len() > MAX_TURNS {
            guard.turns.pop_front();
        }
        debug!(session = %session, turn, "recorded conversation turn");
        Ok(turn)
    }

    async fn recent_turns(
        &self,
        session: &SessionId,
        limit: usize,
    ) -> Result<Vec<TurnRecord>, ContextError> {
        let ctx = match self.sessions.get(session) {
            Some(entry) => Arc::clone(entry.value()),
            None => return Ok(Vec::new()),
        };
        let guard = ctx.read();
        Ok(guard.turns.iter().rev().take(limit).cloned().collect())
    }

    async fn stats(&self, session: &SessionId) -> Result<ContextStats, ContextError> {
        let ctx = match self.sessions.get(session) {
            Some(entry) => Arc::clone(entry.value()),
            None => return Ok(ContextStats::default()),
        };
        let now = Instant::now();
        let mut guard = ctx.write();
        guard.purge_expired(now);
        Ok(ContextStats {
            entries: guard.entries.len(),
            turns: guard.turn_seq,
        })
    }

    async fn end_session(&self, session: &SessionId) -> Result<(), ContextError> {
        self.sessions.remove(session);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_get_round_trip() {
        let store = InMemoryContextStore::default();
        let session = SessionId::new();
        store
            .set(&session, "current_url", json!("https://example.com"), None)
            .await
            .unwrap();
        let value = store.get(&session, "current_url").await.unwrap();
        assert_eq!(value, Some(json!("https://example.com")));
        assert_eq!(store.get(&session, "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_entries_are_invisible() {
        let store = InMemoryContextStore::default();
        let session = SessionId::new();
        store
            .set(&session, "flash", json!(1), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(store.get(&session, "flash").await.unwrap(), None);
        assert!(store.snapshot(&session).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn merge_is_last_write_wins() {
        let store = InMemoryContextStore::default();
        let session = SessionId::new();
        store
            .merge(
                &session,
                BTreeMap::from([("a".to_string(), json!(1)), ("b".to_string(), json!(2))]),
                None,
            )
            .await
            .unwrap();
        store
            .merge(&session, BTreeMap::from([("a".to_string(), json!(9))]), None)
            .await
            .unwrap();
        let snapshot = store.snapshot(&session).await.unwrap();
        assert_eq!(snapshot["a"], json!(9));
        assert_eq!(snapshot["b"], json!(2));
    }

    #[tokio::test]
    async fn turn_history_is_bounded_and_newest_first() {
        let store = InMemoryContextStore::default();
        let session = SessionId::new();
        for i in 0..(MAX_TURNS as u64 + 5) {
            store.push_turn(&session, json!({ "turn": i })).await.unwrap();
        }
        let turns = store.recent_turns(&session, 3).await.unwrap();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].turn, MAX_TURNS as u64 + 5);
        assert!(turns[0].turn > turns[1].turn);

        let stats = store.stats(&session).await.unwrap();
        assert_eq!(stats.turns, MAX_TURNS as u64 + 5);
    }

    #[tokio::test]
    async fn end_session_drops_everything() {
        let store = InMemoryContextStore::default();
        let session = SessionId::new();
        store.set(&session, "k", json!(true), None).await.unwrap();
        store.push_turn(&session, json!({})).await.unwrap();
        store.end_session(&session).await.unwrap();
        assert_eq!(store.get(&session, "k").await.unwrap(), None);
        assert!(store.recent_turns(&session, 10).await.unwrap().is_empty());
        assert_eq!(store.session_count(), 0);
    }
}
