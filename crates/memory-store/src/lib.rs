//! Long-lived, cross-session fact store.
//!
//! Facts are append-only and outlive the session that produced them. Queries
//! rank by similarity to the current context through a pluggable
//! [`Embedder`]; ranking is deterministic for identical inputs, and equal
//! scores break toward the newer fact so fresher knowledge supersedes stale
//! knowledge without in-place updates.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use voxpilot_core_types::{FactId, SessionId};

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("memory transport unavailable: {0}")]
    Unavailable(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryFact {
    pub id: FactId,
    /// Session the fact originated from; the fact itself is global.
    pub session: SessionId,
    pub content: String,
    pub payload: Value,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct RankedFact {
    pub fact: MemoryFact,
    pub score: f32,
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct MemoryStats {
    pub facts: usize,
    pub capacity: usize,
}

/// Text-to-vector capability. The ranking metric stays pluggable; the store
/// only requires determinism.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;
    fn dimension(&self) -> usize;
}

/// Deterministic bag-of-words embedder: each token hashes into one of
/// `DIM` buckets, the bucket counts are L2-normalized. No external model,
/// identical input always yields the identical vector.
pub struct HashEmbedder;

const DIM: usize = 64;

impl HashEmbedder {
    fn fnv1a(token: &str) -> u64 {
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in token.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x100000001b3);
        }
        hash
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut buckets = vec![0.0f32; DIM];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let token = token.to_ascii_lowercase();
            let bucket = (Self::fnv1a(&token) % DIM as u64) as usize;
            buckets[bucket] += 1.0;
        }
        let norm = buckets.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut buckets {
                *value /= norm;
            }
        }
        buckets
    }

    fn dimension(&self) -> usize {
        DIM
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    // vectors from the embedder are already unit length
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Transport contract for the persistent memory layer.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Append a fact. Returns its id.
    async fn store(
        &self,
        session: &SessionId,
        content: &str,
        payload: Value,
    ) -> Result<FactId, MemoryError>;

    /// Facts ranked by relevance to `context`, best first.
    async fn query(&self, context: &str, top_k: usize) -> Result<Vec<RankedFact>, MemoryError>;

    async fn stats(&self) -> Result<MemoryStats, MemoryError>;
}

/// In-memory implementation with a hard capacity bound; the oldest facts are
/// evicted first, keeping growth bounded without an update operation.
pub struct InMemoryMemoryStore {
    facts: RwLock<Vec<MemoryFact>>,
    embedder: Arc<dyn Embedder>,
    capacity: usize,
}

impl InMemoryMemoryStore {
    pub fn new(embedder: Arc<dyn Embedder>, capacity: usize) -> Self {
        Self {
            facts: RwLock::new(Vec::new()),
            embedder,
            capacity: capacity.max(1),
        }
    }

    pub fn with_default_embedder(capacity: usize) -> Self {
        Self::new(Arc::new(HashEmbedder), capacity)
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn store(
        &self,
        session: &SessionId,
        content: &str,
        payload: Value,
    ) -> Result<FactId, MemoryError> {
        let fact = MemoryFact {
            id: FactId::new(),
            session: session.clone(),
            content: content.to_string(),
            payload,
            embedding: self.embedder.embed(content),
            created_at: Utc::now(),
        };
        let id = fact.id.clone();
        let mut facts = self.facts.write();
        facts.push(fact);
        while facts.len() > self.capacity {
            facts.remove(0);
        }
        debug!(session = %session, facts = facts.len(), "stored memory fact");
        Ok(id)
    }

    async fn query(&self, context: &str, top_k: usize) -> Result<Vec<RankedFact>, MemoryError> {
        if context.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let query = self.embedder.embed(context);
        let facts = self.facts.read();
        let mut ranked: Vec<RankedFact> = facts
            .iter()
            .map(|fact| RankedFact {
                score: cosine(&query, &fact.embedding),
                fact: fact.clone(),
            })
            .collect();
        // quantize so float noise cannot flip the recency tie-break
        ranked.sort_by(|a, b| {
            let qa = (a.score * 1_000_000.0) as i64;
            let qb = (b.score * 1_000_000.0) as i64;
            qb.cmp(&qa)
                .then_with(|| b.fact.created_at.cmp(&a.fact.created_at))
                .then_with(|| b.fact.id.0.cmp(&a.fact.id.0))
        });
        ranked.truncate(top_k);
        Ok(ranked)
    }

    async fn stats(&self) -> Result<MemoryStats, MemoryError> {
        Ok(MemoryStats {
            facts: self.facts.read().len(),
            capacity: self.capacity,
        })
    }
}
