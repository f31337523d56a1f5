use std::cmp::Ordering;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::embedding::{self, Embedder};

/// Prefix every stored reasoning fragment carries.
pub const MEMORY_TAG: &str = "[MEMORY]";

/// A stored reasoning fragment and its unit-length embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryFragment {
    pub id: usize,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// A search hit with its cosine similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredFragment {
    pub id: usize,
    pub text: String,
    pub score: f32,
}

/// Parallel fragment/embedding sequences; ids are insertion indices.
#[derive(Debug, Default)]
struct Fragments {
    texts: Vec<String>,
    embeddings: Vec<Vec<f32>>,
}

/// In-process similarity store for past reasoning output.
/// All reads and writes of the parallel sequences go through one lock.
pub struct MemoryStore {
    embedder: Arc<dyn Embedder>,
    inner: Mutex<Fragments>,
}

/// Format a reasoning result for storage.
pub fn fragment_text(output: &str, context: &str) -> String {
    format!("{MEMORY_TAG} {} | context: {}", output.trim(), context.trim())
}

impl MemoryStore {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            inner: Mutex::new(Fragments::default()),
        }
    }

    /// Embed and append `text`. Returns its id.
    pub async fn add(&self, text: impl Into<String>) -> usize {
        let text = text.into();
        let mut emb = self.embedder.embed(&text);
        embedding::normalize(&mut emb);

        let mut inner = self.inner.lock().await;
        let id = inner.texts.len();
        inner.texts.push(text);
        inner.embeddings.push(emb);
        debug_assert_eq!(inner.texts.len(), inner.embeddings.len());
        tracing::debug!(id, total = inner.texts.len(), "memory fragment added");
        id
    }

    /// Top-`k` fragment texts, most similar first.
    pub async fn search(&self, query: &str, k: usize) -> Vec<String> {
        self.search_scored(query, k)
            .await
            .into_iter()
            .map(|f| f.text)
            .collect()
    }

    /// Top-`k` fragments with scores. Ties keep insertion order.
    pub async fn search_scored(&self, query: &str, k: usize) -> Vec<ScoredFragment> {
        if k == 0 || self.is_empty().await {
            return Vec::new();
        }
        let mut q = self.embedder.embed(query);
        embedding::normalize(&mut q);

        let inner = self.inner.lock().await;
        let mut scored: Vec<(usize, f32)> = inner
            .embeddings
            .iter()
            .enumerate()
            .map(|(i, e)| (i, embedding::dot(e, &q)))
            .collect();
        // stable sort: equal scores stay in insertion order
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scored
            .into_iter()
            .take(k)
            .map(|(id, score)| ScoredFragment {
                id,
                text: inner.texts[id].clone(),
                score,
            })
            .collect()
    }

    pub async fn get(&self, id: usize) -> Option<MemoryFragment> {
        let inner = self.inner.lock().await;
        Some(MemoryFragment {
            id,
            text: inner.texts.get(id)?.clone(),
            embedding: inner.embeddings.get(id)?.clone(),
        })
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.texts.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// (fragments, embeddings) lengths, read under one lock acquisition.
    pub async fn lengths(&self) -> (usize, usize) {
        let inner = self.inner.lock().await;
        (inner.texts.len(), inner.embeddings.len())
    }
}
