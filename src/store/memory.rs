//! In-memory [`SurveyStore`] implementation for testing.
//!
//! Uses `HashMap` behind `std::sync::RwLock` for thread safety.
//! Vector search is brute-force cosine similarity over every nested
//! statement; a document scores as its best statement.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::UserDocument;

use super::{wildcard_match, BulkFailure, BulkOutcome, ClusterInfo, KnnQuery, SearchHit, SurveyStore};

struct MemoryIndex {
    mappings: serde_json::Value,
    docs: HashMap<String, UserDocument>,
}

/// In-memory store for tests.
///
/// [`set_available`](InMemoryStore::set_available) simulates an unreachable
/// cluster and [`reject_user`](InMemoryStore::reject_user) simulates
/// per-document bulk failures.
pub struct InMemoryStore {
    indices: RwLock<HashMap<String, MemoryIndex>>,
    rejected: RwLock<HashSet<String>>,
    available: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            indices: RwLock::new(HashMap::new()),
            rejected: RwLock::new(HashSet::new()),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make every future bulk write of `user_id` fail with status 400.
    pub fn reject_user(&self, user_id: &str) {
        if let Ok(mut rejected) = self.rejected.write() {
            rejected.insert(user_id.to_string());
        }
    }

    fn check_available(&self) -> Result<()> {
        if !self.available.load(Ordering::SeqCst) {
            bail!("in-memory store is unavailable");
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, MemoryIndex>>> {
        self.check_available()?;
        self.indices
            .read()
            .map_err(|_| anyhow::anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, MemoryIndex>>> {
        self.check_available()?;
        self.indices
            .write()
            .map_err(|_| anyhow::anyhow!("in-memory store lock poisoned"))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn no_such_index(index: &str) -> anyhow::Error {
    anyhow::anyhow!("no such index [{}]", index)
}

#[async_trait]
impl SurveyStore for InMemoryStore {
    async fn info(&self) -> Result<ClusterInfo> {
        self.check_available()?;
        Ok(ClusterInfo {
            cluster_name: "in-memory".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        Ok(self.read()?.contains_key(index))
    }

    async fn create_index(&self, index: &str, mappings: &serde_json::Value) -> Result<()> {
        self.write()?
            .entry(index.to_string())
            .or_insert_with(|| MemoryIndex {
                mappings: mappings.clone(),
                docs: HashMap::new(),
            });
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> Result<()> {
        self.write()?.remove(index);
        Ok(())
    }

    async fn get_mapping(&self, index: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.read()?.get(index).map(|i| i.mappings.clone()))
    }

    async fn bulk_index(&self, index: &str, docs: &[UserDocument]) -> Result<BulkOutcome> {
        let rejected = self
            .rejected
            .read()
            .map_err(|_| anyhow::anyhow!("in-memory store lock poisoned"))?
            .clone();
        let mut indices = self.write()?;
        let target = indices.get_mut(index).ok_or_else(|| no_such_index(index))?;

        let mut outcome = BulkOutcome::default();
        for doc in docs {
            if rejected.contains(&doc.user_id) {
                outcome.failures.push(BulkFailure {
                    user_id: doc.user_id.clone(),
                    status: 400,
                    reason: "document rejected".to_string(),
                });
                continue;
            }
            target.docs.insert(doc.user_id.clone(), doc.clone());
            outcome.success_count += 1;
        }
        Ok(outcome)
    }

    async fn refresh(&self, index: &str) -> Result<()> {
        if !self.read()?.contains_key(index) {
            return Err(no_such_index(index));
        }
        Ok(())
    }

    async fn get_document(&self, index: &str, user_id: &str) -> Result<Option<UserDocument>> {
        let indices = self.read()?;
        let target = indices.get(index).ok_or_else(|| no_such_index(index))?;
        Ok(target.docs.get(user_id).cloned())
    }

    async fn count(&self, index: &str) -> Result<u64> {
        let indices = self.read()?;
        let target = indices.get(index).ok_or_else(|| no_such_index(index))?;
        Ok(target.docs.len() as u64)
    }

    async fn knn_search(&self, index: &str, query: &KnnQuery) -> Result<Vec<SearchHit>> {
        let indices = self.read()?;
        let target = indices.get(index).ok_or_else(|| no_such_index(index))?;

        let mut hits: Vec<SearchHit> = target
            .docs
            .values()
            .filter_map(|doc| {
                doc.qa_pairs
                    .iter()
                    .filter(|s| {
                        query
                            .question_pattern
                            .as_deref()
                            .is_none_or(|p| wildcard_match(p, &s.q_text))
                    })
                    .map(|s| (cosine_similarity(&query.vector, &s.answer_vector) as f64, s))
                    .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
                    .map(|(score, s)| SearchHit {
                        user_id: doc.user_id.clone(),
                        score,
                        q_text: Some(s.q_text.clone()),
                        answer_text: Some(s.answer_text.clone()),
                    })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        hits.truncate(query.k);
        Ok(hits)
    }
}
