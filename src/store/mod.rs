//! Search-store abstraction.
//!
//! The [`SurveyStore`] trait covers every operation the indexing pipeline and
//! the search command need from the search engine: connectivity check, index
//! lifecycle, bulk writes and nested nearest-neighbor queries. Two backends
//! are provided:
//!
//! - [`ElasticsearchStore`]: talks to an Elasticsearch cluster over its REST API.
//! - [`InMemoryStore`]: `HashMap`-backed, brute-force cosine search; used in tests.
//!
//! Implementations must be `Send + Sync`; one instance is shared behind an
//! `Arc` by the CLI, the server and background jobs.

pub mod elasticsearch;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::UserDocument;

pub use elasticsearch::ElasticsearchStore;
pub use memory::InMemoryStore;

/// Identity of the cluster behind a store.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterInfo {
    pub cluster_name: String,
    pub version: String,
}

/// A document the store refused during a bulk write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkFailure {
    pub user_id: String,
    /// HTTP status reported for the item.
    pub status: u16,
    pub reason: String,
}

/// Result of one bulk write. Per-document failures never abort the batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkOutcome {
    pub success_count: usize,
    pub failures: Vec<BulkFailure>,
}

/// Nearest-neighbor query over `qa_pairs.answer_vector`.
#[derive(Debug, Clone)]
pub struct KnnQuery {
    pub vector: Vec<f32>,
    /// Number of documents to return.
    pub k: usize,
    /// Candidates considered per shard before the top `k` are picked.
    pub num_candidates: usize,
    /// Wildcard pattern (`*`, `?`) matched against `qa_pairs.q_text.keyword`.
    pub question_pattern: Option<String>,
}

/// One matching user document and its closest statement.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub user_id: String,
    pub score: f64,
    pub q_text: Option<String>,
    pub answer_text: Option<String>,
}

/// Abstract search-engine backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`info`](SurveyStore::info) | Connectivity check; cluster name and version |
/// | [`index_exists`](SurveyStore::index_exists) | Whether an index is present |
/// | [`create_index`](SurveyStore::create_index) | Create an index with a mapping |
/// | [`delete_index`](SurveyStore::delete_index) | Drop an index (absent is not an error) |
/// | [`get_mapping`](SurveyStore::get_mapping) | Current mapping, if the index exists |
/// | [`bulk_index`](SurveyStore::bulk_index) | Write documents keyed by user id |
/// | [`refresh`](SurveyStore::refresh) | Make written documents searchable |
/// | [`get_document`](SurveyStore::get_document) | Fetch one document by user id |
/// | [`count`](SurveyStore::count) | Number of documents in an index |
/// | [`knn_search`](SurveyStore::knn_search) | Nested nearest-neighbor query |
#[async_trait]
pub trait SurveyStore: Send + Sync {
    async fn info(&self) -> Result<ClusterInfo>;

    async fn index_exists(&self, index: &str) -> Result<bool>;

    /// Create `index` with the given `mappings` object. Creating an index
    /// that already exists is not an error and leaves it untouched.
    async fn create_index(&self, index: &str, mappings: &serde_json::Value) -> Result<()>;

    async fn delete_index(&self, index: &str) -> Result<()>;

    async fn get_mapping(&self, index: &str) -> Result<Option<serde_json::Value>>;

    /// Write every document with its `user_id` as the document id,
    /// replacing any existing document with that id.
    async fn bulk_index(&self, index: &str, docs: &[UserDocument]) -> Result<BulkOutcome>;

    async fn refresh(&self, index: &str) -> Result<()>;

    async fn get_document(&self, index: &str, user_id: &str) -> Result<Option<UserDocument>>;

    async fn count(&self, index: &str) -> Result<u64>;

    async fn knn_search(&self, index: &str, query: &KnnQuery) -> Result<Vec<SearchHit>>;
}

/// Match `text` against a wildcard pattern where `*` matches any run of
/// characters and `?` matches exactly one.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut resume = 0usize;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            resume = ti;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            resume += 1;
            ti = resume;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_patterns() {
        assert!(wildcard_match("*갤럭시*", "보유 휴대폰 갤럭시 모델"));
        assert!(wildcard_match("*", ""));
        assert!(wildcard_match("Q?", "Q1"));
        assert!(wildcard_match("phone*", "phone brand"));
        assert!(!wildcard_match("phone*", "my phone"));
        assert!(!wildcard_match("Q?", "Q10"));
        assert!(wildcard_match("a*b*c", "aXXbYYc"));
        assert!(!wildcard_match("a*b*c", "aXXbYY"));
    }
}
