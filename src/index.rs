//! Index schema management and bulk writes.
//!
//! [`IndexManager`] owns the index name and the nested mapping for one
//! store. The mapping is derived from the embedding dimension and the text
//! analyzer, so it is fixed for the lifetime of the manager.

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::Config;
use crate::models::UserDocument;
use crate::store::{BulkOutcome, SurveyStore};

/// Longest `q_text` (in characters) kept in the `q_text.keyword` subfield
/// used by question-pattern filters. At four bytes per character this stays
/// under Lucene's 32766-byte term limit.
pub const Q_TEXT_KEYWORD_IGNORE_ABOVE: usize = 8191;

/// Build the `mappings` object for the survey index.
///
/// `qa_pairs` is `nested` so that each statement keeps its own question,
/// answer and vector together under search.
pub fn index_mapping(dims: usize, analyzer: &str) -> Value {
    json!({
        "properties": {
            "user_id": { "type": "keyword" },
            "timestamp": { "type": "date" },
            "template_version": { "type": "keyword" },
            "qa_pairs": {
                "type": "nested",
                "properties": {
                    "q_code": { "type": "keyword" },
                    "q_text": {
                        "type": "text",
                        "analyzer": analyzer,
                        "fields": {
                            "keyword": { "type": "keyword", "ignore_above": Q_TEXT_KEYWORD_IGNORE_ABOVE }
                        }
                    },
                    "q_type": { "type": "keyword" },
                    "answer_text": { "type": "text", "analyzer": analyzer },
                    "embedding_text": { "type": "text", "index": false },
                    "answer_vector": { "type": "dense_vector", "dims": dims }
                }
            }
        }
    })
}

pub struct IndexManager {
    store: Arc<dyn SurveyStore>,
    index: String,
    mappings: Value,
}

impl IndexManager {
    pub fn new(store: Arc<dyn SurveyStore>, index: impl Into<String>, dims: usize, analyzer: &str) -> Self {
        Self {
            store,
            index: index.into(),
            mappings: index_mapping(dims, analyzer),
        }
    }

    /// Manager for the configured index. Requires `embedding.dims`.
    pub fn from_config(store: Arc<dyn SurveyStore>, config: &Config) -> Result<Self> {
        let Some(dims) = config.embedding.dims.filter(|d| *d > 0) else {
            bail!("embedding.dims must be set to create the index mapping");
        };
        Ok(Self::new(
            store,
            config.store.index.clone(),
            dims,
            &config.store.analyzer,
        ))
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn mappings(&self) -> &Value {
        &self.mappings
    }

    /// Create the index if it does not exist. Returns `true` if it was created.
    ///
    /// An existing index is left exactly as it is, even if its mapping
    /// differs from [`mappings`](Self::mappings).
    pub async fn ensure_schema(&self) -> Result<bool> {
        if self.store.index_exists(&self.index).await? {
            tracing::debug!(index = %self.index, "index exists, leaving mapping unchanged");
            return Ok(false);
        }
        self.store
            .create_index(&self.index, &self.mappings)
            .await
            .with_context(|| format!("Failed to create index '{}'", self.index))?;
        tracing::info!(index = %self.index, "created index");
        Ok(true)
    }

    /// Drop the index if present, then create it fresh.
    pub async fn recreate_index(&self) -> Result<()> {
        if self.store.index_exists(&self.index).await? {
            self.store
                .delete_index(&self.index)
                .await
                .with_context(|| format!("Failed to delete index '{}'", self.index))?;
            tracing::info!(index = %self.index, "deleted existing index");
        }
        self.ensure_schema().await?;
        Ok(())
    }

    /// Write documents keyed by user id. Per-document failures are returned,
    /// not raised.
    pub async fn bulk_upsert(&self, docs: &[UserDocument]) -> Result<BulkOutcome> {
        if docs.is_empty() {
            return Ok(BulkOutcome::default());
        }
        let outcome = self
            .store
            .bulk_index(&self.index, docs)
            .await
            .with_context(|| format!("Bulk write to '{}' failed", self.index))?;

        for failure in &outcome.failures {
            tracing::warn!(
                user_id = %failure.user_id,
                status = failure.status,
                reason = %failure.reason,
                "document rejected by store"
            );
        }
        tracing::debug!(
            index = %self.index,
            success = outcome.success_count,
            failed = outcome.failures.len(),
            "bulk write"
        );
        Ok(outcome)
    }

    pub async fn refresh(&self) -> Result<()> {
        self.store
            .refresh(&self.index)
            .await
            .with_context(|| format!("Failed to refresh index '{}'", self.index))
    }
}
