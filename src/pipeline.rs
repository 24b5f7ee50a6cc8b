//! Indexing run orchestration.
//!
//! Coordinates a full run: connectivity check → schema and response parsing
//! → index rebuild → windows of (normalize → render → embed → assemble →
//! bulk write) → refresh. Every run is a full refresh: the index is dropped
//! and recreated before the first window is written.
//!
//! Rows are processed in windows of `[indexing].flush_rows` so at most one
//! window of vectors is held in memory. A run can be cancelled through its
//! [`CancellationToken`] and is bounded by `[indexing].run_timeout_secs`.

use anyhow::anyhow;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::assemble::{assemble_document, build_statements};
use crate::config::Config;
use crate::embedding::{embed_all, EmbeddingProvider};
use crate::error::RunError;
use crate::index::IndexManager;
use crate::metadata::parse_question_metadata;
use crate::models::{QuestionCatalog, ResolvedAnswer, ResponseRow, UserDocument};
use crate::normalize::normalize_row;
use crate::progress::{IndexProgressEvent, IndexProgressReporter};
use crate::responses::load_responses;
use crate::statement::{template_version, StatementTemplate};
use crate::store::{BulkFailure, BulkOutcome, SurveyStore};

/// Totals for one indexing run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexSummary {
    pub index: String,
    /// Rows read from the response table (after `limit`).
    pub rows: usize,
    /// Documents assembled and sent to the store.
    pub documents: usize,
    pub statements: usize,
    /// Rows without a user id.
    pub skipped_users: usize,
    /// Rows whose answers all resolved to nothing.
    pub empty_users: usize,
    pub success_count: usize,
    pub failures: Vec<BulkFailure>,
    pub template_version: String,
}

impl IndexSummary {
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    fn absorb(&mut self, outcome: BulkOutcome) {
        self.success_count += outcome.success_count;
        self.failures.extend(outcome.failures);
    }
}

/// What a dry run found, without embedding or touching the store.
#[derive(Debug, Clone, Serialize)]
pub struct DryRunReport {
    pub questions: usize,
    pub rows: usize,
    pub documents: usize,
    pub statements: usize,
    pub skipped_users: usize,
    pub empty_users: usize,
    /// First document that would be written, with empty vectors.
    pub sample: Option<UserDocument>,
}

/// Outcome of preparing one row for embedding.
enum RowPlan {
    MissingId,
    Empty,
    Ready {
        user_id: String,
        resolved: Vec<ResolvedAnswer>,
        texts: Vec<String>,
    },
}

fn plan_row(row: &ResponseRow, catalog: &QuestionCatalog, template: &StatementTemplate) -> RowPlan {
    let Some(user_id) = row.user_id() else {
        return RowPlan::MissingId;
    };
    let resolved = normalize_row(row, catalog);
    if resolved.is_empty() {
        return RowPlan::Empty;
    }
    let texts = resolved
        .iter()
        .map(|r| template.render(&r.question_text, &r.answer_text))
        .collect();
    RowPlan::Ready {
        user_id: user_id.to_string(),
        resolved,
        texts,
    }
}

/// The indexing pipeline with its injected store and embedding provider.
#[derive(Clone)]
pub struct Pipeline {
    config: Arc<Config>,
    store: Arc<dyn SurveyStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl Pipeline {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn SurveyStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            config,
            store,
            embedder,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn template(&self) -> StatementTemplate {
        StatementTemplate::new(self.config.indexing.embedding_template.clone())
    }

    fn load_inputs(&self, limit: Option<usize>) -> Result<(QuestionCatalog, Vec<ResponseRow>), RunError> {
        let data = &self.config.data;
        let catalog = parse_question_metadata(&data.questions).map_err(RunError::input)?;
        let mut rows = load_responses(&data.responses, &data.user_id_column, data.delimiter_byte())
            .map_err(RunError::input)?;
        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        Ok((catalog, rows))
    }

    /// Parse and normalize only. No embedding, no store access, so the
    /// provider may be [`DisabledProvider`](crate::embedding::DisabledProvider).
    pub fn dry_run(&self, limit: Option<usize>) -> Result<DryRunReport, RunError> {
        let (catalog, rows) = self.load_inputs(limit)?;
        let template = self.template();
        let model = self
            .config
            .embedding
            .model
            .as_deref()
            .unwrap_or(self.embedder.model_name());
        let version = template_version(&template, model);

        let mut report = DryRunReport {
            questions: catalog.len(),
            rows: rows.len(),
            documents: 0,
            statements: 0,
            skipped_users: 0,
            empty_users: 0,
            sample: None,
        };

        for row in &rows {
            match plan_row(row, &catalog, &template) {
                RowPlan::MissingId => report.skipped_users += 1,
                RowPlan::Empty => report.empty_users += 1,
                RowPlan::Ready {
                    user_id,
                    resolved,
                    texts,
                } => {
                    report.documents += 1;
                    report.statements += resolved.len();
                    if report.sample.is_none() {
                        let vectors = vec![Vec::new(); texts.len()];
                        let statements = build_statements(resolved, &texts, &vectors);
                        report.sample = assemble_document(Some(&user_id), statements, &version);
                    }
                }
            }
        }

        Ok(report)
    }

    /// Run a full indexing pass.
    ///
    /// Returns [`RunError::StoreUnavailable`] without modifying anything if
    /// the store does not answer, [`RunError::Cancelled`] if `cancel` fires,
    /// and [`RunError::TimedOut`] after `[indexing].run_timeout_secs`.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        progress: &dyn IndexProgressReporter,
        limit: Option<usize>,
    ) -> Result<IndexSummary, RunError> {
        let timeout_secs = self.config.indexing.run_timeout_secs;
        let work = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            self.run_inner(cancel, progress, limit),
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RunError::Cancelled),
            result = work => match result {
                Ok(result) => result,
                Err(_) => Err(RunError::TimedOut(timeout_secs)),
            },
        }
    }

    async fn run_inner(
        &self,
        cancel: &CancellationToken,
        progress: &dyn IndexProgressReporter,
        limit: Option<usize>,
    ) -> Result<IndexSummary, RunError> {
        let info = self
            .store
            .info()
            .await
            .map_err(RunError::store_unavailable)?;
        tracing::debug!(cluster = %info.cluster_name, version = %info.version, "store reachable");

        let (catalog, rows) = self.load_inputs(limit)?;

        let dims = self.embedder.dims();
        if dims == 0 {
            return Err(RunError::Internal(anyhow!(
                "Embedding provider is disabled. Set [embedding] provider in config."
            )));
        }

        let manager = IndexManager::new(
            self.store.clone(),
            self.config.store.index.clone(),
            dims,
            &self.config.store.analyzer,
        );
        manager.recreate_index().await?;

        let template = self.template();
        let version = template_version(&template, self.embedder.model_name());
        let mut summary = IndexSummary {
            index: manager.index().to_string(),
            rows: rows.len(),
            template_version: version.clone(),
            ..IndexSummary::default()
        };

        let total = rows.len() as u64;
        progress.report(IndexProgressEvent::Preparing {
            index: summary.index.clone(),
            users: total,
        });

        let mut processed = 0u64;
        for window in rows.chunks(self.config.indexing.flush_rows) {
            if cancel.is_cancelled() {
                return Err(RunError::Cancelled);
            }

            let docs = self
                .build_window(window, &catalog, &template, &version, &mut summary)
                .await?;
            summary.documents += docs.len();
            summary.absorb(manager.bulk_upsert(&docs).await?);

            processed += window.len() as u64;
            progress.report(IndexProgressEvent::Indexing {
                n: processed,
                total,
                success: summary.success_count as u64,
                failed: summary.failure_count() as u64,
            });
        }

        if self.config.indexing.refresh && summary.documents > 0 {
            progress.report(IndexProgressEvent::Refreshing {
                index: summary.index.clone(),
            });
            manager.refresh().await?;
        }

        tracing::info!(
            index = %summary.index,
            rows = summary.rows,
            documents = summary.documents,
            success = summary.success_count,
            failed = summary.failure_count(),
            skipped = summary.skipped_users,
            "indexing run finished"
        );
        Ok(summary)
    }

    /// Normalize, embed and assemble one window of rows.
    async fn build_window(
        &self,
        window: &[ResponseRow],
        catalog: &QuestionCatalog,
        template: &StatementTemplate,
        version: &str,
        summary: &mut IndexSummary,
    ) -> Result<Vec<UserDocument>, RunError> {
        let mut ready = Vec::new();
        let mut all_texts = Vec::new();

        for row in window {
            match plan_row(row, catalog, template) {
                RowPlan::MissingId => {
                    summary.skipped_users += 1;
                    tracing::warn!("skipping response row without a user id");
                }
                RowPlan::Empty => summary.empty_users += 1,
                RowPlan::Ready {
                    user_id,
                    resolved,
                    texts,
                } => {
                    all_texts.extend(texts.iter().cloned());
                    ready.push((user_id, resolved, texts));
                }
            }
        }

        let embedding = &self.config.embedding;
        let vectors = embed_all(
            self.embedder.as_ref(),
            &all_texts,
            embedding.batch_size,
            embedding.concurrency,
        )
        .await?;

        let mut docs = Vec::with_capacity(ready.len());
        let mut offset = 0;
        for (user_id, resolved, texts) in ready {
            let end = offset + texts.len();
            let statements = build_statements(resolved, &texts, &vectors[offset..end]);
            offset = end;
            summary.statements += statements.len();
            if let Some(doc) = assemble_document(Some(&user_id), statements, version) {
                docs.push(doc);
            }
        }
        Ok(docs)
    }
}
