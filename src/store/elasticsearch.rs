//! Elasticsearch REST backend.
//!
//! Talks to a cluster over plain HTTP with `reqwest`. Bulk writes use the
//! NDJSON `_bulk` protocol, split into requests no larger than
//! `[store].bulk_max_bytes` and `[store].bulk_max_actions`; per-item errors
//! are collected into [`BulkOutcome::failures`] instead of failing the
//! request.
//!
//! Nearest-neighbor queries run a `knn` query inside a `nested` query on
//! `qa_pairs`, so each user document scores as its closest statement and the
//! statement itself is returned through `inner_hits`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde_json::{json, Value};
use std::ops::Range;
use std::time::Duration;

use crate::config::StoreConfig;
use crate::models::UserDocument;

use super::{BulkFailure, BulkOutcome, ClusterInfo, KnnQuery, SearchHit, SurveyStore};

pub struct ElasticsearchStore {
    client: reqwest::Client,
    base: Url,
    bulk_max_bytes: usize,
    bulk_max_actions: usize,
}

impl ElasticsearchStore {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let base = Url::parse(&config.url)
            .with_context(|| format!("Invalid store.url: {}", config.url))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base,
            bulk_max_bytes: config.bulk_max_bytes,
            bulk_max_actions: config.bulk_max_actions,
        })
    }

    /// Build `<base>/<segment>/<segment>...` with each segment percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("store.url cannot be a base URL: {}", self.base))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response> {
        request
            .send()
            .await
            .with_context(|| format!("Elasticsearch request failed ({}) at {}", what, self.base))
    }
}

/// Fail with the status and response body unless the response is a success.
async fn expect_success(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    bail!("Elasticsearch {} failed with {}: {}", what, status, body)
}

/// Serialize `docs` as NDJSON `_bulk` bodies, each covering the returned
/// range of `docs`. A body is closed before it would exceed `max_bytes` or
/// `max_actions`; a single document larger than `max_bytes` goes alone.
fn bulk_bodies(
    docs: &[UserDocument],
    max_bytes: usize,
    max_actions: usize,
) -> Result<Vec<(Range<usize>, String)>> {
    let mut bodies = Vec::new();
    let mut body = String::new();
    let mut start = 0;

    for (position, doc) in docs.iter().enumerate() {
        let mut entry = serde_json::to_string(&json!({ "index": { "_id": doc.user_id } }))?;
        entry.push('\n');
        entry.push_str(&serde_json::to_string(doc)?);
        entry.push('\n');

        let actions = position - start;
        if actions > 0 && (body.len() + entry.len() > max_bytes || actions >= max_actions) {
            bodies.push((start..position, std::mem::take(&mut body)));
            start = position;
        }
        body.push_str(&entry);
    }
    if !body.is_empty() {
        bodies.push((start..docs.len(), body));
    }
    Ok(bodies)
}

/// Parse a `_bulk` response into counts and per-item failures.
fn parse_bulk_response(json: &Value, docs: &[UserDocument]) -> Result<BulkOutcome> {
    let items = json
        .get("items")
        .and_then(|i| i.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid bulk response: missing items array"))?;

    let mut outcome = BulkOutcome::default();
    for (position, item) in items.iter().enumerate() {
        let Some(result) = item.get("index") else {
            continue;
        };
        let status = result.get("status").and_then(|s| s.as_u64()).unwrap_or(0) as u16;

        match result.get("error") {
            None if (200..300).contains(&status) => outcome.success_count += 1,
            error => {
                let user_id = result
                    .get("_id")
                    .and_then(|id| id.as_str())
                    .map(str::to_string)
                    .or_else(|| docs.get(position).map(|d| d.user_id.clone()))
                    .unwrap_or_default();
                let reason = error
                    .map(|e| {
                        let kind = e.get("type").and_then(|t| t.as_str()).unwrap_or("error");
                        match e.get("reason").and_then(|r| r.as_str()) {
                            Some(reason) => format!("{}: {}", kind, reason),
                            None => kind.to_string(),
                        }
                    })
                    .unwrap_or_else(|| format!("unexpected status {}", status));
                outcome.failures.push(BulkFailure {
                    user_id,
                    status,
                    reason,
                });
            }
        }
    }
    Ok(outcome)
}

fn parse_search_response(json: &Value) -> Vec<SearchHit> {
    let hits = json
        .pointer("/hits/hits")
        .and_then(|h| h.as_array())
        .cloned()
        .unwrap_or_default();

    hits.iter()
        .filter_map(|hit| {
            let user_id = hit
                .pointer("/_source/user_id")
                .and_then(|u| u.as_str())
                .or_else(|| hit.get("_id").and_then(|u| u.as_str()))?
                .to_string();
            let score = hit.get("_score").and_then(|s| s.as_f64()).unwrap_or(0.0);
            let best = hit.pointer("/inner_hits/qa_pairs/hits/hits/0/_source");
            let field = |name: &str| {
                best.and_then(|b| b.get(name))
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            };
            Some(SearchHit {
                user_id,
                score,
                q_text: field("q_text"),
                answer_text: field("answer_text"),
            })
        })
        .collect()
}

fn knn_request(query: &KnnQuery) -> Value {
    let mut nested_query = json!({
        "bool": {
            "must": [{
                "knn": {
                    "field": "qa_pairs.answer_vector",
                    "query_vector": query.vector,
                    "num_candidates": query.num_candidates.max(query.k),
                }
            }]
        }
    });
    if let Some(pattern) = &query.question_pattern {
        nested_query["bool"]["filter"] = json!([{
            "wildcard": { "qa_pairs.q_text.keyword": { "value": pattern } }
        }]);
    }

    json!({
        "size": query.k,
        "_source": ["user_id"],
        "query": {
            "nested": {
                "path": "qa_pairs",
                "score_mode": "max",
                "query": nested_query,
                "inner_hits": {
                    "size": 1,
                    "_source": ["qa_pairs.q_text", "qa_pairs.answer_text"]
                }
            }
        }
    })
}

#[async_trait]
impl SurveyStore for ElasticsearchStore {
    async fn info(&self) -> Result<ClusterInfo> {
        let response = self.send(self.client.get(self.url(&[])?), "info").await?;
        let json: Value = expect_success(response, "info").await?.json().await?;
        Ok(ClusterInfo {
            cluster_name: json
                .get("cluster_name")
                .and_then(|c| c.as_str())
                .unwrap_or("unknown")
                .to_string(),
            version: json
                .pointer("/version/number")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string(),
        })
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        let response = self
            .send(self.client.head(self.url(&[index])?), "index exists")
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            s => bail!("Elasticsearch index exists check for '{}' returned {}", index, s),
        }
    }

    async fn create_index(&self, index: &str, mappings: &Value) -> Result<()> {
        let response = self
            .send(
                self.client
                    .put(self.url(&[index])?)
                    .json(&json!({ "mappings": mappings })),
                "create index",
            )
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST && body.contains("resource_already_exists_exception") {
            tracing::debug!(index, "index already exists");
            return Ok(());
        }
        bail!("Elasticsearch create index '{}' failed with {}: {}", index, status, body)
    }

    async fn delete_index(&self, index: &str) -> Result<()> {
        let response = self
            .send(self.client.delete(self.url(&[index])?), "delete index")
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        expect_success(response, "delete index").await?;
        Ok(())
    }

    async fn get_mapping(&self, index: &str) -> Result<Option<Value>> {
        let response = self
            .send(self.client.get(self.url(&[index, "_mapping"])?), "get mapping")
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let json: Value = expect_success(response, "get mapping").await?.json().await?;
        Ok(json.get(index).and_then(|i| i.get("mappings")).cloned())
    }

    async fn bulk_index(&self, index: &str, docs: &[UserDocument]) -> Result<BulkOutcome> {
        let mut outcome = BulkOutcome::default();
        let bodies = bulk_bodies(docs, self.bulk_max_bytes, self.bulk_max_actions)?;
        let requests = bodies.len();

        for (range, body) in bodies {
            tracing::debug!(
                index,
                docs = range.len(),
                bytes = body.len(),
                requests,
                "sending bulk request"
            );
            let response = self
                .send(
                    self.client
                        .post(self.url(&[index, "_bulk"])?)
                        .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
                        .body(body),
                    "bulk",
                )
                .await?;
            let json: Value = expect_success(response, "bulk").await?.json().await?;
            let part = parse_bulk_response(&json, &docs[range])?;
            outcome.success_count += part.success_count;
            outcome.failures.extend(part.failures);
        }
        Ok(outcome)
    }

    async fn refresh(&self, index: &str) -> Result<()> {
        let response = self
            .send(self.client.post(self.url(&[index, "_refresh"])?), "refresh")
            .await?;
        expect_success(response, "refresh").await?;
        Ok(())
    }

    async fn get_document(&self, index: &str, user_id: &str) -> Result<Option<UserDocument>> {
        let response = self
            .send(self.client.get(self.url(&[index, "_doc", user_id])?), "get document")
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let json: Value = expect_success(response, "get document").await?.json().await?;
        match json.get("_source") {
            Some(source) => Ok(Some(serde_json::from_value(source.clone())?)),
            None => Ok(None),
        }
    }

    async fn count(&self, index: &str) -> Result<u64> {
        let response = self
            .send(self.client.get(self.url(&[index, "_count"])?), "count")
            .await?;
        let json: Value = expect_success(response, "count").await?.json().await?;
        json.get("count")
            .and_then(|c| c.as_u64())
            .ok_or_else(|| anyhow::anyhow!("Invalid count response"))
    }

    async fn knn_search(&self, index: &str, query: &KnnQuery) -> Result<Vec<SearchHit>> {
        let response = self
            .send(
                self.client
                    .post(self.url(&[index, "_search"])?)
                    .json(&knn_request(query)),
                "search",
            )
            .await?;
        let json: Value = expect_success(response, "search").await?.json().await?;
        Ok(parse_search_response(&json))
    }
}
