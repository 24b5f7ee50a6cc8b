//! Nearest-neighbor search over indexed statements.
//!
//! The query text is embedded with the same provider that produced the
//! stored vectors and matched against `qa_pairs.answer_vector`. An optional
//! wildcard pattern restricts the match to statements whose question text
//! fits it.

use anyhow::{bail, Result};

use crate::embedding::{embed_query, EmbeddingProvider};
use crate::store::{KnnQuery, SearchHit, SurveyStore};

/// Candidates per requested hit handed to the store.
const CANDIDATE_FACTOR: usize = 10;

/// Elasticsearch rejects a knn `num_candidates` above this.
pub const MAX_NUM_CANDIDATES: usize = 10_000;

/// Number of knn candidates for `k` hits, capped at [`MAX_NUM_CANDIDATES`].
pub fn candidate_count(k: usize) -> usize {
    k.saturating_mul(CANDIDATE_FACTOR).min(MAX_NUM_CANDIDATES)
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub question_pattern: Option<String>,
    pub k: usize,
}

/// Embed `request.query` and return the closest user documents, best first.
pub async fn search_similar(
    store: &dyn SurveyStore,
    embedder: &dyn EmbeddingProvider,
    index: &str,
    request: &SearchRequest,
) -> Result<Vec<SearchHit>> {
    if request.query.trim().is_empty() {
        return Ok(Vec::new());
    }
    if request.k == 0 {
        bail!("k must be > 0");
    }
    if request.k > MAX_NUM_CANDIDATES {
        bail!("k must be at most {}, got {}", MAX_NUM_CANDIDATES, request.k);
    }

    let vector = embed_query(embedder, &request.query).await?;
    let query = KnnQuery {
        vector,
        k: request.k,
        num_candidates: candidate_count(request.k),
        question_pattern: request
            .question_pattern
            .clone()
            .filter(|p| !p.trim().is_empty()),
    };
    let hits = store.knn_search(index, &query).await?;
    tracing::debug!(index, hits = hits.len(), "knn search");
    Ok(hits)
}

/// Print hits the way `svidx search` shows them.
pub fn print_hits(query: &str, hits: &[SearchHit]) {
    if hits.is_empty() {
        println!("No results.");
        return;
    }

    println!("search \"{}\"", query);
    for (i, hit) in hits.iter().enumerate() {
        println!("{}. [{:.4}] {}", i + 1, hit.score, hit.user_id);
        if let (Some(q), Some(a)) = (&hit.q_text, &hit.answer_text) {
            println!("    {} -> {}", q, a);
        }
        println!();
    }
}
