//! Core data models used throughout the indexing pipeline.
//!
//! These types represent the question catalog, raw response rows, resolved
//! answers and the per-user documents that flow from the input files to the
//! search store.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Closed set of question kinds found in the schema file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QuestionType {
    /// One option code per respondent.
    Single,
    /// Comma-joined option codes.
    Multi,
    /// Free text.
    Open,
}

impl QuestionType {
    /// Maps a schema type string. Anything other than `SINGLE`/`MULTI` is free text.
    pub fn from_schema(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("SINGLE") {
            QuestionType::Single
        } else if raw.eq_ignore_ascii_case("MULTI") {
            QuestionType::Multi
        } else {
            QuestionType::Open
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::Single => "SINGLE",
            QuestionType::Multi => "MULTI",
            QuestionType::Open => "OPEN",
        }
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One question from the schema file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionMetadata {
    pub code: String,
    pub text: String,
    pub kind: QuestionType,
    /// Option code → label. Empty for [`QuestionType::Open`].
    pub options: HashMap<String, String>,
}

/// Question code → metadata, built once per run.
pub type QuestionCatalog = HashMap<String, QuestionMetadata>;

/// One respondent's raw answers, in table column order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseRow {
    pub user_id: Option<String>,
    /// `(question_code, raw_value)`; `None` for empty cells.
    pub answers: Vec<(String, Option<String>)>,
}

impl ResponseRow {
    /// The user id when present and non-blank.
    pub fn user_id(&self) -> Option<&str> {
        self.user_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// A normalized answer before embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAnswer {
    pub question_code: String,
    pub question_text: String,
    pub question_type: QuestionType,
    pub answer_text: String,
}

/// One nested `qa_pairs` element of a [`UserDocument`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerStatement {
    pub q_code: String,
    pub q_text: String,
    pub q_type: QuestionType,
    pub answer_text: String,
    pub embedding_text: String,
    pub answer_vector: Vec<f32>,
}

/// One document per respondent; `user_id` doubles as the store document id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDocument {
    pub user_id: String,
    /// Indexing time, ISO-8601.
    pub timestamp: String,
    /// Fingerprint of the embedding template and model that produced the vectors.
    pub template_version: String,
    pub qa_pairs: Vec<AnswerStatement>,
}
