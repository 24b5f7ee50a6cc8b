//! Per-user document assembly.
//!
//! Joins resolved answers with their rendered embedding texts and vectors
//! and groups them into one [`UserDocument`] per respondent.

use chrono::Local;

use crate::models::{AnswerStatement, ResolvedAnswer, UserDocument};

/// Pair every resolved answer with its embedding text and vector.
///
/// The three slices are parallel; extra entries in the longer slices are
/// ignored.
pub fn build_statements(
    resolved: Vec<ResolvedAnswer>,
    texts: &[String],
    vectors: &[Vec<f32>],
) -> Vec<AnswerStatement> {
    resolved
        .into_iter()
        .zip(texts.iter().zip(vectors))
        .map(|(answer, (text, vector))| AnswerStatement {
            q_code: answer.question_code,
            q_text: answer.question_text,
            q_type: answer.question_type,
            answer_text: answer.answer_text,
            embedding_text: text.clone(),
            answer_vector: vector.clone(),
        })
        .collect()
}

/// Build the document for one respondent, stamped with the current local time.
///
/// Returns `None` when the user id is missing or blank, or when there are no
/// statements.
pub fn assemble_document(
    user_id: Option<&str>,
    statements: Vec<AnswerStatement>,
    template_version: &str,
) -> Option<UserDocument> {
    let user_id = user_id.map(str::trim).filter(|id| !id.is_empty())?;
    if statements.is_empty() {
        return None;
    }

    Some(UserDocument {
        user_id: user_id.to_string(),
        timestamp: Local::now().to_rfc3339(),
        template_version: template_version.to_string(),
        qa_pairs: statements,
    })
}
