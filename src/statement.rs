//! Embedding text rendering.
//!
//! Every resolved answer is rendered into one canonical sentence before it is
//! embedded. The sentence is the only text the vector index sees, so the
//! template must not change within an index; [`template_version`] fingerprints
//! it (together with the model name) and the fingerprint is stored on every
//! document.

use sha2::{Digest, Sha256};

pub const QUESTION_PLACEHOLDER: &str = "{question}";
pub const ANSWER_PLACEHOLDER: &str = "{answer}";

/// "responded to the {question} item with '{answer}'"
pub const DEFAULT_TEMPLATE: &str = "{question} 문항에 '{answer}'라고 응답";

/// Renders embedding texts from a fixed template.
#[derive(Debug, Clone)]
pub struct StatementTemplate {
    template: String,
}

impl Default for StatementTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE)
    }
}

impl StatementTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Render the sentence for one answer.
    ///
    /// The answer is substituted after the question so that a question text
    /// containing a literal `{answer}` is not expanded.
    pub fn render(&self, question_text: &str, answer_text: &str) -> String {
        match self.template.split_once(ANSWER_PLACEHOLDER) {
            Some((head, tail)) => format!(
                "{}{}{}",
                head.replace(QUESTION_PLACEHOLDER, question_text),
                answer_text,
                tail.replace(QUESTION_PLACEHOLDER, question_text)
            ),
            None => self.template.replace(QUESTION_PLACEHOLDER, question_text),
        }
    }
}

/// Short, stable fingerprint of a template + embedding model pair.
pub fn template_version(template: &StatementTemplate, model_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(template.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(model_name.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_template_names_question_and_answer() {
        let text = StatementTemplate::default().render("음주 경험", "있음");
        assert_eq!(text, "음주 경험 문항에 '있음'라고 응답");
    }

    #[test]
    fn custom_template() {
        let t = StatementTemplate::new("responded to the {question} item with '{answer}'");
        assert_eq!(
            t.render("phone brand", "Galaxy"),
            "responded to the phone brand item with 'Galaxy'"
        );
    }

    #[test]
    fn placeholders_inside_values_are_not_expanded() {
        let t = StatementTemplate::new("{question}: {answer}");
        assert_eq!(t.render("q {answer}", "a {question}"), "q {answer}: a {question}");
    }

    #[test]
    fn rendering_is_deterministic() {
        let t = StatementTemplate::default();
        assert_eq!(t.render("q", "a"), t.render("q", "a"));
    }

    #[test]
    fn version_changes_with_template_or_model() {
        let a = template_version(&StatementTemplate::default(), "model-a");
        let b = template_version(&StatementTemplate::default(), "model-b");
        let c = template_version(&StatementTemplate::new("{question}={answer}"), "model-a");
        assert_eq!(a.len(), 12);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, template_version(&StatementTemplate::default(), "model-a"));
    }
}
