//! Question schema parsing.
//!
//! The schema file is a loose, line-oriented catalog:
//!
//! ```text
//! Q1,Which phone do you own?,SINGLE
//! 1,Galaxy
//! 2,iPhone
//! Q2,Which drinks have you had?,MULTI
//! 1,Beer
//! 2,Soju, soju-based, or other spirits
//! Q3,Anything else?,OPEN
//! ```
//!
//! A header line `<code>,<text>,<type>` opens a question; following
//! `<digits>,<label>[,...]` lines attach options to it. Blank lines and
//! anything else are skipped without error so that catalogs exported from
//! spreadsheets with stray rows still parse.

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use crate::models::{QuestionCatalog, QuestionMetadata, QuestionType};

fn compile_regex(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(regex) => regex,
        Err(_compile_err) => match Regex::new(r"$^") {
            Ok(fallback) => fallback,
            Err(fallback_err) => panic!("hardcoded fallback regex must compile: {fallback_err}"),
        },
    }
}

static HEADER_LINE: LazyLock<Regex> =
    LazyLock::new(|| compile_regex(r"^([a-zA-Z0-9_]+),([^,]+),([^,]+)$"));
static OPTION_LINE: LazyLock<Regex> = LazyLock::new(|| compile_regex(r"^\d+,"));

/// Read and parse a schema file.
///
/// # Errors
///
/// Fails only if the file cannot be read or is not UTF-8. Malformed lines
/// are ignored.
pub fn parse_question_metadata(path: &Path) -> Result<QuestionCatalog> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read question schema: {}", path.display()))?;
    let catalog = parse_question_metadata_str(&content);
    tracing::debug!(
        path = %path.display(),
        questions = catalog.len(),
        "parsed question schema"
    );
    Ok(catalog)
}

/// Parse schema text that has already been read into memory.
pub fn parse_question_metadata_str(content: &str) -> QuestionCatalog {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);

    let mut catalog: QuestionCatalog = HashMap::new();
    let mut current: Option<String> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(caps) = HEADER_LINE.captures(line) {
            let code = caps[1].trim().to_string();
            catalog.insert(
                code.clone(),
                QuestionMetadata {
                    code: code.clone(),
                    text: caps[2].trim().to_string(),
                    kind: QuestionType::from_schema(&caps[3]),
                    options: HashMap::new(),
                },
            );
            current = Some(code);
            continue;
        }

        let Some(code) = current.as_deref() else {
            continue;
        };
        if !OPTION_LINE.is_match(line) {
            continue;
        }

        let mut parts = line.splitn(3, ',');
        let option_code = parts.next().unwrap_or_default().trim();
        let option_text = parts.next().unwrap_or_default().trim();
        if option_code.is_empty() {
            continue;
        }
        if let Some(question) = catalog.get_mut(code) {
            question
                .options
                .insert(option_code.to_string(), option_text.to_string());
        }
    }

    catalog
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = "\u{feff}Q1,Which phone do you own?,SINGLE\n\
        1,Galaxy\n\
        2,iPhone\n\
        \n\
        Q2,Which drinks have you had?,MULTI\n\
        1,Beer\n\
        2,Soju, soju-based, or other spirits\n\
        Q3,Anything else?,OPEN\n";

    #[test]
    fn parses_headers_and_options() {
        let catalog = parse_question_metadata_str(SCHEMA);
        assert_eq!(catalog.len(), 3);

        let q1 = &catalog["Q1"];
        assert_eq!(q1.text, "Which phone do you own?");
        assert_eq!(q1.kind, QuestionType::Single);
        assert_eq!(q1.options.len(), 2);
        assert_eq!(q1.options["1"], "Galaxy");

        let q2 = &catalog["Q2"];
        assert_eq!(q2.kind, QuestionType::Multi);
        // Only the first two fields are trusted.
        assert_eq!(q2.options["2"], "Soju");

        let q3 = &catalog["Q3"];
        assert_eq!(q3.kind, QuestionType::Open);
        assert!(q3.options.is_empty());
    }

    #[test]
    fn bom_is_stripped_from_first_code() {
        let catalog = parse_question_metadata_str(SCHEMA);
        assert!(catalog.contains_key("Q1"));
        assert!(!catalog.keys().any(|k| k.starts_with('\u{feff}')));
    }

    #[test]
    fn option_before_any_header_is_dropped() {
        let catalog = parse_question_metadata_str("1,Orphan\n2,Another\nQ1,Question,SINGLE\n3,Kept\n");
        assert_eq!(catalog.len(), 1);
        let options = &catalog["Q1"].options;
        assert_eq!(options.len(), 1);
        assert_eq!(options["3"], "Kept");
    }

    #[test]
    fn stray_lines_are_ignored() {
        let text = "Q1,Question,SINGLE\n\
            not a schema line\n\
            ,,,\n\
            Q-bad,Dash in code,SINGLE\n\
            1,Yes\n";
        let catalog = parse_question_metadata_str(text);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog["Q1"].options["1"], "Yes");
    }

    #[test]
    fn option_with_empty_label_is_kept() {
        let catalog = parse_question_metadata_str("Q1,Question,SINGLE\n7,\n");
        assert_eq!(catalog["Q1"].options["7"], "");
    }

    #[test]
    fn reparsing_is_deterministic() {
        let first = parse_question_metadata_str(SCHEMA);
        let second = parse_question_metadata_str(SCHEMA);
        assert_eq!(first, second);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = parse_question_metadata(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert!(err.to_string().contains("Failed to read question schema"));
    }

    #[test]
    fn parses_from_disk() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("questions.csv");
        std::fs::write(&path, SCHEMA).unwrap();
        let from_disk = parse_question_metadata(&path).unwrap();
        assert_eq!(from_disk, parse_question_metadata_str(SCHEMA));
    }
}
