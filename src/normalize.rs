//! Answer-code resolution.
//!
//! Turns one [`ResponseRow`] into the ordered list of [`ResolvedAnswer`]s
//! that will become nested statements. Rows never fail here: unknown
//! questions are skipped and unknown MULTI codes are kept as a placeholder.

use crate::models::{QuestionCatalog, QuestionMetadata, QuestionType, ResolvedAnswer, ResponseRow};

/// Placeholder label for a MULTI code missing from the option map.
pub fn unknown_code_label(code: &str) -> String {
    format!("알 수 없는 코드: {}", code)
}

/// Resolve every answered, known question in `row`.
///
/// Output order follows the row's column order, and within a MULTI answer
/// the order the codes were listed in.
pub fn normalize_row(row: &ResponseRow, catalog: &QuestionCatalog) -> Vec<ResolvedAnswer> {
    let mut resolved = Vec::new();

    for (code, raw) in &row.answers {
        let Some(raw) = raw.as_deref() else {
            continue;
        };
        let Some(question) = catalog.get(code) else {
            continue;
        };

        for answer_text in resolve_answer(question, raw) {
            if answer_text.trim().is_empty() {
                continue;
            }
            resolved.push(ResolvedAnswer {
                question_code: code.clone(),
                question_text: question.text.clone(),
                question_type: question.kind,
                answer_text,
            });
        }
    }

    resolved
}

/// Resolve one raw cell against its question. May return blank strings;
/// callers drop those.
pub fn resolve_answer(question: &QuestionMetadata, raw: &str) -> Vec<String> {
    match question.kind {
        QuestionType::Multi => raw
            .split(',')
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(|code| {
                question
                    .options
                    .get(code)
                    .cloned()
                    .unwrap_or_else(|| unknown_code_label(code))
            })
            .collect(),
        QuestionType::Single => {
            let answer = question
                .options
                .get(raw.trim())
                .cloned()
                .unwrap_or_else(|| raw.to_string());
            vec![answer]
        }
        QuestionType::Open => vec![raw.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::parse_question_metadata_str;

    fn catalog() -> QuestionCatalog {
        parse_question_metadata_str(
            "Q_PHONE,Which phone do you own?,SINGLE\n\
             1,Galaxy\n\
             2,iPhone\n\
             Q_DRINK,Which drinks have you had?,MULTI\n\
             1,Beer\n\
             2,Wine\n\
             3,\n\
             Q_FREE,Anything else?,OPEN\n",
        )
    }

    fn row(answers: &[(&str, Option<&str>)]) -> ResponseRow {
        ResponseRow {
            user_id: Some("u1".to_string()),
            answers: answers
                .iter()
                .map(|(c, v)| (c.to_string(), v.map(str::to_string)))
                .collect(),
        }
    }

    fn texts(resolved: &[ResolvedAnswer]) -> Vec<&str> {
        resolved.iter().map(|r| r.answer_text.as_str()).collect()
    }

    #[test]
    fn multi_trailing_comma_yields_two_answers_in_order() {
        let out = normalize_row(&row(&[("Q_DRINK", Some("1,2,"))]), &catalog());
        assert_eq!(texts(&out), vec!["Beer", "Wine"]);
        assert!(out.iter().all(|r| r.question_type == QuestionType::Multi));
    }

    #[test]
    fn multi_preserves_listed_order() {
        let out = normalize_row(&row(&[("Q_DRINK", Some(" 2 , 1"))]), &catalog());
        assert_eq!(texts(&out), vec!["Wine", "Beer"]);
    }

    #[test]
    fn multi_unknown_code_becomes_placeholder() {
        let out = normalize_row(&row(&[("Q_DRINK", Some("1,99"))]), &catalog());
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].answer_text, "Beer");
        assert!(out[1].answer_text.contains("99"));
        assert_eq!(out[1].answer_text, unknown_code_label("99"));
    }

    #[test]
    fn multi_code_with_blank_label_is_dropped() {
        let out = normalize_row(&row(&[("Q_DRINK", Some("3"))]), &catalog());
        assert!(out.is_empty());
    }

    #[test]
    fn multi_all_empty_codes_yield_nothing() {
        let out = normalize_row(&row(&[("Q_DRINK", Some(" , ,"))]), &catalog());
        assert!(out.is_empty());
    }

    #[test]
    fn single_resolves_trimmed_code() {
        let out = normalize_row(&row(&[("Q_PHONE", Some(" 1 "))]), &catalog());
        assert_eq!(texts(&out), vec!["Galaxy"]);
    }

    #[test]
    fn single_unmapped_value_passes_through_unchanged() {
        let out = normalize_row(&row(&[("Q_PHONE", Some("Pixel 8"))]), &catalog());
        assert_eq!(texts(&out), vec!["Pixel 8"]);
        assert!(!out[0].answer_text.contains("알 수 없는 코드"));
    }

    #[test]
    fn open_text_is_verbatim() {
        let out = normalize_row(&row(&[("Q_FREE", Some("I like tea, mostly"))]), &catalog());
        assert_eq!(texts(&out), vec!["I like tea, mostly"]);
        assert_eq!(out[0].question_type, QuestionType::Open);
    }

    #[test]
    fn unknown_questions_and_nulls_are_skipped() {
        let out = normalize_row(
            &row(&[
                ("Q_RETIRED", Some("1")),
                ("Q_PHONE", None),
                ("Q_FREE", Some("ok")),
            ]),
            &catalog(),
        );
        assert_eq!(texts(&out), vec!["ok"]);
        assert_eq!(out[0].question_code, "Q_FREE");
    }

    #[test]
    fn statements_follow_column_order() {
        let out = normalize_row(
            &row(&[
                ("Q_FREE", Some("first")),
                ("Q_DRINK", Some("2,1")),
                ("Q_PHONE", Some("2")),
            ]),
            &catalog(),
        );
        assert_eq!(texts(&out), vec!["first", "Wine", "Beer", "iPhone"]);
    }

    #[test]
    fn question_text_is_denormalized() {
        let out = normalize_row(&row(&[("Q_PHONE", Some("1"))]), &catalog());
        assert_eq!(out[0].question_text, "Which phone do you own?");
    }
}
