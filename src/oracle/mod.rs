//! Inference-service boundary used by the classifier, the composer extractor
//! and the composer resolver.
//!
//! Responses are parsed strictly: a constrained choice is accepted only when the
//! raw text equals one of the allowed labels byte for byte, and an extraction only
//! when the text is a JSON array of strings. Anything else is reported as
//! unparseable and the caller decides the fallback.

pub mod gemini;
pub mod prompts;

use crate::error::Result;
use async_trait::async_trait;

pub use gemini::GeminiOracle;

/// Outcome of a constrained-choice request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Choice {
    Label(String),
    Unparseable(String),
}

impl Choice {
    pub fn label(&self) -> Option<&str> {
        match self {
            Choice::Label(label) => Some(label),
            Choice::Unparseable(_) => None,
        }
    }
}

/// Outcome of a structured-extraction request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Items(Vec<String>),
    Unparseable(String),
}

#[async_trait]
pub trait Oracle: Send + Sync {
    /// Ask for exactly one of `allowed`.
    async fn choose_one(&self, prompt: &str, allowed: &[String]) -> Result<Choice>;

    /// Ask for an ordered list of strings.
    async fn extract_list(&self, prompt: &str) -> Result<Extraction>;
}

pub fn parse_choice(raw: &str, allowed: &[String]) -> Choice {
    match allowed.iter().find(|label| label.as_str() == raw) {
        Some(label) => Choice::Label(label.clone()),
        None => Choice::Unparseable(raw.to_string()),
    }
}

pub fn parse_list(raw: &str) -> Extraction {
    match serde_json::from_str::<Vec<String>>(raw.trim()) {
        Ok(items) => Extraction::Items(items),
        Err(_) => Extraction::Unparseable(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn only_exact_labels_are_accepted() {
        let allowed = labels(&["true", "false"]);
        assert_eq!(parse_choice("true", &allowed), Choice::Label("true".into()));
        assert_eq!(parse_choice("false", &allowed).label(), Some("false"));

        for raw in ["True", "true ", "\"true\"", "yes", "", "None"] {
            assert_eq!(parse_choice(raw, &allowed), Choice::Unparseable(raw.to_string()));
        }
    }

    #[test]
    fn lists_must_be_json_string_arrays() {
        assert_eq!(
            parse_list("[\"Johann Sebastian Bach\", \"Arvo Pärt\"]\n"),
            Extraction::Items(vec!["Johann Sebastian Bach".into(), "Arvo Pärt".into()])
        );
        assert_eq!(parse_list("[]"), Extraction::Items(vec![]));
        assert!(matches!(parse_list("Bach, Handel"), Extraction::Unparseable(_)));
        assert!(matches!(parse_list("[1, 2]"), Extraction::Unparseable(_)));
    }
}
