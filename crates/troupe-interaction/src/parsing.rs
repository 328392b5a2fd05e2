//! Parsing of structured model output.
//!
//! Models wrap JSON in prose or code fences. These helpers locate the payload
//! and fail loudly instead of defaulting when it is malformed.

use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::OnceLock;
use troupe_core::error::{Result, TroupeError};
use troupe_core::stage::ScenarioAssessment;

/// Returns the slice from the first `open` to the last `close`, inclusive.
fn extract_between(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

/// Parses the JSON object embedded in `text` into `T`.
///
/// # Errors
///
/// Returns `TroupeError::Parse` naming `target` if no object is present or it
/// does not match `T`.
pub fn parse_structured<T: DeserializeOwned>(text: &str, target: &str) -> Result<T> {
    let json = extract_between(text, '{', '}')
        .ok_or_else(|| rejected(target, text, "no JSON object in response".to_string()))?;
    serde_json::from_str(json).map_err(|e| rejected(target, text, e.to_string()))
}

/// Parses the JSON array embedded in `text` into `Vec<T>`.
pub fn parse_structured_list<T: DeserializeOwned>(text: &str, target: &str) -> Result<Vec<T>> {
    let json = extract_between(text, '[', ']')
        .ok_or_else(|| rejected(target, text, "no JSON array in response".to_string()))?;
    serde_json::from_str(json).map_err(|e| rejected(target, text, e.to_string()))
}

fn rejected(target: &str, text: &str, message: String) -> TroupeError {
    tracing::debug!(
        target: "troupe::llm",
        parse_target = target,
        response_len = text.len(),
        error = %message,
        "Rejected model response"
    );
    TroupeError::parse(target, message)
}

/// Parses an assessment, rejecting out-of-range progress or confidence.
pub fn parse_assessment(text: &str) -> Result<ScenarioAssessment> {
    let assessment: ScenarioAssessment = parse_structured(text, "ScenarioAssessment")?;
    for (name, value) in [
        ("progress", assessment.progress),
        ("confidence", assessment.confidence),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(TroupeError::parse(
                "ScenarioAssessment",
                format!("{name} {value} outside 0..1"),
            ));
        }
    }
    Ok(assessment)
}

fn numbered_item() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*\d+\s*[.)]\s*(.+?)\s*$").expect("valid regex"))
}

fn number() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("valid regex"))
}

/// Extracts the items of a `1. item` / `2) item` list, in order.
pub fn parse_numbered_list(text: &str) -> Vec<String> {
    let items: Vec<String> = numbered_item()
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|item| !item.is_empty())
        .collect();
    if items.is_empty() {
        tracing::debug!(target: "troupe::llm", response_len = text.len(), "No numbered items in model response");
    }
    items
}

/// Reads the first number in a bid response.
pub fn parse_bid(text: &str) -> Result<f32> {
    number()
        .find(text)
        .and_then(|m| m.as_str().parse().ok())
        .ok_or_else(|| TroupeError::parse("bid", format!("no number in '{}'", text.trim())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        score: u32,
    }

    #[test]
    fn test_structured_in_code_fence() {
        let text = "Sure!\n```json\n{\"score\": 4}\n```\nHope that helps.";
        assert_eq!(parse_structured::<Sample>(text, "Sample").unwrap(), Sample { score: 4 });
    }

    #[test]
    fn test_structured_failure_is_parse_error() {
        assert!(parse_structured::<Sample>("no json here", "Sample").unwrap_err().is_parse());
        assert!(parse_structured::<Sample>("{\"other\": 1}", "Sample").unwrap_err().is_parse());
    }

    #[test]
    fn test_assessment_range() {
        let ok = parse_assessment(
            r#"{"complete": false, "progress": 0.4, "confidence": 0.9, "reasoning": "midway"}"#,
        )
        .unwrap();
        assert!(!ok.complete);

        let err = parse_assessment(
            r#"{"complete": true, "progress": 4.0, "confidence": 0.9, "reasoning": "x"}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_numbered_list() {
        let text = "Topics:\n1. Remote work\n2) Universal basic income \n\n3. Space exploration\nThanks";
        assert_eq!(
            parse_numbered_list(text),
            vec!["Remote work", "Universal basic income", "Space exploration"]
        );
        assert!(parse_numbered_list("nothing numbered").is_empty());
    }

    #[test]
    fn test_bid() {
        assert_eq!(parse_bid("I'd bid 7.5 here").unwrap(), 7.5);
        assert_eq!(parse_bid("3").unwrap(), 3.0);
        assert!(parse_bid("pass").is_err());
    }

    #[test]
    fn test_structured_list() {
        let items: Vec<String> = parse_structured_list("Here: [\"a\", \"b\"]", "questions").unwrap();
        assert_eq!(items, vec!["a", "b"]);
    }
}
