//! Lenient parsing of model-produced JSON.
//!
//! Models wrap JSON in prose, leave trailing commas, or get cut off
//! mid-array. Parsing here slices the outermost braces out of the reply and
//! repairs the common failure shapes, keeping every topic that was complete
//! before the malformation.

use serde_json::Value;

use crate::error::MemoryError;

/// Parse a `{topic: [sentences]}` object out of a raw model reply.
///
/// Topics come back in key order. A topic whose value is a single string is
/// treated as a one-sentence list; non-string array elements are skipped.
pub fn parse_segments(raw: &str) -> Result<Vec<(String, Vec<String>)>, MemoryError> {
    let object = extract_object(raw)?;
    let mut topics = Vec::new();
    for (title, value) in object {
        let sentences = match value {
            Value::String(s) => vec![s],
            Value::Array(items) => items
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect(),
            _ => continue,
        };
        topics.push((title, sentences));
    }
    Ok(topics)
}

/// Parse a `{"memories": [sentence, ...]}` object out of a raw model reply.
///
/// Empty is a valid answer — the model is allowed to remember nothing.
pub fn parse_memories(raw: &str) -> Result<Vec<String>, MemoryError> {
    let object = extract_object(raw)?;
    let Some((_, value)) = object.into_iter().find(|(k, _)| k == "memories") else {
        return Ok(Vec::new());
    };
    match value {
        Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect()),
        _ => Ok(Vec::new()),
    }
}

/// Slice the outermost `{...}` from `raw` and decode it, repairing trailing
/// commas and truncation when a straight parse fails.
fn extract_object(raw: &str) -> Result<Vec<(String, Value)>, MemoryError> {
    let start = raw.find('{').ok_or_else(|| MemoryError::Segmentation {
        message: "no JSON object in model output".into(),
    })?;
    let end = raw.rfind('}').map(|i| i + 1).unwrap_or(raw.len());
    let slice = &raw[start..end];

    for candidate in repair_candidates(slice) {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&candidate) {
            return Ok(map.into_iter().collect());
        }
    }

    Err(MemoryError::Segmentation {
        message: "model output could not be repaired into a JSON object".into(),
    })
}

/// Parse attempts, in order: as-is, trailing comma stripped, and truncated
/// back to the last complete array value and re-closed.
fn repair_candidates(slice: &str) -> Vec<String> {
    let mut candidates = vec![slice.to_string()];

    let trimmed = slice.trim_end_matches('}').trim_end();
    if let Some(without_comma) = trimmed.strip_suffix(',') {
        candidates.push(format!("{without_comma}}}"));
    }

    // Truncated output: cut back to the last closed array, drop any partial
    // entry after it, and close the object.
    if let Some(pos) = slice.rfind(']') {
        let kept = slice[..=pos].trim_end();
        let kept = kept.strip_suffix(',').unwrap_or(kept);
        candidates.push(format!("{kept}}}"));
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_object_parses() {
        let raw = r#"{"Food": ["Likes tacos.", "Dislikes olives."], "Work": ["Studies at UIUC."]}"#;
        let topics = parse_segments(raw).unwrap();
        assert_eq!(topics.len(), 2);
        assert_eq!(topics[0].0, "Food");
        assert_eq!(topics[0].1.len(), 2);
        assert_eq!(topics[1].1, vec!["Studies at UIUC."]);
    }

    #[test]
    fn prose_around_json_is_ignored() {
        let raw = "Here are the segments you asked for:\n{\"A\": [\"one\"]}\nHope that helps!";
        let topics = parse_segments(raw).unwrap();
        assert_eq!(topics, vec![("A".into(), vec!["one".into()])]);
    }

    #[test]
    fn trailing_comma_is_repaired() {
        let raw = r#"{"A": ["one"], "B": ["two"],}"#;
        let topics = parse_segments(raw).unwrap();
        assert_eq!(topics.len(), 2);
    }

    #[test]
    fn truncated_output_keeps_complete_topics() {
        let raw = r#"{"A": ["one", "two"], "B": ["three"], "C": ["fo"#;
        let topics = parse_segments(raw).unwrap();
        assert_eq!(topics.len(), 2);
        assert_eq!(topics[0].1, vec!["one", "two"]);
        assert_eq!(topics[1].0, "B");
    }

    #[test]
    fn single_string_value_becomes_one_sentence() {
        let topics = parse_segments(r#"{"A": "just one"}"#).unwrap();
        assert_eq!(topics[0].1, vec!["just one"]);
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_segments("no json here at all").is_err());
        assert!(parse_segments("{{{{").is_err());
    }

    #[test]
    fn memories_array_extracted() {
        let raw = "Thinking... {\"memories\": [\"User lives in Champaign.\", \"User prefers email.\"]}";
        let memories = parse_memories(raw).unwrap();
        assert_eq!(memories.len(), 2);
    }

    #[test]
    fn missing_memories_key_is_empty() {
        assert!(parse_memories(r#"{"other": []}"#).unwrap().is_empty());
        assert!(parse_memories(r#"{"memories": []}"#).unwrap().is_empty());
    }
}
