//! Extraction of JSON payloads from LLM response text.
//!
//! Models frequently wrap structured output in markdown code fences or
//! surround it with prose. The llm-generate executor uses this module to map
//! a free-form response onto a node's declared output keys: fenced blocks are
//! tried first, then the whole response, then the widest embedded object or
//! array.

use serde_json::Value;

/// Attempts to extract a JSON value from raw LLM response text.
///
/// Returns `None` when nothing in the text parses as JSON; callers decide
/// whether the raw text is acceptable on its own.
#[must_use]
pub fn extract_json(text: &str) -> Option<Value> {
    let cleaned = text.trim();

    // Fenced blocks: ```json ... ``` or ``` ... ```
    for block in fenced_blocks(cleaned) {
        if let Ok(v) = serde_json::from_str::<Value>(block.trim()) {
            return Some(v);
        }
    }

    if let Ok(v) = serde_json::from_str::<Value>(cleaned) {
        return Some(v);
    }

    // Widest embedded object or array.
    for open in ['{', '['] {
        let close = if open == '{' { '}' } else { ']' };
        if let (Some(start), Some(end)) = (cleaned.find(open), cleaned.rfind(close)) {
            if start < end {
                if let Ok(v) = serde_json::from_str::<Value>(&cleaned[start..=end]) {
                    return Some(v);
                }
            }
        }
    }

    None
}

fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        // Skip an optional language tag up to the first newline.
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        match body.find("```") {
            Some(close) => {
                blocks.push(&body[..close]);
                rest = &body[close + 3..];
            }
            None => break,
        }
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_fenced_json() {
        let text = "Here you go:\n```json\n{\"answer\": 42}\n```\nDone.";
        assert_eq!(extract_json(text), Some(json!({"answer": 42})));
    }

    #[test]
    fn parses_unfenced_block() {
        let text = "```\n[1, 2, 3]\n```";
        assert_eq!(extract_json(text), Some(json!([1, 2, 3])));
    }

    #[test]
    fn parses_bare_object() {
        assert_eq!(
            extract_json(r#"{"ok": true}"#),
            Some(json!({"ok": true}))
        );
    }

    #[test]
    fn parses_embedded_object() {
        let text = r#"The result is {"score": 0.9} as requested."#;
        assert_eq!(extract_json(text), Some(json!({"score": 0.9})));
    }

    #[test]
    fn plain_prose_yields_none() {
        assert_eq!(extract_json("no structured data here"), None);
    }

    #[test]
    fn skips_unparseable_fence_and_falls_through() {
        let text = "```\nnot json\n```\n{\"late\": 1}";
        assert_eq!(extract_json(text), Some(json!({"late": 1})));
    }
}
