//! Best-effort repair of malformed structured output.
//!
//! Models occasionally return truncated, fenced, or loosely-quoted JSON.
//! The fallback chain is fixed and fully testable: fence strip → direct
//! parse → truncation trim + brace balancing → embedded-object extraction →
//! quote normalization → trailing-comma strip → hard failure. No repair
//! beyond this chain is attempted.

use serde_json::Value;
use switchboard_protocol::ClassifyError;
use tracing::debug;

/// Remove a surrounding markdown code fence, if present.
pub fn strip_code_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim()
}

/// Parse model output as a JSON value, applying the repair chain when the
/// direct parse fails.
pub fn parse_with_repair(raw: &str) -> Result<Value, ClassifyError> {
    let cleaned = strip_code_fences(raw);

    match serde_json::from_str(cleaned) {
        Ok(value) => return Ok(value),
        Err(error) => {
            debug!(%error, "direct parse failed, entering repair chain");
        }
    }

    let mut repaired = cleaned.to_owned();

    // Truncated object: trim back to the last complete key-value pair and
    // balance the braces.
    if repaired.starts_with('{') && !repaired.ends_with('}') {
        repaired = repair_truncation(&repaired);
        if let Ok(value) = serde_json::from_str(&repaired) {
            return Ok(value);
        }
    }

    // Object embedded in surrounding prose.
    if let (Some(start), Some(end)) = (repaired.find('{'), repaired.rfind('}'))
        && start < end
    {
        repaired = repaired[start..=end].to_owned();
        if let Ok(value) = serde_json::from_str(&repaired) {
            return Ok(value);
        }
    }

    // Single-quoted keys/values.
    repaired = repaired.replace('\'', "\"");
    if let Ok(value) = serde_json::from_str(&repaired) {
        return Ok(value);
    }

    // Trailing commas before a closing bracket.
    repaired = strip_trailing_commas(&repaired);
    match serde_json::from_str(&repaired) {
        Ok(value) => Ok(value),
        Err(error) => Err(ClassifyError::MalformedOutput(error.to_string())),
    }
}

fn repair_truncation(input: &str) -> String {
    // Position of the last comma that is not inside a string literal.
    let mut last_valid_comma = None;
    let mut in_string = false;
    let mut prev = '\0';
    for (index, ch) in input.char_indices() {
        if ch == '"' && prev != '\\' {
            in_string = !in_string;
        } else if ch == ',' && !in_string {
            last_valid_comma = Some(index);
        }
        prev = ch;
    }

    let mut repaired = if let Some(index) = last_valid_comma {
        input[..index].trim_end().to_owned()
    } else {
        // No complete pair to fall back to; drop an unterminated trailing
        // key if one is open.
        let mut salvaged = input.to_owned();
        if unescaped_quote_count(&salvaged) % 2 != 0
            && let Some(last_quote) = salvaged.rfind('"')
        {
            let before = salvaged[..last_quote].trim_end();
            if before.ends_with(',') || before.ends_with('{') {
                salvaged = before.trim_end_matches(',').trim_end().to_owned();
            }
        }
        salvaged
    };

    let open = repaired.matches('{').count();
    let close = repaired.matches('}').count();
    for _ in close..open {
        repaired.push('}');
    }
    repaired
}

fn unescaped_quote_count(input: &str) -> usize {
    let mut count = 0;
    let mut prev = '\0';
    for ch in input.chars() {
        if ch == '"' && prev != '\\' {
            count += 1;
        }
        prev = ch;
    }
    count
}

fn strip_trailing_commas(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let chars: Vec<char> = input.chars().collect();
    for (index, &ch) in chars.iter().enumerate() {
        if ch == ',' {
            let next_meaningful = chars[index + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next_meaningful, Some('}') | Some(']')) {
                continue;
            }
        }
        output.push(ch);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clean_json_parses_directly() {
        let value = parse_with_repair(r#"{"target_agent": "scheduling"}"#).unwrap();
        assert_eq!(value, json!({"target_agent": "scheduling"}));
    }

    #[test]
    fn fenced_output_is_unwrapped() {
        let raw = "```json\n{\"target_agent\": \"billing\"}\n```";
        let value = parse_with_repair(raw).unwrap();
        assert_eq!(value["target_agent"], "billing");
    }

    #[test]
    fn truncated_object_is_trimmed_and_balanced() {
        let raw = r#"{"target_agent": "scheduling", "confidence": 0.9, "reasoning": "the cust"#;
        let value = parse_with_repair(raw).unwrap();
        assert_eq!(value["target_agent"], "scheduling");
        assert_eq!(value["confidence"], 0.9);
        assert!(value.get("reasoning").is_none());
    }

    #[test]
    fn object_embedded_in_prose_is_extracted() {
        let raw = r#"Here is the routing decision: {"target_agent": "billing"} — let me know!"#;
        let value = parse_with_repair(raw).unwrap();
        assert_eq!(value["target_agent"], "billing");
    }

    #[test]
    fn single_quotes_are_normalized() {
        let raw = "{'target_agent': 'billing', 'confidence': 0.7}";
        let value = parse_with_repair(raw).unwrap();
        assert_eq!(value["target_agent"], "billing");
        assert_eq!(value["confidence"], 0.7);
    }

    #[test]
    fn trailing_commas_are_stripped() {
        let raw = r#"{"target_agent": "billing", "tags": ["invoice",],}"#;
        let value = parse_with_repair(raw).unwrap();
        assert_eq!(value["target_agent"], "billing");
        assert_eq!(value["tags"], json!(["invoice"]));
    }

    #[test]
    fn unrepairable_output_fails_hard() {
        let err = parse_with_repair("the customer sounds upset").unwrap_err();
        assert!(matches!(err, ClassifyError::MalformedOutput(_)));
    }

    #[test]
    fn commas_inside_strings_do_not_confuse_truncation_repair() {
        let raw = r#"{"reasoning": "billing, not scheduling", "target_agent": "billing", "partial": "tru"#;
        let value = parse_with_repair(raw).unwrap();
        assert_eq!(value["reasoning"], "billing, not scheduling");
        assert_eq!(value["target_agent"], "billing");
    }
}
