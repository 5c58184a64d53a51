//! Decision-JSON extractor (§4.1), ported from the five ordered strategies in
//! `LLMResponseParser.parse_llm_response` / `validate_decision_structure`
//! (original_source `core/json_parser.py`): direct parse, fenced code block,
//! brace-counting, YAML, then line-by-line `key: value`. Never fails — the
//! last resort is the `direct_response` fallback object.

use regex::Regex;
use serde_json::{json, Map, Value};

/// Runs the five strategies in order and returns the first object a strategy
/// produces, already passed through [`normalize_decision`].
pub fn extract_decision_json(text: &str) -> Value {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return fallback_object(text);
    }

    if let Some(value) = try_direct_parse(trimmed) {
        return normalize_decision(value);
    }
    if let Some(value) = try_fenced_code_block(trimmed) {
        return normalize_decision(value);
    }
    if let Some(value) = try_brace_counting(trimmed) {
        return normalize_decision(value);
    }
    if let Some(value) = try_yaml(trimmed) {
        return normalize_decision(value);
    }
    if let Some(value) = try_key_value_lines(trimmed) {
        return normalize_decision(value);
    }

    fallback_object(text)
}

fn try_direct_parse(text: &str) -> Option<Value> {
    let value: Value = serde_json::from_str(text).ok()?;
    value.is_object().then_some(value)
}

fn try_fenced_code_block(text: &str) -> Option<Value> {
    let patterns = [
        r"(?s)```json\s*\n(.*?)\n```",
        r"(?s)```\s*\n(.*?)\n```",
        r"(?s)`([^`]*?)`",
    ];
    for pattern in patterns {
        let re = Regex::new(pattern).expect("static regex");
        for caps in re.captures_iter(text) {
            let candidate = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
            if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                if value.is_object() {
                    return Some(value);
                }
            }
        }
    }
    None
}

fn try_brace_counting(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    for (offset, ch) in text[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + ch.len_utf8();
                    let candidate = std::str::from_utf8(&bytes[start..end]).ok()?;
                    if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                        if value.is_object() {
                            return Some(value);
                        }
                    }
                    return None;
                }
            }
            _ => {}
        }
    }
    None
}

fn try_yaml(text: &str) -> Option<Value> {
    let value: serde_yaml::Value = serde_yaml::from_str(text).ok()?;
    let json_value = serde_json::to_value(value).ok()?;
    json_value.is_object().then_some(json_value)
}

fn try_key_value_lines(text: &str) -> Option<Value> {
    let kv_re = Regex::new(r"^([^:=]+)[:=]\s*(.+)$").expect("static regex");
    let mut map = Map::new();
    for line in text.lines() {
        let line = line.trim();
        let Some(caps) = kv_re.captures(line) else { continue };
        let key = caps[1].trim().to_lowercase().replace(' ', "_");
        let raw_value = caps[2].trim();
        let value = serde_json::from_str::<Value>(raw_value)
            .unwrap_or_else(|_| Value::String(raw_value.to_string()));
        map.insert(key, value);
    }
    if map.is_empty() {
        None
    } else {
        Some(Value::Object(map))
    }
}

fn fallback_object(original_text: &str) -> Value {
    json!({
        "approach": "direct_response",
        "reasoning": "Could not parse as structured data",
        "response": original_text,
    })
}

const VALID_APPROACHES: [&str; 3] = ["agent_coordination", "direct_response", "mcp_tools"];

/// Plan-object normalization (§4.1): require `approach` (synthesized from the
/// presence of `steps`/`tools`-ish keys) and `reasoning`; collapse any
/// unrecognized `approach` to `direct_response`.
pub fn normalize_decision(mut value: Value) -> Value {
    let Some(obj) = value.as_object_mut() else {
        return fallback_object(&value.to_string());
    };

    if obj.contains_key("response") && !obj.contains_key("approach") {
        let response = obj.get("response").cloned().unwrap_or(Value::Null);
        return json!({
            "approach": "direct_response",
            "reasoning": "Direct response provided",
            "response": response,
        });
    }

    if !obj.contains_key("approach") {
        let has_any = |keys: &[&str]| keys.iter().any(|k| obj.contains_key(*k));
        let approach = if has_any(&["steps", "agents", "tasks", "workflow", "execution_plan"]) {
            "agent_coordination"
        } else if has_any(&["tools", "mcp"]) {
            "mcp_tools"
        } else {
            "direct_response"
        };
        obj.insert("approach".to_string(), Value::String(approach.to_string()));
    }

    if !obj.contains_key("reasoning") {
        obj.insert(
            "reasoning".to_string(),
            Value::String("Decision made based on user request".to_string()),
        );
    }

    let approach_ok = obj
        .get("approach")
        .and_then(Value::as_str)
        .is_some_and(|a| VALID_APPROACHES.contains(&a));
    if !approach_ok {
        obj.insert("approach".to_string(), Value::String("direct_response".to_string()));
        obj.insert(
            "reasoning".to_string(),
            Value::String("Invalid approach specified, defaulting to direct_response".to_string()),
        );
    }

    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_parse_wins_when_pristine() {
        let v = extract_decision_json(r#"{"approach": "direct_response", "reasoning": "x", "response": "y"}"#);
        assert_eq!(v["approach"], "direct_response");
    }

    #[test]
    fn fenced_json_matches_pristine_equivalent() {
        let pristine = extract_decision_json(r#"{"execution_plan": [], "approach": "agent_coordination"}"#);
        let fenced = extract_decision_json("```json\n{\"execution_plan\": [], \"approach\": \"agent_coordination\"}\n```");
        assert_eq!(pristine, fenced);
    }

    #[test]
    fn brace_counting_pulls_json_out_of_prose() {
        let text = "Sure, here is the plan: {\"approach\": \"mcp_tools\", \"tools\": [\"read_file\"]} thanks!";
        let v = extract_decision_json(text);
        assert_eq!(v["approach"], "mcp_tools");
    }

    #[test]
    fn unparseable_text_falls_back_to_direct_response() {
        let v = extract_decision_json("I cannot help");
        assert_eq!(v["approach"], "direct_response");
        assert_eq!(v["response"], "I cannot help");
        assert!(v.get("execution_plan").is_none());
    }

    #[test]
    fn invalid_approach_collapses_to_direct_response() {
        let v = normalize_decision(json!({"approach": "do_anything", "reasoning": "r"}));
        assert_eq!(v["approach"], "direct_response");
    }

    #[test]
    fn key_value_lines_are_parsed_when_nothing_else_matches() {
        let v = extract_decision_json("approach: mcp_tools\nreasoning: because tools\n");
        assert_eq!(v["approach"], "mcp_tools");
    }
}
