//! Recover tool calls embedded in response text.
//!
//! Providers without native tool calling emit the calls as JSON inside
//! their text content. This parser accepts, in order:
//!
//! 1. marker-delimited JSON (`<<ORCH_TOOL_CALLS>> … <<ORCH_TOOL_CALLS_END>>`)
//! 2. fenced ```json blocks
//! 3. balanced-brace JSON found around a `"tool_calls"` / `"id":"call_`
//!    keyword anywhere in the text
//!
//! and normalizes whatever it finds into [`ToolCall`] values. Candidate
//! scanning is capped so pathological input stays cheap.

use murmur_llm::types::{FunctionCall, ToolCall};

/// Opening marker for explicitly delimited tool calls.
pub const MARKER_START: &str = "<<ORCH_TOOL_CALLS>>";
/// Closing marker.
pub const MARKER_END: &str = "<<ORCH_TOOL_CALLS_END>>";

/// Candidate JSON starts examined per keyword hit.
const MAX_CANDIDATES: usize = 32;

/// Parse tool calls out of free-form content. Empty when none found.
pub fn parse_tool_calls(content: &str) -> Vec<ToolCall> {
    if content.is_empty() {
        return Vec::new();
    }

    // 1. Marker-delimited payload.
    if let Some(start) = content.find(MARKER_START) {
        let after = &content[start + MARKER_START.len()..];
        let payload = match after.find(MARKER_END) {
            Some(end) => &after[..end],
            None => after,
        };
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(payload.trim()) {
            let calls = normalize(&value);
            if !calls.is_empty() {
                return calls;
            }
        }
    }

    // 2. Fenced ```json blocks.
    for block in fenced_blocks(content) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(block.trim()) {
            let calls = normalize(&value);
            if !calls.is_empty() {
                return calls;
            }
        }
    }

    // 3. Balanced JSON around a keyword.
    for keyword in ["\"tool_calls\"", "\"id\":\"call_", "\"id\": \"call_"] {
        if let Some(pos) = content.find(keyword) {
            for value in balanced_candidates(content, pos) {
                let calls = normalize(&value);
                if !calls.is_empty() {
                    return calls;
                }
            }
        }
    }

    Vec::new()
}

/// Extract the bodies of ```json fenced blocks (``` alone also accepted).
fn fenced_blocks(content: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = content;
    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let lang = after[..body_start].trim();
        let body = &after[body_start..];
        match body.find("```") {
            Some(close) => {
                if lang.is_empty() || lang.eq_ignore_ascii_case("json") {
                    blocks.push(&body[..close]);
                }
                rest = &body[close + 3..];
            }
            None => break,
        }
    }
    blocks
}

/// Walk back from `keyword_pos` over candidate `{` / `[` openers and yield
/// every balanced JSON value that parses.
fn balanced_candidates(content: &str, keyword_pos: usize) -> Vec<serde_json::Value> {
    let bytes = content.as_bytes();
    let mut values = Vec::new();
    let mut examined = 0;

    for start in (0..=keyword_pos).rev() {
        if bytes[start] != b'{' && bytes[start] != b'[' {
            continue;
        }
        examined += 1;
        if examined > MAX_CANDIDATES {
            break;
        }
        if let Some(end) = balanced_end(content, start)
            && end > keyword_pos
            && let Ok(value) = serde_json::from_str::<serde_json::Value>(&content[start..=end])
        {
            values.push(value);
        }
    }
    values
}

/// Index of the byte closing the JSON value opening at `start`, string
/// escapes respected.
fn balanced_end(content: &str, start: usize) -> Option<usize> {
    let bytes = content.as_bytes();
    let (open, close) = match bytes[start] {
        b'{' => (b'{', b'}'),
        b'[' => (b'[', b']'),
        _ => return None,
    };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b if b == open => depth += 1,
            b if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Normalize a parsed JSON value into tool calls.
///
/// Accepts `{"tool_calls": [...]}`, a bare array of calls, or a single
/// call object, in both flat (`name`/`arguments`) and OpenAI
/// (`function.name`/`function.arguments`) shapes.
fn normalize(value: &serde_json::Value) -> Vec<ToolCall> {
    if let Some(array) = value.get("tool_calls").and_then(|v| v.as_array()) {
        return array.iter().enumerate().filter_map(normalize_indexed).collect();
    }
    if let Some(array) = value.as_array() {
        return array.iter().enumerate().filter_map(normalize_indexed).collect();
    }
    normalize_call(value, 0).into_iter().collect()
}

fn normalize_indexed((index, value): (usize, &serde_json::Value)) -> Option<ToolCall> {
    normalize_call(value, index)
}

fn normalize_call(value: &serde_json::Value, index: usize) -> Option<ToolCall> {
    let name = value
        .get("name")
        .and_then(|v| v.as_str())
        .or_else(|| {
            value
                .get("function")
                .and_then(|f| f.get("name"))
                .and_then(|v| v.as_str())
        })?
        .to_string();

    let arguments_value = value
        .get("arguments")
        .or_else(|| value.get("function").and_then(|f| f.get("arguments")));
    let arguments = match arguments_value {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "{}".to_string(),
    };

    let id = value
        .get("id")
        .and_then(|v| v.as_str())
        .map(String::from)
        .unwrap_or_else(|| format!("call_{index}"));

    Some(ToolCall {
        id,
        call_type: "function".into(),
        function: FunctionCall { name, arguments },
    })
}
