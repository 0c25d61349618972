use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Transcript records (one JSONL line each)
// ---------------------------------------------------------------------------

/// A single transcript line. Only records whose `type` is `message`, `user`,
/// or `assistant` (legacy spellings of the same thing) carry searchable text;
/// everything else is skipped by the indexer and the scanners.
#[derive(Debug, Deserialize)]
pub struct TranscriptRecord {
    #[serde(rename = "type")]
    pub record_type: String,
    pub message: Option<MessagePayload>,
    pub timestamp: Option<TimestampValue>,
}

impl TranscriptRecord {
    /// True if this record is a user/assistant message with a payload.
    pub fn is_message(&self) -> bool {
        if !matches!(self.record_type.as_str(), "message" | "user" | "assistant") {
            return false;
        }
        self.message
            .as_ref()
            .is_some_and(|m| matches!(m.role.as_str(), "user" | "assistant"))
    }
}

#[derive(Debug, Deserialize)]
pub struct MessagePayload {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: ContentValue,
}

/// Content can be either a plain string (user text) or an array of content blocks.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ContentValue {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Default for ContentValue {
    fn default() -> Self {
        ContentValue::Text(String::new())
    }
}

// ---------------------------------------------------------------------------
// Content blocks (tagged enum via `type`; unknown types are tolerated)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text {
        #[serde(default)]
        text: String,
    },
    #[serde(rename = "thinking")]
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    #[serde(rename = "tool_use", alias = "toolCall")]
    ToolCall {
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: serde_json::Value,
        #[serde(default)]
        arguments: serde_json::Value,
    },
    #[serde(rename = "tool_result", alias = "toolResult")]
    ToolResult {
        #[serde(default)]
        content: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

impl MessagePayload {
    /// Role-bearing conversational text only: plain string content plus
    /// `text` blocks. This is what the scanners match against and what
    /// snippets are cut from.
    pub fn search_text(&self) -> String {
        match &self.content {
            ContentValue::Text(s) => s.clone(),
            ContentValue::Blocks(blocks) => {
                let mut parts = Vec::new();
                for block in blocks {
                    if let ContentBlock::Text { text } = block {
                        parts.push(text.as_str());
                    }
                }
                parts.join(" ")
            }
        }
    }

    /// Everything searchable: conversational text, thinking blocks, tool-call
    /// names and string arguments, and tool-result text. This is what gets
    /// tokenized into the inverted index.
    pub fn index_text(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        match &self.content {
            ContentValue::Text(s) => parts.push(s.clone()),
            ContentValue::Blocks(blocks) => {
                for block in blocks {
                    match block {
                        ContentBlock::Text { text } => parts.push(text.clone()),
                        ContentBlock::Thinking { thinking } => parts.push(thinking.clone()),
                        ContentBlock::ToolCall {
                            name,
                            input,
                            arguments,
                        } => {
                            parts.push(name.clone());
                            collect_string_args(input, &mut parts);
                            collect_string_args(arguments, &mut parts);
                        }
                        ContentBlock::ToolResult { content } => {
                            collect_result_text(content, &mut parts);
                        }
                        ContentBlock::Other => {}
                    }
                }
            }
        }
        parts.retain(|p| !p.is_empty());
        parts.join(" ")
    }
}

/// Pull string-valued arguments out of a tool-call input. Nested structures
/// are not descended into; the index only needs the obvious text.
fn collect_string_args(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::String(s) => out.push(s.clone()),
        serde_json::Value::Object(map) => {
            for v in map.values() {
                if let serde_json::Value::String(s) = v {
                    out.push(s.clone());
                }
            }
        }
        _ => {}
    }
}

/// Pull text out of a tool-result payload: a bare string, an object with a
/// `text` field, or an array of `text` blocks.
fn collect_result_text(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::String(s) => out.push(s.clone()),
        serde_json::Value::Object(map) => {
            if let Some(serde_json::Value::String(s)) = map.get("text") {
                out.push(s.clone());
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                match item {
                    serde_json::Value::String(s) => out.push(s.clone()),
                    serde_json::Value::Object(map) => {
                        let is_text = map
                            .get("type")
                            .and_then(|t| t.as_str())
                            .map_or(true, |t| t == "text");
                        if is_text {
                            if let Some(serde_json::Value::String(s)) = map.get("text") {
                                out.push(s.clone());
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Transcript timestamps arrive either as ISO-8601 strings or as Unix
/// numerics (milliseconds if > 10^12, else seconds).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TimestampValue {
    Text(String),
    Number(f64),
}

impl TimestampValue {
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            TimestampValue::Text(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            TimestampValue::Number(n) => {
                let secs = if *n > 1e12 { *n / 1000.0 } else { *n };
                Utc.timestamp_opt(secs as i64, 0).single()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> TranscriptRecord {
        serde_json::from_str(line).unwrap()
    }

    #[test]
    fn test_message_record_detection() {
        let rec = parse(r#"{"type":"message","message":{"role":"user","content":"hello"}}"#);
        assert!(rec.is_message());

        // Legacy spellings
        let rec = parse(r#"{"type":"user","message":{"role":"user","content":"hi"}}"#);
        assert!(rec.is_message());
        let rec = parse(r#"{"type":"assistant","message":{"role":"assistant","content":"hi"}}"#);
        assert!(rec.is_message());

        let rec = parse(r#"{"type":"progress","message":{"role":"user","content":"x"}}"#);
        assert!(!rec.is_message());
        let rec = parse(r#"{"type":"message"}"#);
        assert!(!rec.is_message());
        let rec = parse(r#"{"type":"message","message":{"role":"system","content":"x"}}"#);
        assert!(!rec.is_message());
    }

    #[test]
    fn test_search_text_is_text_blocks_only() {
        let rec = parse(
            r#"{"type":"message","message":{"role":"assistant","content":[
                {"type":"text","text":"visible reply"},
                {"type":"thinking","thinking":"private notes"},
                {"type":"tool_use","name":"run_shell","input":{"cmd":"cargo check"}}
            ]}}"#,
        );
        let msg = rec.message.unwrap();
        assert_eq!(msg.search_text(), "visible reply");
    }

    #[test]
    fn test_index_text_includes_tools_and_thinking() {
        let rec = parse(
            r#"{"type":"message","message":{"role":"assistant","content":[
                {"type":"text","text":"visible reply"},
                {"type":"thinking","thinking":"private notes"},
                {"type":"tool_use","name":"run_shell","input":{"cmd":"cargo check","count":3}},
                {"type":"tool_result","content":[{"type":"text","text":"build finished"}]}
            ]}}"#,
        );
        let text = rec.message.unwrap().index_text();
        assert!(text.contains("visible reply"));
        assert!(text.contains("private notes"));
        assert!(text.contains("run_shell"));
        assert!(text.contains("cargo check"));
        assert!(text.contains("build finished"));
        // Non-string argument values are not collected
        assert!(!text.contains('3'));
    }

    #[test]
    fn test_unknown_block_type_is_tolerated() {
        let rec = parse(
            r#"{"type":"message","message":{"role":"user","content":[
                {"type":"image","source":"..."},
                {"type":"text","text":"caption"}
            ]}}"#,
        );
        assert_eq!(rec.message.unwrap().search_text(), "caption");
    }

    #[test]
    fn test_camel_case_block_aliases() {
        let rec = parse(
            r#"{"type":"message","message":{"role":"assistant","content":[
                {"type":"toolCall","name":"search","arguments":{"q":"auth tokens"}},
                {"type":"toolResult","content":"12 results"}
            ]}}"#,
        );
        let text = rec.message.unwrap().index_text();
        assert!(text.contains("search"));
        assert!(text.contains("auth tokens"));
        assert!(text.contains("12 results"));
    }

    #[test]
    fn test_timestamp_formats() {
        let ts = TimestampValue::Text("2026-01-15T10:30:00Z".into());
        let dt = ts.to_utc().unwrap();
        assert_eq!(dt.to_rfc3339(), "2026-01-15T10:30:00+00:00");

        // Seconds vs milliseconds
        let secs = TimestampValue::Number(1_700_000_000.0);
        let millis = TimestampValue::Number(1_700_000_000_000.0);
        assert_eq!(secs.to_utc().unwrap(), millis.to_utc().unwrap());

        let bad = TimestampValue::Text("not a date".into());
        assert!(bad.to_utc().is_none());
    }
}
