//! JSON extraction from free-form model output.
//!
//! Models wrap the final record in prose or fenced code blocks. The
//! extractor tries, in order: every fenced region in document order, then
//! the outermost brace span, then hands the raw text back unchanged so the
//! caller fails cleanly instead of emitting silently wrong data.

use serde_json::Value;

pub const DEFAULT_FENCE: &str = "```";

#[derive(Debug, Clone, PartialEq)]
pub enum ExtractedJson {
    /// The first region that parsed as strict JSON.
    Parsed(Value),
    /// No syntactically valid JSON anywhere; the original text, unchanged.
    Raw(String),
}

pub fn extract_json(raw: &str) -> ExtractedJson {
    extract_json_with_fence(raw, DEFAULT_FENCE)
}

/// Extraction with a non-default fence marker.
pub fn extract_json_with_fence(raw: &str, fence: &str) -> ExtractedJson {
    for region in fenced_regions(raw, fence) {
        if let Ok(value) = serde_json::from_str::<Value>(region) {
            return ExtractedJson::Parsed(value);
        }
    }

    if let Some(span) = brace_span(raw) {
        if let Ok(value) = serde_json::from_str::<Value>(span) {
            return ExtractedJson::Parsed(value);
        }
    }

    ExtractedJson::Raw(raw.to_string())
}

/// Non-greedy scan for fenced regions, in document order. An opening fence
/// may carry a language tag on its first line; the tag is stripped.
fn fenced_regions<'a>(text: &'a str, fence: &str) -> Vec<&'a str> {
    let mut regions = Vec::new();
    let mut rest = text;

    loop {
        let Some(open) = rest.find(fence) else { break };
        let after_open = &rest[open + fence.len()..];
        let Some(close) = after_open.find(fence) else { break };

        let region = &after_open[..close];
        let region = strip_language_tag(region);
        regions.push(region.trim());

        rest = &after_open[close + fence.len()..];
    }

    regions
}

/// Drops a `json`-style language tag from the first line of a fenced region.
fn strip_language_tag(region: &str) -> &str {
    match region.find('\n') {
        Some(newline) => {
            let first_line = region[..newline].trim();
            if first_line.is_empty() || first_line.starts_with('{') || first_line.starts_with('[') {
                region
            } else {
                &region[newline + 1..]
            }
        }
        None => region,
    }
}

/// The span from the first `{` to the last `}` in the text, if any.
fn brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if start < end {
        Some(&text[start..=end])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fenced_with_language_tag() {
        let raw = "Berikut datanya:\n```json\n{\"project\": {\"title\": \"Toko\"}}\n```\nSemoga membantu.";
        let ExtractedJson::Parsed(value) = extract_json(raw) else {
            panic!("expected parsed JSON");
        };
        assert_eq!(value, json!({"project": {"title": "Toko"}}));
    }

    #[test]
    fn test_fenced_without_language_tag() {
        let raw = "```\n{\"a\": 1}\n```";
        assert_eq!(extract_json(raw), ExtractedJson::Parsed(json!({"a": 1})));
    }

    #[test]
    fn test_first_parsable_region_wins() {
        let raw = "```json\nnot json at all\n```\ntext\n```json\n{\"b\": 2}\n```";
        assert_eq!(extract_json(raw), ExtractedJson::Parsed(json!({"b": 2})));
    }

    #[test]
    fn test_brace_span_fallback() {
        let raw = "Saya sudah siapkan: {\"project\": {\"id\": \"p-1\"}} — silakan dicek.";
        let ExtractedJson::Parsed(value) = extract_json(raw) else {
            panic!("expected parsed JSON");
        };
        assert_eq!(value["project"]["id"], "p-1");
    }

    #[test]
    fn test_brace_span_with_nested_objects() {
        let raw = "prefix {\"outer\": {\"inner\": [1, 2]}} suffix";
        assert_eq!(
            extract_json(raw),
            ExtractedJson::Parsed(json!({"outer": {"inner": [1, 2]}}))
        );
    }

    #[test]
    fn test_no_json_returns_raw_unchanged() {
        let raw = "Maaf, saya masih butuh informasi budget Anda.";
        assert_eq!(extract_json(raw), ExtractedJson::Raw(raw.to_string()));
    }

    #[test]
    fn test_unbalanced_braces_return_raw() {
        let raw = "ini bukan json } sama sekali {";
        assert_eq!(extract_json(raw), ExtractedJson::Raw(raw.to_string()));
    }

    #[test]
    fn test_round_trip_through_fence() {
        let original = json!({"project": {"title": "Aplikasi Kasir"}, "talents": [{"name": "Backend"}]});
        let raw = format!("```json\n{}\n```", serde_json::to_string_pretty(&original).unwrap());
        assert_eq!(extract_json(&raw), ExtractedJson::Parsed(original));
    }

    #[test]
    fn test_round_trip_through_prose() {
        let original = json!({"k": "v"});
        let raw = format!("sebelum {} sesudah", serde_json::to_string(&original).unwrap());
        assert_eq!(extract_json(&raw), ExtractedJson::Parsed(original));
    }

    #[test]
    fn test_custom_fence_marker() {
        let raw = "~~~\n{\"c\": 3}\n~~~";
        assert_eq!(
            extract_json_with_fence(raw, "~~~"),
            ExtractedJson::Parsed(json!({"c": 3}))
        );
    }

    #[test]
    fn test_unterminated_fence_falls_back_to_braces() {
        let raw = "```json\n{\"d\": 4}";
        assert_eq!(extract_json(raw), ExtractedJson::Parsed(json!({"d": 4})));
    }
}
