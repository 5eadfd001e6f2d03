//! Parsing model output into [`Finding`]s.
//!
//! The prompt asks for `{"findings": [...]}` and nothing else, but local
//! vision models wander: some wrap the JSON in a code fence, some return a
//! bare array, some emit one object per line, and some add a sentence of
//! preamble. The grammar accepted here, tried in order on the fence-stripped
//! text:
//!
//! 1. a JSON object with a `findings` array
//! 2. a JSON array of finding objects
//! 3. one finding object per non-blank line
//! 4. the first embedded `{` or `[` value that satisfies rule 1 or 2
//!
//! A finding object has:
//!
//! | key        | required | notes                                          |
//! |------------|----------|------------------------------------------------|
//! | `severity` | yes      | see [`Severity::from_label`]                   |
//! | `message`  | yes      | non-empty after trimming                       |
//! | `page`     | no       | 1-based, inside the chunk; defaults to first   |
//! | `region`   | no       | `{x, y, width, height}` as page fractions      |
//!
//! Unknown keys are ignored. If the whole text is valid JSON but breaks the
//! schema, that schema error is reported rather than hunting for an
//! embedded value.

use crate::document::BoundingBox;
use crate::output::{Finding, Severity, SpanId};
use crate::pipeline::chunk::Chunk;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

/// Candidate positions tried by rule 4 before giving up.
const MAX_EMBEDDED_ATTEMPTS: usize = 64;

#[derive(Debug, Deserialize)]
struct FindingRecord {
    #[serde(default)]
    page: Option<u64>,
    severity: String,
    message: String,
    #[serde(default)]
    region: Option<RegionRecord>,
}

#[derive(Debug, Deserialize)]
struct RegionRecord {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
}

static RE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z0-9_-]*\s*\n(.*?)\n?```\s*$").unwrap());

fn strip_fence(input: &str) -> &str {
    let trimmed = input.trim();
    match RE_FENCE.captures(trimmed).and_then(|c| c.get(1)) {
        Some(body) => body.as_str().trim(),
        None => trimmed,
    }
}

/// Parse a chunk's raw model output.
///
/// Returns findings in output order with `span.ordinal` counting from zero,
/// or a description of why the output was rejected.
pub fn parse_findings(raw: &str, chunk: &Chunk) -> Result<Vec<Finding>, String> {
    let body = strip_fence(raw);
    if body.is_empty() {
        return Err("empty response".to_string());
    }

    let records = match serde_json::from_str::<Value>(body) {
        Ok(value) => records_from_value(value, true)?,
        Err(_) => match records_from_lines(body) {
            Some(records) => records,
            None => records_from_embedded(body).ok_or_else(|| {
                format!(
                    "no findings JSON in response: {:?}",
                    body.chars().take(120).collect::<String>()
                )
            })?,
        },
    };

    records
        .into_iter()
        .enumerate()
        .map(|(ordinal, record)| to_finding(record, ordinal, chunk))
        .collect()
}

/// Rules 1 and 2, plus a lone finding object when `allow_single` is set.
fn records_from_value(value: Value, allow_single: bool) -> Result<Vec<FindingRecord>, String> {
    match value {
        Value::Object(mut map) => match map.remove("findings") {
            Some(findings @ Value::Array(_)) => {
                serde_json::from_value(findings).map_err(|e| format!("bad finding: {}", e))
            }
            Some(_) => Err("\"findings\" is not an array".to_string()),
            None if allow_single => serde_json::from_value(Value::Object(map))
                .map(|r| vec![r])
                .map_err(|e| format!("bad finding: {}", e)),
            None => Err("object has no \"findings\" key".to_string()),
        },
        array @ Value::Array(_) => {
            serde_json::from_value(array).map_err(|e| format!("bad finding: {}", e))
        }
        other => Err(format!("expected object or array, got {}", kind_of(&other))),
    }
}

/// Rule 3: every non-blank line is one finding object.
fn records_from_lines(body: &str) -> Option<Vec<FindingRecord>> {
    body.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| serde_json::from_str::<FindingRecord>(l).ok())
        .collect()
}

/// Rule 4: first embedded value accepted by rules 1 or 2.
fn records_from_embedded(body: &str) -> Option<Vec<FindingRecord>> {
    body.char_indices()
        .filter(|(_, c)| *c == '{' || *c == '[')
        .take(MAX_EMBEDDED_ATTEMPTS)
        .find_map(|(pos, _)| {
            let mut values = serde_json::Deserializer::from_str(&body[pos..]).into_iter::<Value>();
            let value = values.next()?.ok()?;
            records_from_value(value, false).ok()
        })
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn to_finding(record: FindingRecord, ordinal: usize, chunk: &Chunk) -> Result<Finding, String> {
    let severity = Severity::from_label(&record.severity)
        .ok_or_else(|| format!("finding {}: unknown severity {:?}", ordinal, record.severity))?;

    let message = record.message.trim();
    if message.is_empty() {
        return Err(format!("finding {}: empty message", ordinal));
    }

    let page_index = match record.page {
        None => chunk.first_page(),
        Some(0) => return Err(format!("finding {}: page numbers start at 1", ordinal)),
        Some(p) => {
            let idx = (p - 1) as usize;
            if !chunk.contains_page(idx) {
                return Err(format!(
                    "finding {}: page {} outside pages {}",
                    ordinal,
                    p,
                    chunk.page_label()
                ));
            }
            idx
        }
    };

    let region = match record.region {
        None => None,
        Some(r) => {
            let values = [r.x, r.y, r.width, r.height];
            if values.iter().any(|v| !v.is_finite()) {
                return Err(format!("finding {}: region is not finite", ordinal));
            }
            if r.width < 0.0 || r.height < 0.0 {
                return Err(format!("finding {}: negative region size", ordinal));
            }
            Some(BoundingBox::clamped(r.x, r.y, r.width, r.height))
        }
    };

    Ok(Finding {
        id: None,
        chunk_index: chunk.index,
        page_index,
        region,
        severity,
        message: message.to_string(),
        span: SpanId {
            chunk: chunk.index,
            ordinal,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::chunk::chunk_units;
    use crate::pipeline::extract::{ContentUnit, TextBlock, TextSource};

    /// Chunk 0 covering pages 3-4 (0-based 2-3).
    fn chunk() -> Chunk {
        let units: Vec<_> = (2..4)
            .map(|i| ContentUnit::new(i, vec![TextBlock::new("U1", None)], TextSource::Layout, None))
            .collect();
        chunk_units(&units, 1000).remove(0)
    }

    #[test]
    fn canonical_object() {
        let raw = r#"{"findings": [
            {"page": 4, "severity": "error", "message": "U3 VCC unconnected", "region": {"x": 0.1, "y": 0.2, "width": 0.05, "height": 0.05}},
            {"severity": "info", "message": "Title block ok"}
        ]}"#;
        let findings = parse_findings(raw, &chunk()).unwrap();
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].page_index, 3);
        assert_eq!(findings[0].severity, Severity::Error);
        assert!(findings[0].region.is_some());
        assert_eq!(findings[1].page_index, 2, "defaults to chunk's first page");
        assert_eq!(findings[1].span, SpanId { chunk: 0, ordinal: 1 });
        assert!(findings.iter().all(|f| f.id.is_none()));
    }

    #[test]
    fn empty_findings_is_success() {
        assert!(parse_findings(r#"{"findings": []}"#, &chunk()).unwrap().is_empty());
    }

    #[test]
    fn fenced_array() {
        let raw = "```json\n[{\"severity\": \"HIGH\", \"message\": \"No ESD on USB\"}]\n```";
        let findings = parse_findings(raw, &chunk()).unwrap();
        assert_eq!(findings[0].severity, Severity::Error);
    }

    #[test]
    fn one_object_per_line() {
        let raw = "{\"severity\": \"warning\", \"message\": \"a\"}\n\n{\"severity\": \"note\", \"message\": \"b\"}";
        let findings = parse_findings(raw, &chunk()).unwrap();
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[1].severity, Severity::Info);
    }

    #[test]
    fn embedded_after_preamble() {
        let raw = "Sure! Here is my review of pages 3-4:\n{\"findings\": [{\"severity\": \"low\", \"message\": \"R7 tolerance\"}]}\nHope this helps.";
        let findings = parse_findings(raw, &chunk()).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Warning);
    }

    #[test]
    fn unknown_keys_ignored() {
        let raw = r#"{"findings": [{"severity": "info", "message": "ok", "confidence": 0.4, "component": "U1"}], "model": "llava"}"#;
        assert_eq!(parse_findings(raw, &chunk()).unwrap().len(), 1);
    }

    #[test]
    fn prose_is_rejected() {
        let err = parse_findings("The schematic looks fine to me.", &chunk()).unwrap_err();
        assert!(err.contains("no findings JSON"));
    }

    #[test]
    fn empty_is_rejected() {
        assert!(parse_findings("  \n ", &chunk()).is_err());
    }

    #[test]
    fn missing_severity_is_rejected() {
        let err = parse_findings(r#"{"findings": [{"message": "x"}]}"#, &chunk()).unwrap_err();
        assert!(err.contains("severity"), "got {err}");
    }

    #[test]
    fn unknown_severity_is_rejected() {
        let raw = r#"[{"severity": "catastrophic", "message": "x"}]"#;
        assert!(parse_findings(raw, &chunk()).unwrap_err().contains("catastrophic"));
    }

    #[test]
    fn blank_message_is_rejected() {
        let raw = r#"[{"severity": "info", "message": "   "}]"#;
        assert!(parse_findings(raw, &chunk()).is_err());
    }

    #[test]
    fn page_outside_chunk_is_rejected() {
        let raw = r#"[{"page": 9, "severity": "info", "message": "x"}]"#;
        assert!(parse_findings(raw, &chunk()).unwrap_err().contains("outside"));
        let raw = r#"[{"page": 0, "severity": "info", "message": "x"}]"#;
        assert!(parse_findings(raw, &chunk()).is_err());
    }

    #[test]
    fn negative_region_size_is_rejected() {
        let raw = r#"[{"severity": "info", "message": "x", "region": {"x": 0.1, "y": 0.1, "width": -0.2, "height": 0.1}}]"#;
        assert!(parse_findings(raw, &chunk()).is_err());
    }

    #[test]
    fn region_is_clamped() {
        let raw = r#"[{"severity": "info", "message": "x", "region": {"x": 0.9, "y": -0.1, "width": 0.5, "height": 0.2}}]"#;
        let region = parse_findings(raw, &chunk()).unwrap()[0].region.unwrap();
        assert!(region.right() <= 1.0 + 1e-6);
        assert_eq!(region.y, 0.0);
    }

    #[test]
    fn valid_json_with_wrong_shape_reports_schema_error() {
        let err = parse_findings(r#"{"findings": "none"}"#, &chunk()).unwrap_err();
        assert!(err.contains("not an array"));
        let err = parse_findings("42", &chunk()).unwrap_err();
        assert!(err.contains("a number"));
    }
}
