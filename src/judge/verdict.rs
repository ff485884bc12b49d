//! Strict parsing of judge verdict JSON.
//!
//! The contract is `{"winner": "A"|"B", "confidence": 0.5..=1.0, "rationale": "..."}`.
//! Anything else is a protocol failure; nothing is coerced into a guess.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::JudgeError;
use crate::model::SlotLabel;

/// Minimum and maximum confidence a judge may report.
pub const CONFIDENCE_MIN: f64 = 0.5;
pub const CONFIDENCE_MAX: f64 = 1.0;

/// A validated verdict. `winner` names a slot, not a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub winner: SlotLabel,
    pub confidence: f64,
    pub rationale: String,
}

#[derive(Debug, Deserialize)]
struct VerdictJson {
    #[serde(default)]
    winner: Option<Value>,
    #[serde(default)]
    confidence: Option<Value>,
    #[serde(default)]
    rationale: Option<Value>,
}

/// Parse a raw judge reply into a [`Verdict`].
pub fn parse_verdict(raw: &str) -> Result<Verdict, JudgeError> {
    let json_str = extract_json(raw)
        .ok_or_else(|| JudgeError::Protocol("no JSON object in response".into()))?;

    let parsed: VerdictJson =
        serde_json::from_str(json_str).map_err(|e| JudgeError::Protocol(e.to_string()))?;

    let winner = match parsed.winner {
        Some(Value::String(s)) => match s.trim() {
            "A" => SlotLabel::A,
            "B" => SlotLabel::B,
            other => {
                return Err(JudgeError::Protocol(format!(
                    "winner must be \"A\" or \"B\", got {other:?}"
                )))
            }
        },
        Some(other) => {
            return Err(JudgeError::Protocol(format!(
                "winner must be a string, got {other}"
            )))
        }
        None => return Err(JudgeError::Protocol("missing 'winner'".into())),
    };

    let confidence = match parsed.confidence {
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| JudgeError::Protocol("confidence is not a finite number".into()))?,
        Some(other) => {
            return Err(JudgeError::Protocol(format!(
                "confidence must be numeric, got {other}"
            )))
        }
        None => return Err(JudgeError::Protocol("missing 'confidence'".into())),
    };
    if !(CONFIDENCE_MIN..=CONFIDENCE_MAX).contains(&confidence) {
        return Err(JudgeError::Protocol(format!(
            "confidence out of range [0.5, 1.0]: {confidence}"
        )));
    }

    let rationale = match parsed.rationale {
        Some(Value::String(s)) => s,
        Some(other) => {
            return Err(JudgeError::Protocol(format!(
                "rationale must be a string, got {other}"
            )))
        }
        None => return Err(JudgeError::Protocol("missing 'rationale'".into())),
    };

    Ok(Verdict {
        winner,
        confidence,
        rationale,
    })
}

/// Locate the JSON object in a reply.
///
/// Tries a ```json fence first, then the first balanced `{...}` span. Braces inside
/// string literals do not count towards nesting.
fn extract_json(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        if let Some(end) = body.find("```") {
            if let Some(obj) = balanced_object(body[..end].trim()) {
                return Some(obj);
            }
        }
    }

    balanced_object(trimmed)
}

fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let remainder = &text[start..];
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in remainder.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&remainder[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
