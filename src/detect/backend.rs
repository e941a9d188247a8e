use serde::Deserialize;
use thiserror::Error;

use crate::frame::Frame;

/// One detection as reported by a backend, before rescaling.
///
/// `box_2d` is `[ymin, xmin, ymax, xmax]` normalized to 0..=1000.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct RawDetection {
    pub label: String,
    pub box_2d: [f32; 4],
}

impl RawDetection {
    pub fn new(label: impl Into<String>, box_2d: [f32; 4]) -> Self {
        Self {
            label: label.into(),
            box_2d,
        }
    }
}

/// Failure of a single analysis pass. Always recoverable: the pass is logged
/// and the next interval retries normally.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("backend transport error: {0}")]
    Transport(String),
    #[error("backend returned HTTP {code}: {body}")]
    Status { code: u16, body: String },
    #[error("backend request timed out")]
    Timeout,
    #[error("malformed backend response: {0}")]
    Malformed(String),
    #[error("failed to encode frame for analysis: {0}")]
    Encode(String),
}

/// External visual-analysis backend.
///
/// A backend is owned by the analysis scheduler and only ever runs one call
/// at a time. `analyze` may block on network I/O for as long as the backend's
/// own timeout allows; it must never be called from the capture loop.
pub trait DetectionBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run one analysis pass on a frame.
    fn analyze(&mut self, frame: &Frame) -> Result<Vec<RawDetection>, AnalysisError>;

    /// Check the backend is usable before the monitor starts. Backends with
    /// nothing to check keep the default.
    fn warm_up(&mut self) -> Result<(), AnalysisError> {
        Ok(())
    }
}

/// Decode backend text into detections.
///
/// Model output is frequently wrapped in a markdown code fence; a ```json
/// fence takes precedence, otherwise stray fences are removed.
pub fn parse_detections(text: &str) -> Result<Vec<RawDetection>, AnalysisError> {
    let body = strip_code_fence(text);
    if body.is_empty() {
        return Err(AnalysisError::Malformed("empty response text".to_string()));
    }
    serde_json::from_str(body).map_err(|e| AnalysisError::Malformed(e.to_string()))
}

fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    if let Some((_, rest)) = text.split_once("```json") {
        let inner = rest.split("```").next().unwrap_or(rest);
        return inner.trim();
    }
    if let Some(inner) = text.strip_prefix("```") {
        return inner.strip_suffix("```").unwrap_or(inner).trim();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json_array() {
        let dets = parse_detections(r#"[{"box_2d": [100, 100, 200, 200], "label": "Mobile Phone"}]"#)
            .unwrap();
        assert_eq!(dets, vec![RawDetection::new("Mobile Phone", [100.0, 100.0, 200.0, 200.0])]);
    }

    #[test]
    fn parses_json_fenced_response() {
        let text = "Here you go:\n```json\n[{\"box_2d\": [1, 2, 3, 4], \"label\": \"Smart Watch\"}]\n```\nDone.";
        let dets = parse_detections(text).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].label, "Smart Watch");
    }

    #[test]
    fn parses_bare_fence_and_empty_array() {
        assert!(parse_detections("```\n[]\n```").unwrap().is_empty());
        assert!(parse_detections("  []  ").unwrap().is_empty());
    }

    #[test]
    fn rejects_non_json_text() {
        let err = parse_detections("I cannot help with that.").unwrap_err();
        assert!(matches!(err, AnalysisError::Malformed(_)));
        assert!(matches!(parse_detections("   "), Err(AnalysisError::Malformed(_))));
    }

    #[test]
    fn rejects_wrong_box_arity() {
        let err = parse_detections(r#"[{"box_2d": [1, 2, 3], "label": "Cheat Sheet"}]"#).unwrap_err();
        assert!(matches!(err, AnalysisError::Malformed(_)));
    }
}
