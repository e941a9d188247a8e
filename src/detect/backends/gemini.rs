//! Gemini `generateContent` backend.
//!
//! The frame is JPEG-encoded in memory and sent inline (base64) together with
//! the proctoring prompt. The model is asked for a bare JSON array; anything it
//! wraps around that array is stripped by `parse_detections`.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::Secret;
use crate::detect::backend::{parse_detections, AnalysisError, DetectionBackend, RawDetection};
use crate::frame::Frame;

pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

pub const PROCTOR_PROMPT: &str = "Analyze this image for exam malpractice.\n\
Detect: 'Mobile Phone', 'Cheat Sheet', 'Smart Watch', 'Another Person'.\n\
Output ONLY valid JSON: [{\"box_2d\": [ymin, xmin, ymax, xmax], \"label\": \"object_name\"}]\n\
Coordinates normalized 0-1000. Return [] if safe.";

#[derive(Clone, Debug)]
pub struct GeminiSettings {
    pub api_key: Secret,
    pub model: String,
    pub endpoint: String,
    pub timeout: Duration,
    pub jpeg_quality: u8,
}

pub struct GeminiBackend {
    agent: ureq::Agent,
    settings: GeminiSettings,
}

impl GeminiBackend {
    pub fn new(settings: GeminiSettings) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(settings.timeout).build();
        Self { agent, settings }
    }

    fn model_url(&self) -> String {
        format!(
            "{}/models/{}",
            self.settings.endpoint.trim_end_matches('/'),
            self.settings.model
        )
    }

    fn url(&self) -> String {
        format!("{}:generateContent", self.model_url())
    }
}

impl DetectionBackend for GeminiBackend {
    fn name(&self) -> &'static str {
        "gemini"
    }

    /// Fetch the model's metadata, which checks the endpoint, the key and
    /// the model name without spending a generation call.
    fn warm_up(&mut self) -> Result<(), AnalysisError> {
        self.agent
            .get(&self.model_url())
            .set("x-goog-api-key", self.settings.api_key.expose())
            .call()
            .map_err(map_ureq_error)?;
        log::info!("gemini model {} reachable", self.settings.model);
        Ok(())
    }

    fn analyze(&mut self, frame: &Frame) -> Result<Vec<RawDetection>, AnalysisError> {
        let jpeg = frame
            .encode_jpeg(self.settings.jpeg_quality)
            .map_err(|e| AnalysisError::Encode(e.to_string()))?;
        let body = request_body(PROCTOR_PROMPT, &STANDARD.encode(jpeg));

        let response = self
            .agent
            .post(&self.url())
            .set("x-goog-api-key", self.settings.api_key.expose())
            .send_json(body)
            .map_err(map_ureq_error)?;
        let parsed: GenerateContentResponse = response
            .into_json()
            .map_err(|e| AnalysisError::Malformed(format!("invalid response body: {}", e)))?;
        let text = parsed
            .text()
            .ok_or_else(|| AnalysisError::Malformed("response carried no text".to_string()))?;
        log::debug!("gemini response text: {}", text);
        parse_detections(&text)
    }
}

fn request_body(prompt: &str, jpeg_base64: &str) -> Value {
    json!({
        "contents": [{
            "parts": [
                { "text": prompt },
                { "inline_data": { "mime_type": "image/jpeg", "data": jpeg_base64 } }
            ]
        }]
    })
}

fn map_ureq_error(err: ureq::Error) -> AnalysisError {
    match err {
        ureq::Error::Status(code, response) => AnalysisError::Status {
            code,
            body: response.into_string().unwrap_or_default(),
        },
        ureq::Error::Transport(transport) => {
            let message = transport.to_string();
            if message.contains("timed out") {
                AnalysisError::Timeout
            } else {
                AnalysisError::Transport(message)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenated text parts of the first candidate.
    fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}
