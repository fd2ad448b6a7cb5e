//! Analysis client: builds the `generateContent` request for the hosted
//! model and turns its reply into an [`AnalysisResult`].
//!
//! The round-trip itself is performed by the shell through the HTTP
//! capability; everything here is pure data in and data out, which keeps
//! the whole contract testable without a network.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::error;

use crate::capabilities::{HttpError, HttpRequest, HttpResponse, HttpResult, ValidatedUrl};
use crate::encoding::{EncodeError, EncodedImage};
use crate::normalize::{self, AnalysisResult};
use crate::{AppError, ErrorKind, ANALYSIS_API_HOST, ANALYSIS_MODEL, ANALYSIS_TIMEOUT_MS};

/// Instruction sent with every image. The four evidence categories here
/// mirror the categories the response schema asks the model to fill.
pub const ANALYSIS_PROMPT: &str = "You are a world-class expert in geographic location detection from images. Your task is to analyze the provided image and determine the most probable location where it was taken. Pay close attention to subtle, non-touristic clues.

Analyze the following categories of evidence:
- **Architectural Details:** Look for unique local features in buildings, like specific window frames, balcony railings, wall textures, roof styles, or materials.
- **Street and Infrastructure Elements:** Examine the details of the road, sidewalks, curbs, manhole covers, lampposts, trash cans, and traffic signs.
- **Natural and Botanical Elements:** Identify local plant species, planter styles, and typical landscaping or tree pruning methods.
- **Cultural and Other Clues:** Find clues in signage (language, fonts, names), vehicle models, license plate formats, and any other distinctive cultural markers.

Based on your comprehensive analysis, provide the determined location, your confidence level, and a detailed justification structured by the categories of evidence.";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("API key is missing or empty")]
    MissingApiKey,
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        AppError::new(ErrorKind::Configuration, "analysis client not configured")
            .with_internal(e.to_string())
    }
}

/// Explicit client configuration, bound once at startup. Refuses to
/// construct without a credential; the key never appears in URLs or in
/// `Debug` output.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    api_key: SecretString,
    model: String,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ConfigError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }

        Ok(Self {
            api_key: SecretString::new(api_key),
            model: ANALYSIS_MODEL.to_string(),
        })
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!(
            "https://{ANALYSIS_API_HOST}/v1beta/models/{}:generateContent",
            self.model
        )
    }
}

/// Gemini content container used in both requests and responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// Untagged union of text and inline media content parts.
///
/// Variant order matters for `#[serde(untagged)]` decoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

/// Base64 inline payload used for image/vision requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub response_mime_type: String,
    pub response_schema: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    pub generation_config: GenerationConfig,
}

/// Top-level `generateContent` response envelope.
#[derive(Debug, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

/// Candidate completion item returned by the model.
#[derive(Debug, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
}

/// Shape the model is asked (not forced) to return. Kept in lockstep with
/// what [`normalize`] extracts.
#[must_use]
pub fn response_schema() -> Value {
    serde_json::json!({
        "type": "OBJECT",
        "properties": {
            "location": {
                "type": "STRING",
                "description": "The most probable location (City, Country) where the image was taken. If unknown, state that it could not be determined."
            },
            "confidence": {
                "type": "STRING",
                "description": "A percentage value representing the confidence in the location prediction (e.g., '85%'). If confidence is low, state 'Low'."
            },
            "justification": {
                "type": "ARRAY",
                "description": "A list of evidence and justifications for the determined location, categorized by type.",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "category": {
                            "type": "STRING",
                            "description": "The category of the evidence (e.g., 'Architectural Details', 'Street and Infrastructure Elements')."
                        },
                        "details": {
                            "type": "ARRAY",
                            "description": "A list of specific details or observations within this category.",
                            "items": { "type": "STRING" }
                        }
                    },
                    "required": ["category", "details"]
                }
            }
        },
        "required": ["location", "confidence", "justification"]
    })
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("image could not be read: {0}")]
    Read(#[from] EncodeError),

    #[error("request could not be built: {0}")]
    Request(#[from] HttpError),

    #[error("transport failure: {0}")]
    Transport(#[from] crate::capabilities::TransportError),

    #[error("analysis service returned status {status}")]
    Status { status: u16 },

    #[error("invalid response format: {0}")]
    Format(String),

    #[error("analysis result was empty")]
    Empty,
}

impl From<AnalysisError> for AppError {
    fn from(e: AnalysisError) -> Self {
        match e {
            AnalysisError::Read(read) => read.into(),
            AnalysisError::Request(build) => {
                AppError::new(ErrorKind::Serialization, "failed to build analysis request")
                    .with_internal(build.to_string())
            }
            AnalysisError::Transport(transport) => {
                let kind = match transport {
                    crate::capabilities::TransportError::Timeout { .. } => ErrorKind::Timeout,
                    crate::capabilities::TransportError::Network { .. }
                    | crate::capabilities::TransportError::Cancelled => ErrorKind::Network,
                };
                AppError::new(kind, "analysis request failed").with_internal(transport.to_string())
            }
            AnalysisError::Status { status } => {
                AppError::new(ErrorKind::Service, "analysis service error")
                    .with_internal(format!("HTTP status {status}"))
            }
            AnalysisError::Format(detail) => {
                AppError::new(ErrorKind::InvalidResponseFormat, "invalid response format")
                    .with_internal(detail)
            }
            AnalysisError::Empty => AppError::new(
                ErrorKind::EmptyResult,
                "analysis returned no location and no justification",
            ),
        }
    }
}

/// Builds the one request an analysis issues: inline image + instruction,
/// low temperature, JSON-only output matching the declared schema. The
/// credential travels in a header so it can never leak through URL logs.
pub fn build_request(
    config: &ClientConfig,
    image: &EncodedImage,
) -> Result<HttpRequest, AnalysisError> {
    let request = GenerateContentRequest {
        contents: vec![Content {
            role: None,
            parts: vec![
                Part::InlineData {
                    inline_data: InlineData {
                        mime_type: image.mime_type.clone(),
                        data: image.data.clone(),
                    },
                },
                Part::Text {
                    text: ANALYSIS_PROMPT.to_string(),
                },
            ],
        }],
        generation_config: GenerationConfig {
            temperature: 0.2,
            response_mime_type: "application/json".to_string(),
            response_schema: response_schema(),
        },
    };

    let url = ValidatedUrl::new_for_host(config.endpoint(), ANALYSIS_API_HOST)?;

    let http_request = HttpRequest::post_to(url)
        .with_header("x-goog-api-key", config.api_key.expose_secret().as_str())?
        .with_json(&request)?
        .with_timeout_ms(ANALYSIS_TIMEOUT_MS)?;

    Ok(http_request)
}

/// Turns the shell's round-trip outcome into a normalized result.
///
/// Every failure is logged here in full and reduced to an
/// [`AnalysisError`]; callers surface only the user-facing message.
pub fn process_reply(result: HttpResult) -> Result<AnalysisResult, AnalysisError> {
    let response = result.map_err(|transport| {
        error!(error = %transport, "analysis transport failure");
        transport
    })?;

    if !response.is_success() {
        error!(status = response.status(), "analysis service returned error status");
        return Err(AnalysisError::Status {
            status: response.status(),
        });
    }

    let reply_text = extract_reply_text(&response)?;

    let raw: Value = serde_json::from_str(&reply_text).map_err(|e| {
        error!(error = %e, "analysis reply text is not valid JSON");
        AnalysisError::Format(e.to_string())
    })?;

    let normalized = normalize::normalize(&raw);
    if normalized.is_empty() {
        error!("analysis reply contained no location and no justification");
        return Err(AnalysisError::Empty);
    }

    Ok(normalized)
}

/// Pulls the first text part out of the first candidate. Under
/// schema-constrained generation that text is the JSON document we asked
/// for; anything else counts as a format failure.
fn extract_reply_text(response: &HttpResponse) -> Result<String, AnalysisError> {
    let envelope: GenerateContentResponse =
        serde_json::from_slice(response.body()).map_err(|e| {
            error!(error = %e, "analysis response envelope failed to parse");
            AnalysisError::Format(e.to_string())
        })?;

    envelope
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .and_then(|content| {
            content.parts.into_iter().find_map(|part| match part {
                Part::Text { text } => Some(text),
                Part::InlineData { .. } => None,
            })
        })
        .ok_or_else(|| {
            error!("analysis response contained no text candidate");
            AnalysisError::Format("no text candidate in response".to_string())
        })
}
