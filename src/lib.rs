#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod analysis;
pub mod app;
pub mod capabilities;
pub mod encoding;
pub mod normalize;

use serde::{Deserialize, Serialize};

pub use app::{App, Event, Model, Phase, ViewModel, ViewState};
pub use capabilities::{Capabilities, Effect};
pub use normalize::{AnalysisResult, Justification, Source};

/// Largest image payload accepted for analysis.
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Timeout for the remote analysis round-trip.
pub const ANALYSIS_TIMEOUT_MS: u64 = 60_000;

/// Hosted model used for location analysis.
pub const ANALYSIS_MODEL: &str = "gemini-2.5-flash";

/// Only host the core is allowed to contact.
pub const ANALYSIS_API_HOST: &str = "generativelanguage.googleapis.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ImageRead,
    ImageTooLarge,
    Network,
    Timeout,
    Service,
    InvalidResponseFormat,
    EmptyResult,
    Serialization,
    Configuration,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ImageRead => "IMAGE_READ_ERROR",
            Self::ImageTooLarge => "IMAGE_TOO_LARGE",
            Self::Network => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Service => "SERVICE_ERROR",
            Self::InvalidResponseFormat => "INVALID_RESPONSE_FORMAT",
            Self::EmptyResult => "EMPTY_RESULT",
            Self::Serialization => "SERIALIZATION_ERROR",
            Self::Configuration => "CONFIGURATION_ERROR",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    /// Whether a full state reset gives this error a chance of succeeding
    /// on a second attempt. Configuration errors are fatal for the session.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        !matches!(self, Self::Configuration)
    }
}

/// Application-level error carried through the model and surfaced to the
/// view as a single human-readable string. The cause stays in
/// `internal_message` for logs and never reaches the UI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
    pub internal_message: Option<String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            internal_message: None,
        }
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::ImageRead => {
                "The selected image could not be read. Please try again.".into()
            }
            ErrorKind::ImageTooLarge => format!(
                "The image is too large. Please use an image smaller than {} MB.",
                MAX_IMAGE_BYTES / 1_000_000
            ),
            ErrorKind::Network
            | ErrorKind::Timeout
            | ErrorKind::Service
            | ErrorKind::Serialization => {
                "An error occurred during image analysis. Please try again with a different image."
                    .into()
            }
            ErrorKind::InvalidResponseFormat => {
                "The AI returned an invalid response format. Please try again.".into()
            }
            ErrorKind::EmptyResult => "The AI did not return a valid analysis result.".into(),
            ErrorKind::Configuration => {
                "The analysis service is not configured. An API key is required.".into()
            }
            ErrorKind::Internal => "An unexpected error occurred. Please try again.".into(),
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;
