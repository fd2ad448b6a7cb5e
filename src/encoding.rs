//! Converts a selected image into the base64 inline payload the analysis
//! request embeds. Shells that read files as data URLs deliver a
//! `data:<mime>;base64,` prefix; it is stripped here so the wire payload
//! is always the bare encoding.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;

use crate::{AppError, ErrorKind, MAX_IMAGE_BYTES};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("image payload is empty")]
    EmptyInput,

    #[error("image too large: {size} bytes, max {max}")]
    InputTooLarge { size: usize, max: usize },

    #[error("malformed data URL: {reason}")]
    MalformedDataUrl { reason: &'static str },

    #[error("payload is not valid base64: {0}")]
    InvalidBase64(String),
}

impl From<EncodeError> for AppError {
    fn from(e: EncodeError) -> Self {
        let kind = match &e {
            EncodeError::InputTooLarge { .. } => ErrorKind::ImageTooLarge,
            EncodeError::EmptyInput
            | EncodeError::MalformedDataUrl { .. }
            | EncodeError::InvalidBase64(_) => ErrorKind::ImageRead,
        };
        AppError::new(kind, "failed to read selected image").with_internal(e.to_string())
    }
}

/// A transport-ready image: declared mime type plus bare base64 data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub mime_type: String,
    pub data: String,
}

impl EncodedImage {
    /// Encodes raw image bytes as received from the shell's file picker.
    pub fn from_bytes(bytes: &[u8], mime_type: impl Into<String>) -> Result<Self, EncodeError> {
        if bytes.is_empty() {
            return Err(EncodeError::EmptyInput);
        }
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(EncodeError::InputTooLarge {
                size: bytes.len(),
                max: MAX_IMAGE_BYTES,
            });
        }

        Ok(Self {
            mime_type: mime_type.into(),
            data: STANDARD.encode(bytes),
        })
    }

    /// Accepts a FileReader-style `data:<mime>;base64,<payload>` string,
    /// strips the prefix and validates the payload.
    pub fn from_data_url(data_url: &str) -> Result<Self, EncodeError> {
        let rest = data_url
            .strip_prefix("data:")
            .ok_or(EncodeError::MalformedDataUrl {
                reason: "missing data: scheme",
            })?;

        let (header, payload) = rest.split_once(',').ok_or(EncodeError::MalformedDataUrl {
            reason: "missing payload separator",
        })?;

        let mime_type = header
            .strip_suffix(";base64")
            .ok_or(EncodeError::MalformedDataUrl {
                reason: "payload is not base64-encoded",
            })?;

        if mime_type.is_empty() {
            return Err(EncodeError::MalformedDataUrl {
                reason: "missing mime type",
            });
        }

        if payload.is_empty() {
            return Err(EncodeError::EmptyInput);
        }

        let decoded = STANDARD
            .decode(payload)
            .map_err(|e| EncodeError::InvalidBase64(e.to_string()))?;

        if decoded.len() > MAX_IMAGE_BYTES {
            return Err(EncodeError::InputTooLarge {
                size: decoded.len(),
                max: MAX_IMAGE_BYTES,
            });
        }

        Ok(Self {
            mime_type: mime_type.to_string(),
            data: payload.to_string(),
        })
    }

    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.data.len()
    }
}

/// The uploader accepts only payloads whose declared type is in the image
/// category; anything else is silently ignored by the controller.
#[must_use]
pub fn is_image_mime(mime_type: &str) -> bool {
    mime_type.starts_with("image/")
}
