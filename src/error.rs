//! Error types for the classification core
//!
//! Only input problems are fatal for a call. Recognition failures are
//! recovered inside the pipeline and never reach the caller of
//! [`Classifier::classify`](crate::analysis::Classifier::classify).

use thiserror::Error;

/// Failure of a text recognition backend
#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("recognition backend failed to initialize: {0}")]
    Init(String),

    #[error("inference failed during {operation}: {message}")]
    Inference { operation: String, message: String },

    #[error("recognizer rejected input: {0}")]
    InvalidInput(String),
}

impl RecognitionError {
    pub(crate) fn inference(operation: &str, err: impl std::fmt::Display) -> Self {
        Self::Inference {
            operation: operation.to_string(),
            message: err.to_string(),
        }
    }
}

/// Invalid detector configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unsupported config version {found} (this build reads version {expected})")]
    Version { found: u32, expected: u32 },

    #[error("{field}: {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Errors surfaced by a classification call
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("input image is empty ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    #[error("failed to decode input image")]
    Decode(#[from] image::ImageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = ClassifyError::EmptyImage { width: 0, height: 10 };
        assert_eq!(err.to_string(), "input image is empty (0x10)");

        let err = ConfigError::invalid("reader.upscale", "must be within 1..=8");
        assert_eq!(err.to_string(), "reader.upscale: must be within 1..=8");

        let err = RecognitionError::inference("detection", "shape mismatch");
        assert_eq!(err.to_string(), "inference failed during detection: shape mismatch");
    }
}
