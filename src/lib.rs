//! badge-watch - pixel-only dashboard state classifier
//!
//! Finds a date label in a dashboard screenshot and decides, from the
//! pixels around it, whether unprocessed items exist for that date.

pub mod analysis;
pub mod capture;
pub mod config;
pub mod error;
pub mod notify;
pub mod schedule;
pub mod storage;
pub mod vision;

pub use analysis::{Classifier, Signal, Verdict};
pub use config::{AppConfig, DetectorConfig};
pub use error::{ClassifyError, ConfigError, RecognitionError};
pub use vision::{TextDetection, TextRecognizer};
