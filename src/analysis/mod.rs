//! Analysis Layer
//!
//! Turns vision results into a verdict and renders the debug overlay.

pub mod fusion;
pub mod overlay;

pub use fusion::{fuse, Classifier, Inspection, Signal, SignalOutcome, Verdict};
