//! Text recognition backend abstraction
//!
//! The pipeline never owns a model. The host process creates one
//! [`TextRecognizer`] handle and passes it into every call; a
//! [`LazyRecognizer`] defers the expensive model load to the first call.

use image::RgbImage;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Instant;
use tracing::{debug, info};

use super::TextDetection;
use crate::error::RecognitionError;

/// Text detection + recognition over a raster
///
/// Implementations must be usable from several threads at once; any
/// internal mutable state (e.g. an inference session) is their concern.
pub trait TextRecognizer: Send + Sync {
    /// Detect and recognize every text item in `image`.
    ///
    /// Quads are returned in `image` pixel coordinates.
    fn recognize(&self, image: &RgbImage) -> Result<Vec<TextDetection>, RecognitionError>;

    /// Short backend name for logs
    fn name(&self) -> &str {
        "recognizer"
    }
}

type RecognizerInit =
    Box<dyn Fn() -> Result<Box<dyn TextRecognizer>, RecognitionError> + Send + Sync>;

/// Recognizer that builds its backend on first use
///
/// Initialization runs at most once successfully. Concurrent first callers
/// block until the winner finishes; a failed initialization is reported to
/// the caller and attempted again on the next call.
pub struct LazyRecognizer {
    label: String,
    init: RecognizerInit,
    backend: OnceCell<Box<dyn TextRecognizer>>,
}

impl LazyRecognizer {
    pub fn new<F>(label: impl Into<String>, init: F) -> Self
    where
        F: Fn() -> Result<Box<dyn TextRecognizer>, RecognitionError> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            init: Box::new(init),
            backend: OnceCell::new(),
        }
    }

    /// Whether the backend has been loaded
    pub fn is_initialized(&self) -> bool {
        self.backend.get().is_some()
    }

    /// Get the backend, loading it if needed
    pub fn get(&self) -> Result<&dyn TextRecognizer, RecognitionError> {
        self.backend
            .get_or_try_init(|| {
                info!("Initializing recognition backend '{}'", self.label);
                let start = Instant::now();
                let backend = (self.init)()?;
                info!(
                    "Recognition backend '{}' ready in {:?}",
                    self.label,
                    start.elapsed()
                );
                Ok(backend)
            })
            .map(|backend| &**backend)
    }
}

impl TextRecognizer for LazyRecognizer {
    fn recognize(&self, image: &RgbImage) -> Result<Vec<TextDetection>, RecognitionError> {
        self.get()?.recognize(image)
    }

    fn name(&self) -> &str {
        &self.label
    }
}

/// Deterministic stand-in backend that replays canned responses
///
/// Each call to [`recognize`](TextRecognizer::recognize) pops the next
/// scripted response; once the script is exhausted every call returns no
/// detections. The sizes of the images it was shown are recorded so callers
/// can check what a pipeline stage handed to the backend.
#[derive(Default)]
pub struct ScriptedRecognizer {
    responses: Mutex<VecDeque<Result<Vec<TextDetection>, RecognitionError>>>,
    requests: Mutex<Vec<(u32, u32)>>,
}

impl ScriptedRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response
    pub fn then(self, detections: Vec<TextDetection>) -> Self {
        self.responses.lock().push_back(Ok(detections));
        self
    }

    /// Queue a backend failure
    pub fn then_fail(self, message: &str) -> Self {
        self.responses
            .lock()
            .push_back(Err(RecognitionError::inference("scripted", message)));
        self
    }

    /// Number of recognize calls served so far
    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    /// Dimensions of every image passed in, in call order
    pub fn requests(&self) -> Vec<(u32, u32)> {
        self.requests.lock().clone()
    }
}

impl TextRecognizer for ScriptedRecognizer {
    fn recognize(&self, image: &RgbImage) -> Result<Vec<TextDetection>, RecognitionError> {
        self.requests.lock().push(image.dimensions());
        let next = self.responses.lock().pop_front();
        debug!("Scripted recognizer call {} ({:?})", self.calls(), image.dimensions());
        next.unwrap_or_else(|| Ok(Vec::new()))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_scripted_replays_in_order() {
        let recognizer = ScriptedRecognizer::new()
            .then(vec![TextDetection::from_rect("5.11", 0.0, 0.0, 10.0, 5.0, 0.9)])
            .then_fail("boom");
        let image = RgbImage::new(4, 4);

        let first = recognizer.recognize(&image).unwrap();
        assert_eq!(first[0].text, "5.11");
        assert!(recognizer.recognize(&image).is_err());
        assert!(recognizer.recognize(&image).unwrap().is_empty());
        assert_eq!(recognizer.calls(), 3);
        assert_eq!(recognizer.requests(), vec![(4, 4); 3]);
    }

    #[test]
    fn test_lazy_initializes_once_across_threads() {
        let inits = Arc::new(AtomicUsize::new(0));
        let counter = inits.clone();
        let lazy = Arc::new(LazyRecognizer::new("test", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(20));
            Ok(Box::new(ScriptedRecognizer::new()) as Box<dyn TextRecognizer>)
        }));
        assert!(!lazy.is_initialized());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lazy = lazy.clone();
                std::thread::spawn(move || {
                    lazy.recognize(&RgbImage::new(2, 2)).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(inits.load(Ordering::SeqCst), 1);
        assert!(lazy.is_initialized());
    }

    #[test]
    fn test_lazy_retries_after_failed_init() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let lazy = LazyRecognizer::new("flaky", move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(RecognitionError::Init("model missing".to_string()))
            } else {
                Ok(Box::new(ScriptedRecognizer::new()) as Box<dyn TextRecognizer>)
            }
        });

        assert!(lazy.recognize(&RgbImage::new(2, 2)).is_err());
        assert!(!lazy.is_initialized());
        assert!(lazy.recognize(&RgbImage::new(2, 2)).is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(lazy.name(), "flaky");
    }
}
