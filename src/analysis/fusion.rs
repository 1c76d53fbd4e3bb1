//! Decision fusion
//!
//! Runs the enabled signals over one screenshot and folds their outcomes
//! into a single [`Verdict`].

use ab_glyph::FontArc;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::DetectorConfig;
use crate::error::{ClassifyError, ConfigError};
use crate::vision::components::{self, Candidate};
use crate::vision::geometry::BBox;
use crate::vision::locator::{locate, Anchor};
use crate::vision::ocr::TextRecognizer;
use crate::vision::reader::{dedupe_values, read_numbers};
use crate::vision::regions::{self, Region, RegionKind};
use crate::vision::segmentation::{segment_region, ColorClass, ColorMask};

use super::overlay;

/// Independent evidence that unprocessed items exist
///
/// Variants are ordered by evaluation priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    /// Red count badge next to the date
    Badge,
    /// Yellow warning banner on the page
    Banner,
    /// Total below the date exceeds the confirmed count
    NumericMismatch,
    None,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Badge => "badge",
            Signal::Banner => "banner",
            Signal::NumericMismatch => "numeric_mismatch",
            Signal::None => "none",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of evaluating one signal
#[derive(Debug, Clone, PartialEq)]
pub struct SignalOutcome {
    pub signal: Signal,
    pub fired: bool,
    pub evidence: Option<BBox>,
    pub candidate: Option<Candidate>,
    /// `(total, confirmed)` when two distinct numbers were read
    pub numbers: Option<(u32, u32)>,
}

impl SignalOutcome {
    pub fn quiet(signal: Signal) -> Self {
        Self {
            signal,
            fired: false,
            evidence: None,
            candidate: None,
            numbers: None,
        }
    }

    pub fn fired(signal: Signal, evidence: BBox) -> Self {
        Self {
            signal,
            fired: true,
            evidence: Some(evidence),
            candidate: None,
            numbers: None,
        }
    }

    pub fn with_candidate(mut self, candidate: Candidate) -> Self {
        self.candidate = Some(candidate);
        self
    }
}

/// Classification of one screenshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    /// Unprocessed items exist for the target date
    pub present: bool,
    pub anchor_found: bool,
    /// First fired signal in evaluation order
    pub signal: Signal,
    pub evidence_bbox: Option<BBox>,
    /// `(total, confirmed)` read below the date
    pub numbers: Option<(u32, u32)>,
    /// Date label that was searched for
    pub target: String,
    pub anchor: Option<Anchor>,
    /// Every fired signal, in evaluation order
    pub fired: Vec<Signal>,
    /// Winning candidate blob, for badge and banner
    pub candidate: Option<Candidate>,
    #[serde(skip)]
    pub debug_overlay: Option<RgbImage>,
}

impl Verdict {
    /// Verdict for a screenshot without the target date
    pub fn absent(target: &str) -> Self {
        Self {
            present: false,
            anchor_found: false,
            signal: Signal::None,
            evidence_bbox: None,
            numbers: None,
            target: target.to_string(),
            anchor: None,
            fired: Vec::new(),
            candidate: None,
            debug_overlay: None,
        }
    }
}

/// Fold signal outcomes into a verdict
///
/// Outcomes may arrive in any order; the winner is the fired signal with the
/// highest priority.
pub fn fuse(target: &str, anchor: Option<Anchor>, mut outcomes: Vec<SignalOutcome>) -> Verdict {
    let mut verdict = Verdict::absent(target);
    let Some(anchor) = anchor else {
        return verdict;
    };
    verdict.anchor_found = true;
    verdict.anchor = Some(anchor);

    outcomes.sort_by_key(|o| o.signal);

    verdict.numbers = outcomes.iter().find_map(|o| o.numbers);
    verdict.fired = outcomes.iter().filter(|o| o.fired).map(|o| o.signal).collect();

    if let Some(winner) = outcomes.into_iter().find(|o| o.fired) {
        verdict.present = true;
        verdict.signal = winner.signal;
        verdict.evidence_bbox = winner.evidence;
        verdict.candidate = winner.candidate;
    }
    verdict
}

/// Verdict plus the intermediate data it was derived from
#[derive(Debug, Clone)]
pub struct Inspection {
    pub verdict: Verdict,
    pub regions: Vec<Region>,
    pub masks: Vec<ColorMask>,
}

/// Screenshot classifier
///
/// Holds a validated config and a shared recognition backend. Calls are
/// independent, so one classifier can serve several threads.
pub struct Classifier {
    config: DetectorConfig,
    recognizer: Arc<dyn TextRecognizer>,
    font: FontArc,
}

impl Classifier {
    pub fn new(config: DetectorConfig, recognizer: Arc<dyn TextRecognizer>) -> Result<Self, ConfigError> {
        config.validate()?;
        let font = overlay::label_font(config.overlay.font_path.as_deref())?;

        Ok(Self {
            config,
            recognizer,
            font,
        })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn recognizer(&self) -> &Arc<dyn TextRecognizer> {
        &self.recognizer
    }

    /// Classify a screenshot for `target` (e.g. `"5.11"`)
    pub fn classify(&self, image: &RgbImage, target: &str) -> Result<Verdict, ClassifyError> {
        Ok(self.inspect(image, target)?.verdict)
    }

    /// Classify and attach the debug overlay to the verdict
    pub fn classify_with_overlay(&self, image: &RgbImage, target: &str) -> Result<Verdict, ClassifyError> {
        let inspection = self.inspect(image, target)?;
        Ok(self.attach_overlay(image, inspection).verdict)
    }

    /// Decode an encoded image (PNG, JPEG, ...) and classify it
    pub fn classify_bytes(&self, bytes: &[u8], target: &str, with_overlay: bool) -> Result<Verdict, ClassifyError> {
        let image = image::load_from_memory(bytes)?.to_rgb8();
        if with_overlay {
            self.classify_with_overlay(&image, target)
        } else {
            self.classify(&image, target)
        }
    }

    /// Render the overlay for an inspection into its verdict
    pub fn attach_overlay(&self, image: &RgbImage, mut inspection: Inspection) -> Inspection {
        let rendered = overlay::render(
            image,
            &inspection.verdict,
            &inspection.regions,
            &self.font,
            self.config.overlay.font_size,
        );
        inspection.verdict.debug_overlay = Some(rendered);
        inspection
    }

    /// Run the full pipeline, keeping regions and masks
    pub fn inspect(&self, image: &RgbImage, target: &str) -> Result<Inspection, ClassifyError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(ClassifyError::EmptyImage { width, height });
        }

        let start = Instant::now();
        let recognizer = self.recognizer.as_ref();

        let Some(anchor) = locate(recognizer, image, target, self.config.anchor.min_confidence) else {
            info!("'{}' not found in {}x{} screenshot", target, width, height);
            return Ok(Inspection {
                verdict: Verdict::absent(target),
                regions: Vec::new(),
                masks: Vec::new(),
            });
        };

        let regions = regions::derive(&anchor.bbox, (width, height), &self.config.geometry);
        let mut masks = Vec::new();
        let mut outcomes = Vec::new();

        let signals = &self.config.signals;
        if signals.badge {
            outcomes.push(self.badge_signal(image, &anchor, &regions, &mut masks));
        }
        if signals.banner {
            outcomes.push(self.banner_signal(image, &anchor, &regions, &mut masks));
        }
        if signals.numeric_mismatch {
            outcomes.push(self.numeric_signal(image, &regions));
        }

        let verdict = fuse(target, Some(anchor), outcomes);
        info!(
            "'{}': present={} signal={} fired={:?} numbers={:?} in {:?}",
            target,
            verdict.present,
            verdict.signal,
            verdict.fired,
            verdict.numbers,
            start.elapsed()
        );

        Ok(Inspection {
            verdict,
            regions,
            masks,
        })
    }

    fn badge_signal(
        &self,
        image: &RgbImage,
        anchor: &Anchor,
        regions: &[Region],
        masks: &mut Vec<ColorMask>,
    ) -> SignalOutcome {
        let Some(region) = regions::find(regions, RegionKind::Badge) else {
            return SignalOutcome::quiet(Signal::Badge);
        };
        let cfg = &self.config;

        let red = segment_region(image, region.bbox, ColorClass::AlertRed, &cfg.colors.alert_red);
        let digits = cfg
            .badge
            .min_digit_fill
            .map(|_| segment_region(image, region.bbox, ColorClass::DigitWhite, &cfg.colors.digit_white));

        let mut candidates = components::extract(&red, &anchor.bbox, &cfg.badge, digits.as_ref());
        components::rank(&mut candidates);
        masks.push(red);
        masks.extend(digits);

        let Some(mut best) = candidates.into_iter().next() else {
            debug!("Badge: no candidate in {:?}", region.bbox);
            return SignalOutcome::quiet(Signal::Badge);
        };

        if cfg.signals.read_badge_value {
            let read = read_numbers(self.recognizer.as_ref(), image, best.bbox, &cfg.reader);
            if let Some(number) = read.into_iter().next() {
                best.value = Some(number.value);
                best.confidence = Some(number.confidence);
            }
        }

        debug!("Badge: {:?} value={:?}", best.bbox, best.value);
        SignalOutcome::fired(Signal::Badge, best.bbox).with_candidate(best)
    }

    fn banner_signal(
        &self,
        image: &RgbImage,
        anchor: &Anchor,
        regions: &[Region],
        masks: &mut Vec<ColorMask>,
    ) -> SignalOutcome {
        let Some(region) = regions::find(regions, RegionKind::Page) else {
            return SignalOutcome::quiet(Signal::Banner);
        };
        let cfg = &self.config;

        let yellow = segment_region(
            image,
            region.bbox,
            ColorClass::WarningYellow,
            &cfg.colors.warning_yellow,
        );
        let mut candidates = components::extract(&yellow, &anchor.bbox, &cfg.banner, None);
        components::rank(&mut candidates);
        masks.push(yellow);

        match candidates.into_iter().next() {
            Some(best) => {
                debug!("Banner: {:?}", best.bbox);
                SignalOutcome::fired(Signal::Banner, best.bbox).with_candidate(best)
            }
            None => SignalOutcome::quiet(Signal::Banner),
        }
    }

    fn numeric_signal(&self, image: &RgbImage, regions: &[Region]) -> SignalOutcome {
        let mut outcome = SignalOutcome::quiet(Signal::NumericMismatch);
        let Some(region) = regions::find(regions, RegionKind::Numbers) else {
            return outcome;
        };
        if region.bbox.is_empty() {
            debug!("Numbers: region is empty");
            return outcome;
        }

        let numbers = dedupe_values(read_numbers(
            self.recognizer.as_ref(),
            image,
            region.bbox,
            &self.config.reader,
        ));
        let [total, confirmed, ..] = numbers.as_slice() else {
            debug!("Numbers: {} distinct value(s), need two", numbers.len());
            return outcome;
        };

        outcome.numbers = Some((total.value, confirmed.value));
        if total.value > confirmed.value {
            outcome.fired = true;
            outcome.evidence = Some(total.bbox.union(&confirmed.bbox));
        }
        debug!(
            "Numbers: total={} confirmed={} fired={}",
            total.value, confirmed.value, outcome.fired
        );
        outcome
    }
}
