//! Three-slot encounter recognition.
//!
//! An encounter screen shows up to three monsters side by side. The
//! (cropped) screenshot is split into thirds and each slot is matched by ORB
//! features against every reference.

use image::DynamicImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::config::MatchConfig;
use crate::crop::{crop, split_three};
use crate::error::Result;
use crate::loader::to_gray;
use crate::orb::{match_precomputed, Features, OrbDetector, OrbStats};
use crate::reference::ReferenceSet;

/// An accepted identification for one slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotMatch {
    /// 1-based slot index, left to right.
    pub position: u8,
    pub reference_id: String,
    pub good_matches: usize,
    /// ORB match ratio of the winning reference.
    pub confidence: f32,
}

/// Identify the references shown in each of the three slots.
///
/// References that fail to load are skipped. Slots whose best candidate
/// does not pass [`MatchConfig::accepts_orb`] are omitted.
#[instrument(skip_all, fields(references = refs.len()))]
pub fn recognize_slots(image: &DynamicImage, refs: &ReferenceSet, config: &MatchConfig) -> Result<Vec<SlotMatch>> {
    config.validate()?;
    let image = match &config.crop {
        Some(params) => crop(image, params)?.0,
        None => image.clone(),
    };
    let slots = split_three(&image)?;
    let detector = OrbDetector::new(config.orb_options());

    let references: Vec<(&str, Features)> = refs
        .records()
        .par_iter()
        .filter_map(|record| {
            let features = match &record.features {
                Some(features) => features.clone(),
                None => detector.detect_and_compute(&to_gray(&record.load().ok()?)),
            };
            Some((record.id.as_str(), features))
        })
        .collect();
    debug!(usable = references.len(), "Reference features ready");

    let mut found = Vec::new();
    for (i, slot) in slots.iter().enumerate() {
        let position = i as u8 + 1;
        let slot_features = detector.detect_and_compute(&to_gray(slot));
        if slot_features.is_empty() {
            debug!(position, "No features in slot");
            continue;
        }

        // Highest good-match count wins; earlier references win ties.
        let best = references
            .iter()
            .map(|(id, features)| (*id, match_precomputed(&slot_features, features, config.ratio_threshold)))
            .fold(None, |best: Option<(&str, OrbStats)>, (id, stats)| match best {
                Some((_, b)) if b.good_matches >= stats.good_matches => best,
                _ => Some((id, stats)),
            });

        let Some((id, stats)) = best else {
            continue;
        };
        debug!(position, reference = id, good_matches = stats.good_matches, "Best slot candidate");
        if config.accepts_orb(stats.good_matches, stats.match_ratio) {
            found.push(SlotMatch {
                position,
                reference_id: id.to_owned(),
                good_matches: stats.good_matches,
                confidence: stats.match_ratio,
            });
        }
    }

    info!(recognized = found.len(), "Slot recognition complete");
    Ok(found)
}
