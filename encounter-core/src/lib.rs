//! Encounter Core - reference image matching library
//!
//! Identifies which known monster or event a screenshot crop shows by
//! comparing it against a reference image database.
//!
//! # Pipeline
//!
//! - Fractional cropping and three-slot splitting of screenshots
//! - Perceptual hashing (pHash, Blockhash) as a coarse prefilter
//! - Zero-mean normalized cross-correlation template matching, both directions
//! - ORB keypoint matching with a ratio test
//! - Ranked JSON match reports with per-reference error markers
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use encounter_core::{Comparator, MatchConfig, ReferenceSet};
//!
//! # fn example() -> encounter_core::Result<()> {
//! let refs = ReferenceSet::from_directory(Path::new("resources/images"))?;
//! let comparator = Comparator::new(MatchConfig::default())?;
//!
//! let reports = comparator.compare_path(Path::new("screenshot.png"), &refs)?;
//! if let Some(best) = encounter_core::best_match(&reports, comparator.config()) {
//!     println!("Looks like {}", best.reference_id);
//! }
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod compare;
pub mod config;
pub mod crop;
pub mod error;
#[cfg(feature = "network")]
pub mod fetch;
pub mod index;
pub mod loader;
pub mod metrics;
pub mod orb;
pub mod phash;
pub mod recognize;
pub mod reference;
pub mod template;

// Re-export main types for convenience
pub use audit::{audit, AuditReport};
pub use compare::{best_match, sort_reports, Comparator, MatchOutcome, MatchReport, Scores};
pub use config::{MatchConfig, SortKey, CONFIG_ENV};
pub use crop::{crop, crop_rect, split_three, CropParams, CropRect, Keep};
pub use error::{MatchError, Result};
pub use index::{FeatureIndex, IndexFailure};
pub use loader::{load_image, save_image, to_gray, LoadOutcome};
pub use orb::{match_features, Features, OrbDetector, OrbOptions, OrbStats};
pub use phash::{hamming_distance, HashAlgorithm, HashIndex, PerceptualHash, PerceptualHasher};
pub use recognize::{recognize_slots, SlotMatch};
pub use reference::{DatabaseFilter, ReferenceError, ReferenceRecord, ReferenceSet};
pub use template::{match_multiscale, match_template_zncc, TemplateOptions};

// Network-dependent exports
#[cfg(feature = "network")]
pub use fetch::{download_image, FetchConfig, HttpImageSource, ImageSource, StaticImageSource};
