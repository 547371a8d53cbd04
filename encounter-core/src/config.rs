//! Matching configuration.
//!
//! Loaded from a JSON file (every field optional) and/or environment
//! variables, with the defaults below.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crop::{check_fraction, CropParams};
use crate::error::{MatchError, Result};
use crate::orb::OrbOptions;
use crate::phash::{HashAlgorithm, PerceptualHasher};
use crate::template::TemplateOptions;

/// Environment variable naming a default config file.
pub const CONFIG_ENV: &str = "ENCOUNTER_CONFIG";

/// Signal used to rank match reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    /// Best template score, descending.
    #[default]
    Template,
    /// ORB match ratio, descending.
    Orb,
    /// Perceptual hash distance, ascending.
    Phash,
}

impl std::str::FromStr for SortKey {
    type Err = MatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "template" => Ok(Self::Template),
            "orb" => Ok(Self::Orb),
            "phash" => Ok(Self::Phash),
            other => Err(MatchError::InvalidConfig(format!(
                "unknown sort key '{other}' (expected template, orb or phash)"
            ))),
        }
    }
}

/// Matching configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MatchConfig {
    /// Crop applied to the query before matching (default: none)
    pub crop: Option<CropParams>,
    /// Maximum hash distance for a reference to be verified (default: none)
    pub phash_threshold: Option<u32>,
    /// Keep only the nearest K references by hash distance (default: none)
    pub top_k: Option<usize>,
    /// Perceptual hash algorithm (default: phash)
    pub hash_algorithm: HashAlgorithm,
    /// Template score needed to accept a best match (default: 0.75)
    pub template_threshold: f32,
    /// Template scale factors (default: [1.0])
    pub scales: Vec<f32>,
    /// Shrink factor applied before template matching (default: 1.0)
    pub downscale: f32,
    /// ORB keypoint budget per image (default: 500)
    pub max_features: usize,
    /// Lowe ratio test threshold (default: 0.75)
    pub ratio_threshold: f32,
    /// FAST corner threshold (default: 20)
    pub fast_threshold: u8,
    /// Good ORB matches that accept a match on their own (default: 10)
    pub min_good_matches: usize,
    /// ORB match ratio that accepts a match on its own (default: 0.15)
    pub min_match_ratio: f32,
    /// Ranking signal (default: template)
    pub sort_by: SortKey,
    /// Compute MSE and SSIM (default: true)
    pub metrics: bool,
    /// Score references on the rayon pool (default: true)
    pub parallel: bool,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            crop: None,
            phash_threshold: None,
            top_k: None,
            hash_algorithm: HashAlgorithm::PHash,
            template_threshold: 0.75,
            scales: vec![1.0],
            downscale: 1.0,
            max_features: 500,
            ratio_threshold: 0.75,
            fast_threshold: 20,
            min_good_matches: 10,
            min_match_ratio: 0.15,
            sort_by: SortKey::Template,
            metrics: true,
            parallel: true,
        }
    }
}

impl MatchConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        debug!(path = %path.display(), "Loaded match config");
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    ///
    /// `ENCOUNTER_CONFIG` names a base file; `ENCOUNTER_MAX_FEATURES`,
    /// `ENCOUNTER_PHASH_THRESHOLD` and `ENCOUNTER_PARALLEL` override single
    /// fields. Unparseable overrides are ignored.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.is_empty() => Self::load(Path::new(&path))?,
            _ => Self::default(),
        };

        if let Some(max) = std::env::var("ENCOUNTER_MAX_FEATURES")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.max_features = max;
        }

        if let Some(threshold) = std::env::var("ENCOUNTER_PHASH_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.phash_threshold = Some(threshold);
        }

        if let Ok(parallel) = std::env::var("ENCOUNTER_PARALLEL") {
            config.parallel = parallel.to_lowercase() != "false";
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject out-of-range values before any work starts.
    pub fn validate(&self) -> Result<()> {
        if let Some(crop) = &self.crop {
            crop.validate()?;
        }
        if self.scales.is_empty() {
            return Err(MatchError::InvalidConfig("scales must not be empty".into()));
        }
        if let Some(bad) = self.scales.iter().find(|s| !(s.is_finite() && **s > 0.0)) {
            return Err(MatchError::InvalidConfig(format!(
                "scales must be positive, got {bad}"
            )));
        }
        check_fraction("downscale", self.downscale)?;
        check_fraction("ratio_threshold", self.ratio_threshold)?;
        if self.max_features == 0 {
            return Err(MatchError::InvalidConfig("max_features must be at least 1".into()));
        }
        if !(-1.0..=1.0).contains(&self.template_threshold) {
            return Err(MatchError::InvalidConfig(format!(
                "template_threshold must be within [-1, 1], got {}",
                self.template_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.min_match_ratio) {
            return Err(MatchError::InvalidConfig(format!(
                "min_match_ratio must be within [0, 1], got {}",
                self.min_match_ratio
            )));
        }
        if self.top_k == Some(0) {
            return Err(MatchError::InvalidConfig("top_k must be at least 1".into()));
        }
        Ok(())
    }

    pub fn template_options(&self) -> TemplateOptions {
        TemplateOptions {
            scales: self.scales.clone(),
            downscale: self.downscale,
        }
    }

    pub fn orb_options(&self) -> OrbOptions {
        OrbOptions {
            max_features: self.max_features,
            ratio_threshold: self.ratio_threshold,
            fast_threshold: self.fast_threshold,
            ..Default::default()
        }
    }

    pub fn hasher(&self) -> PerceptualHasher {
        PerceptualHasher::new(self.hash_algorithm)
    }

    /// Whether an ORB result is strong enough to accept on its own.
    pub fn accepts_orb(&self, good_matches: usize, match_ratio: f32) -> bool {
        good_matches >= self.min_good_matches || match_ratio > self.min_match_ratio
    }
}
