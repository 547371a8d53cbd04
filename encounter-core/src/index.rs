//! Precomputed per-reference hashes and ORB features, persisted as JSON.
//!
//! Building features for a large reference database dominates a query, so
//! they can be computed once with [`FeatureIndex::build`] and attached to a
//! [`ReferenceSet`] on later runs.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::config::MatchConfig;
use crate::error::{MatchError, Result};
use crate::loader::to_gray;
use crate::orb::{Features, Keypoint, OrbDetector, OrbOptions};
use crate::phash::{HashAlgorithm, PerceptualHash};
use crate::reference::{ReferenceError, ReferenceRecord, ReferenceSet};

/// Current on-disk format version.
pub const INDEX_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub reference_id: String,
    pub image_path: PathBuf,
    /// Hex-encoded perceptual hash.
    pub phash: String,
    pub keypoints: Vec<Keypoint>,
    /// Base64 of the concatenated 32-byte descriptors.
    pub descriptors: String,
}

impl IndexEntry {
    pub fn perceptual_hash(&self, algorithm: HashAlgorithm) -> Result<PerceptualHash> {
        PerceptualHash::from_hex(&self.phash, algorithm)
    }

    pub fn features(&self) -> Result<Features> {
        let descriptors = Features::descriptors_from_base64(&self.descriptors)?;
        if descriptors.len() != self.keypoints.len() {
            return Err(MatchError::Index(format!(
                "{}: {} keypoints but {} descriptors",
                self.reference_id,
                self.keypoints.len(),
                descriptors.len()
            )));
        }
        Ok(Features {
            keypoints: self.keypoints.clone(),
            descriptors,
        })
    }
}

/// A reference that could not be indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexFailure {
    pub reference_id: String,
    pub error: ReferenceError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureIndex {
    pub version: u32,
    pub algorithm: HashAlgorithm,
    /// Detector settings the descriptors were built with.
    #[serde(default)]
    pub orb: OrbOptions,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<IndexEntry>,
}

impl FeatureIndex {
    /// Hash and describe every reference in parallel.
    ///
    /// References that fail to load are returned separately, in input order.
    #[instrument(skip_all, fields(references = refs.len()))]
    pub fn build(refs: &ReferenceSet, config: &MatchConfig) -> (Self, Vec<IndexFailure>) {
        let hasher = config.hasher();
        let detector = OrbDetector::new(config.orb_options());

        let built: Vec<std::result::Result<IndexEntry, IndexFailure>> = refs
            .records()
            .par_iter()
            .map(|record: &ReferenceRecord| {
                let image = record.load().map_err(|error| IndexFailure {
                    reference_id: record.id.clone(),
                    error,
                })?;
                let hash = hasher.hash_image(&image);
                let features = detector.detect_and_compute(&to_gray(&image));
                Ok(IndexEntry {
                    reference_id: record.id.clone(),
                    image_path: record.image_path.clone(),
                    phash: hash.to_hex(),
                    descriptors: features.descriptors_to_base64(),
                    keypoints: features.keypoints,
                })
            })
            .collect();

        let mut entries = Vec::with_capacity(built.len());
        let mut failures = Vec::new();
        for item in built {
            match item {
                Ok(entry) => entries.push(entry),
                Err(failure) => failures.push(failure),
            }
        }

        info!(indexed = entries.len(), failed = failures.len(), "Built feature index");
        (
            Self {
                version: INDEX_VERSION,
                algorithm: config.hash_algorithm,
                orb: config.orb_options(),
                created_at: Utc::now(),
                entries,
            },
            failures,
        )
    }

    pub fn get(&self, reference_id: &str) -> Option<&IndexEntry> {
        self.entries.iter().find(|e| e.reference_id == reference_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let index: Self = serde_json::from_str(&text)?;
        if index.version != INDEX_VERSION {
            return Err(MatchError::Index(format!(
                "unsupported index version {} (expected {INDEX_VERSION})",
                index.version
            )));
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::save_image;
    use image::{DynamicImage, GrayImage, Luma};
    use tempfile::TempDir;

    fn blocks(seed: u32) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(96, 96, |x, y| {
            let cell = (x / 8) * 131 + (y / 8) * 977 + seed;
            Luma([(cell.wrapping_mul(2654435761) >> 24) as u8])
        }))
    }

    #[test]
    fn test_build_save_load_attach() {
        let temp = TempDir::new().unwrap();
        save_image(&blocks(1), &temp.path().join("one.png")).unwrap();
        save_image(&blocks(2), &temp.path().join("two.png")).unwrap();

        let mut refs = ReferenceSet::from_directory(temp.path()).unwrap();
        refs.push(ReferenceRecord::new("ghost", temp.path().join("ghost.png")));

        let (index, failures) = FeatureIndex::build(&refs, &MatchConfig::default());
        assert_eq!(index.len(), 2);
        assert_eq!(
            failures,
            vec![IndexFailure {
                reference_id: "ghost".into(),
                error: ReferenceError::Missing
            }]
        );

        let path = temp.path().join("cache/index.json");
        index.save(&path).unwrap();
        let loaded = FeatureIndex::load(&path).unwrap();
        assert_eq!(loaded, index);

        let attached = refs.attach_index(&loaded, &MatchConfig::default().orb_options()).unwrap();
        assert_eq!(attached, 2);
        let one = refs.get("one").unwrap();
        assert_eq!(one.phash.as_ref().unwrap().to_hex(), loaded.entries[0].phash);
        assert!(!one.features.as_ref().unwrap().is_empty());
        assert!(refs.get("ghost").unwrap().features.is_none());
    }

    #[test]
    fn test_rejects_other_version() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("index.json");
        std::fs::write(
            &path,
            r#"{ "version": 99, "algorithm": "phash", "created_at": "2024-01-01T00:00:00Z", "entries": [] }"#,
        )
        .unwrap();
        assert!(matches!(FeatureIndex::load(&path), Err(MatchError::Index(_))));
    }

    #[test]
    fn test_entry_with_mismatched_descriptors() {
        let entry = IndexEntry {
            reference_id: "x".into(),
            image_path: PathBuf::from("x.png"),
            phash: "00".repeat(8),
            keypoints: vec![],
            descriptors: base64_of_one_descriptor(),
        };
        assert!(entry.features().is_err());
    }

    fn base64_of_one_descriptor() -> String {
        Features {
            keypoints: vec![],
            descriptors: vec![[7u8; 32]],
        }
        .descriptors_to_base64()
    }

    #[test]
    fn test_other_detector_settings_attach_hash_only() {
        let temp = TempDir::new().unwrap();
        save_image(&blocks(3), &temp.path().join("three.png")).unwrap();
        let mut refs = ReferenceSet::from_directory(temp.path()).unwrap();

        let (index, _) = FeatureIndex::build(&refs, &MatchConfig::default());
        assert_eq!(index.orb, OrbOptions::default());

        let fewer = MatchConfig {
            max_features: 50,
            ..Default::default()
        };
        assert_eq!(refs.attach_index(&index, &fewer.orb_options()).unwrap(), 1);
        let three = refs.get("three").unwrap();
        assert!(three.phash.is_some());
        assert!(three.features.is_none());

        // Only the ratio threshold differs: descriptors still apply.
        let looser = MatchConfig {
            ratio_threshold: 0.9,
            ..Default::default()
        };
        refs.attach_index(&index, &looser.orb_options()).unwrap();
        assert!(refs.get("three").unwrap().features.is_some());
    }
}
