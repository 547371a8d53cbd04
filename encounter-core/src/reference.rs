//! Reference image sets.
//!
//! A reference set is built per invocation, either by scanning a directory
//! or from a JSON encounter database of the form
//! `{ "id": { "image": "relative/path.webp", "available": "Day 3", ... } }`.

use std::path::{Path, PathBuf};

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::error::{MatchError, Result};
use crate::index::FeatureIndex;
use crate::loader::{has_image_extension, try_load, LoadOutcome};
use crate::orb::{Features, OrbOptions};
use crate::phash::PerceptualHash;

/// Day label that also admits entries tagged with [`LAST_DAY`].
const OPEN_ENDED_DAY: &str = "Day 10+";
const LAST_DAY: &str = "Day 10";

/// Why a reference could not be scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceError {
    Missing,
    LoadFailed,
}

impl std::fmt::Display for ReferenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => f.write_str("missing"),
            Self::LoadFailed => f.write_str("load_failed"),
        }
    }
}

/// One known image a query may be matched against.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceRecord {
    pub id: String,
    pub image_path: PathBuf,
    /// `available` label from the database, if any.
    pub day: Option<String>,
    pub phash: Option<PerceptualHash>,
    pub features: Option<Features>,
}

impl ReferenceRecord {
    pub fn new(id: impl Into<String>, image_path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            image_path: image_path.into(),
            day: None,
            phash: None,
            features: None,
        }
    }

    /// Load the image, turning any failure into a [`ReferenceError`].
    pub fn load(&self) -> std::result::Result<DynamicImage, ReferenceError> {
        match try_load(&self.image_path) {
            LoadOutcome::Loaded(image) => Ok(image),
            LoadOutcome::Missing => {
                warn!(reference = %self.id, path = %self.image_path.display(), "Reference image missing");
                Err(ReferenceError::Missing)
            }
            LoadOutcome::Unreadable(reason) => {
                warn!(reference = %self.id, path = %self.image_path.display(), %reason, "Reference image unreadable");
                Err(ReferenceError::LoadFailed)
            }
        }
    }
}

/// Restricts which database entries become references.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseFilter {
    /// Only keep entries whose `available` label matches.
    pub available: Option<String>,
}

impl DatabaseFilter {
    pub fn available(day: impl Into<String>) -> Self {
        Self {
            available: Some(day.into()),
        }
    }

    /// "Day 10+" also admits entries labelled "Day 10".
    pub fn admits(&self, day: Option<&str>) -> bool {
        let Some(wanted) = self.available.as_deref() else {
            return true;
        };
        match day {
            Some(day) if day == wanted => true,
            Some(day) => wanted == OPEN_ENDED_DAY && day == LAST_DAY,
            None => false,
        }
    }
}

/// Ordered collection of references.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceSet {
    records: Vec<ReferenceRecord>,
}

impl ReferenceSet {
    pub fn new(records: Vec<ReferenceRecord>) -> Self {
        Self { records }
    }

    /// Every raster image directly inside `dir`, sorted by file name.
    /// The file stem is the reference id.
    #[instrument(skip_all, fields(dir = %dir.display()))]
    pub fn from_directory(dir: &Path) -> Result<Self> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && has_image_extension(path))
            .collect();
        paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        let records: Vec<ReferenceRecord> = paths
            .into_iter()
            .map(|path| {
                let id = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                ReferenceRecord::new(id, path)
            })
            .collect();

        info!(count = records.len(), "Scanned reference directory");
        Ok(Self { records })
    }

    /// Read a database file; image paths resolve against `resources_root`.
    pub fn from_database(path: &Path, resources_root: &Path, filter: &DatabaseFilter) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_database_str(&text, resources_root, filter)
    }

    /// Parse a database document. Entries keep document order; entries that
    /// are not objects or have no `image` string are skipped.
    #[instrument(skip_all, fields(root = %resources_root.display()))]
    pub fn from_database_str(json: &str, resources_root: &Path, filter: &DatabaseFilter) -> Result<Self> {
        let document: Value = serde_json::from_str(json)?;
        let Value::Object(entries) = document else {
            return Err(MatchError::Database(
                "top level must be an object mapping ids to entries".into(),
            ));
        };

        let mut records = Vec::new();
        for (id, entry) in entries {
            let Some(image) = entry.get("image").and_then(Value::as_str) else {
                debug!(id = %id, "Skipping entry without image");
                continue;
            };
            let day = entry.get("available").and_then(Value::as_str);
            if !filter.admits(day) {
                continue;
            }

            let mut record = ReferenceRecord::new(id, resources_root.join(image));
            record.day = day.map(str::to_owned);
            records.push(record);
        }

        info!(count = records.len(), "Loaded reference database");
        Ok(Self { records })
    }

    /// Fill in precomputed hashes and descriptors from an index.
    ///
    /// Descriptors are only attached when the index was built with the same
    /// detector settings as `orb`; otherwise records keep just the hash and
    /// features are recomputed at match time. Returns how many records were
    /// matched by id.
    pub fn attach_index(&mut self, index: &FeatureIndex, orb: &OrbOptions) -> Result<usize> {
        let use_features = index.orb.same_detector(orb);
        if !use_features {
            warn!(
                index_max_features = index.orb.max_features,
                index_fast_threshold = index.orb.fast_threshold,
                max_features = orb.max_features,
                fast_threshold = orb.fast_threshold,
                "Index built with other ORB settings, ignoring cached descriptors"
            );
        }

        let mut attached = 0;
        for record in &mut self.records {
            let Some(entry) = index.get(&record.id) else {
                continue;
            };
            record.phash = Some(entry.perceptual_hash(index.algorithm)?);
            record.features = if use_features { Some(entry.features()?) } else { None };
            attached += 1;
        }
        debug!(attached, total = self.records.len(), "Attached feature index");
        Ok(attached)
    }

    pub fn records(&self) -> &[ReferenceRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ReferenceRecord> {
        self.records.iter()
    }

    pub fn get(&self, id: &str) -> Option<&ReferenceRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn push(&mut self, record: ReferenceRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<'a> IntoIterator for &'a ReferenceSet {
    type Item = &'a ReferenceRecord;
    type IntoIter = std::slice::Iter<'a, ReferenceRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    const DATABASE: &str = r#"{
        "zeta": { "image": "monsters/zeta.webp", "available": "Day 10" },
        "alpha": { "image": "monsters/alpha.webp", "available": "Day 2", "name_en": "Alpha" },
        "no_image": { "available": "Day 2" },
        "broken": "not an object",
        "omega": { "image": "monsters/omega.webp", "available": "Day 10+" }
    }"#;

    #[test]
    fn test_database_keeps_document_order() {
        let refs = ReferenceSet::from_database_str(DATABASE, Path::new("res"), &DatabaseFilter::default()).unwrap();
        let ids: Vec<_> = refs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["zeta", "alpha", "omega"]);
        assert_eq!(refs.records()[1].image_path, Path::new("res/monsters/alpha.webp"));
        assert_eq!(refs.records()[1].day.as_deref(), Some("Day 2"));
    }

    #[test]
    fn test_open_ended_day_filter() {
        let filter = DatabaseFilter::available("Day 10+");
        let refs = ReferenceSet::from_database_str(DATABASE, Path::new("res"), &filter).unwrap();
        let ids: Vec<_> = refs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["zeta", "omega"]);

        let filter = DatabaseFilter::available("Day 10");
        let refs = ReferenceSet::from_database_str(DATABASE, Path::new("res"), &filter).unwrap();
        assert_eq!(refs.len(), 1);
        assert!(!filter.admits(None));
    }

    #[test]
    fn test_database_must_be_object() {
        let err = ReferenceSet::from_database_str("[1, 2]", Path::new("."), &DatabaseFilter::default());
        assert!(matches!(err, Err(MatchError::Database(_))));
        assert!(ReferenceSet::from_database_str("{", Path::new("."), &DatabaseFilter::default()).is_err());
    }

    #[test]
    fn test_directory_scan_sorted_images_only() {
        let temp = TempDir::new().unwrap();
        let img = RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]));
        for name in ["b.png", "a.png", "c.jpg"] {
            img.save(temp.path().join(name)).unwrap();
        }
        std::fs::write(temp.path().join("notes.txt"), "x").unwrap();
        std::fs::create_dir(temp.path().join("sub.png")).unwrap();

        let refs = ReferenceSet::from_directory(temp.path()).unwrap();
        let ids: Vec<_> = refs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn test_missing_directory_is_error() {
        let temp = TempDir::new().unwrap();
        assert!(ReferenceSet::from_directory(&temp.path().join("absent")).is_err());
    }

    #[test]
    fn test_record_load_errors() {
        let temp = TempDir::new().unwrap();
        let missing = ReferenceRecord::new("m", temp.path().join("m.png"));
        assert_eq!(missing.load().unwrap_err(), ReferenceError::Missing);

        let path = temp.path().join("bad.png");
        std::fs::write(&path, b"garbage").unwrap();
        assert_eq!(ReferenceRecord::new("bad", path).load().unwrap_err(), ReferenceError::LoadFailed);
    }

    #[test]
    fn test_reference_error_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&ReferenceError::LoadFailed).unwrap(), "\"load_failed\"");
        assert_eq!(ReferenceError::Missing.to_string(), "missing");
    }
}
