//! Ranks a query image against a reference set.
//!
//! Each reference is processed independently: a reference that cannot be
//! loaded becomes a report entry with an `error` marker and never aborts the
//! run. Only a query that cannot be loaded is fatal.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::config::{MatchConfig, SortKey};
use crate::crop::crop;
use crate::error::Result;
use crate::loader::{load_image, to_gray};
use crate::metrics::{mse, ssim};
use crate::orb::{match_precomputed, Features, OrbDetector, OrbStats};
use crate::phash::{HashIndex, PerceptualHash, PerceptualHasher};
use crate::reference::{ReferenceError, ReferenceRecord, ReferenceSet};
use crate::template::{bidirectional_matches, ScaledMatch};

/// Scores for one successfully loaded reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub phash_distance: Option<u32>,
    /// `[query inside reference, reference inside query]`.
    pub template_scores: [Option<f32>; 2],
    /// Top-left corner of the best template alignment, in the containing image.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub location: Option<(u32, u32)>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mse: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ssim: Option<f64>,
    pub orb: OrbStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MatchOutcome {
    Scored(Scores),
    Failed { error: ReferenceError },
}

/// One line of the ranked report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchReport {
    pub reference_id: String,
    pub image_path: PathBuf,
    #[serde(flatten)]
    pub outcome: MatchOutcome,
}

impl MatchReport {
    fn failed(record: &ReferenceRecord, error: ReferenceError) -> Self {
        Self {
            reference_id: record.id.clone(),
            image_path: record.image_path.clone(),
            outcome: MatchOutcome::Failed { error },
        }
    }

    pub fn scores(&self) -> Option<&Scores> {
        match &self.outcome {
            MatchOutcome::Scored(scores) => Some(scores),
            MatchOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<ReferenceError> {
        match self.outcome {
            MatchOutcome::Failed { error } => Some(error),
            MatchOutcome::Scored(_) => None,
        }
    }

    /// Best template score over both directions.
    pub fn template_score(&self) -> Option<f32> {
        let [a, b] = self.scores()?.template_scores;
        match (a, b) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn match_ratio(&self) -> Option<f32> {
        self.scores().map(|s| s.orb.match_ratio)
    }

    pub fn phash_distance(&self) -> Option<u32> {
        self.scores().and_then(|s| s.phash_distance)
    }
}

/// Query-side data shared by every reference comparison.
struct PreparedQuery {
    gray: GrayImage,
    hash: PerceptualHash,
    features: Features,
}

/// Reference state after the hashing stage. Images are not kept: only
/// survivors of the prefilter are decoded again for scoring.
enum Staged {
    Failed(ReferenceError),
    Hashed(PerceptualHash),
}

/// Scores queries against reference sets with a fixed configuration.
#[derive(Debug, Clone)]
pub struct Comparator {
    config: MatchConfig,
    hasher: PerceptualHasher,
    detector: OrbDetector,
}

impl Comparator {
    /// Validates `config` up front so a bad value fails before any work.
    pub fn new(config: MatchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            hasher: config.hasher(),
            detector: OrbDetector::new(config.orb_options()),
            config,
        })
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Load the query from disk, then [`Comparator::compare`].
    #[instrument(skip_all, fields(query = %query_path.display()))]
    pub fn compare_path(&self, query_path: &Path, refs: &ReferenceSet) -> Result<Vec<MatchReport>> {
        let query = load_image(query_path)?;
        self.compare(&query, refs)
    }

    /// Score `query` against every reference and return the ranked report.
    ///
    /// The query is cropped first when a crop is configured.
    #[instrument(skip_all, fields(references = refs.len()))]
    pub fn compare(&self, query: &DynamicImage, refs: &ReferenceSet) -> Result<Vec<MatchReport>> {
        let query = match &self.config.crop {
            Some(params) => crop(query, params)?.0,
            None => query.clone(),
        };
        let gray = to_gray(&query);
        let prepared = PreparedQuery {
            hash: self.hasher.hash_image(&query),
            features: self.detector.detect_and_compute(&gray),
            gray,
        };
        debug!(keypoints = prepared.features.len(), "Prepared query");

        let mut reports = if self.prefilter_enabled() {
            let staged: Vec<Staged> = self.map_references(refs.records().iter().collect(), |record| {
                self.stage(record)
            });
            let keep = self.prefilter(&prepared.hash, &staged);

            let work: Vec<(&ReferenceRecord, Staged)> = refs
                .records()
                .iter()
                .zip(staged)
                .enumerate()
                .filter(|(i, (_, stage))| matches!(stage, Staged::Failed(_)) || keep[*i])
                .map(|(_, pair)| pair)
                .collect();

            self.map_references(work, |(record, stage)| match stage {
                Staged::Failed(error) => MatchReport::failed(record, error),
                Staged::Hashed(hash) => self.load_and_evaluate(&prepared, record, Some(hash)),
            })
        } else {
            self.map_references(refs.records().iter().collect(), |record| {
                self.load_and_evaluate(&prepared, record, None)
            })
        };
        sort_reports(&mut reports, self.config.sort_by);

        info!(
            reports = reports.len(),
            failed = reports.iter().filter(|r| r.error().is_some()).count(),
            "Comparison complete"
        );
        Ok(reports)
    }

    /// Apply `f` to each item on the rayon pool or serially, keeping order.
    fn map_references<T, R, F>(&self, items: Vec<T>, f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync + Send,
    {
        if self.config.parallel {
            items.into_par_iter().map(f).collect()
        } else {
            items.into_iter().map(f).collect()
        }
    }

    fn prefilter_enabled(&self) -> bool {
        self.config.phash_threshold.is_some() || self.config.top_k.is_some()
    }

    /// Attached hash, when it was computed with our algorithm.
    fn cached_hash<'r>(&self, record: &'r ReferenceRecord) -> Option<&'r PerceptualHash> {
        record
            .phash
            .as_ref()
            .filter(|h| h.algorithm == self.hasher.algorithm())
    }

    /// Hash a reference, reusing an attached hash when it is comparable.
    /// A missing file fails here even with a cached hash, so the prefilter
    /// can never hide it.
    fn stage(&self, record: &ReferenceRecord) -> Staged {
        if !record.image_path.is_file() {
            return Staged::Failed(ReferenceError::Missing);
        }
        if let Some(hash) = self.cached_hash(record) {
            return Staged::Hashed(hash.clone());
        }
        match record.load() {
            Ok(image) => Staged::Hashed(self.hasher.hash_image(&image)),
            Err(error) => Staged::Failed(error),
        }
    }

    /// Which references survive the hash prefilter (by position).
    fn prefilter(&self, query: &PerceptualHash, staged: &[Staged]) -> Vec<bool> {
        let mut index = HashIndex::new();
        for (i, stage) in staged.iter().enumerate() {
            if let Staged::Hashed(hash) = stage {
                index.insert(i.to_string(), hash.clone());
            }
        }

        let mut keep = vec![false; staged.len()];
        let candidates = index.candidates(query, self.config.phash_threshold, self.config.top_k);
        for candidate in &candidates {
            if let Ok(i) = candidate.reference_id.parse::<usize>() {
                keep[i] = true;
            }
        }
        debug!(
            kept = candidates.len(),
            hashed = index.len(),
            "Applied hash prefilter"
        );
        keep
    }

    /// Decode one reference and score it; the image is dropped on return.
    fn load_and_evaluate(
        &self,
        query: &PreparedQuery,
        record: &ReferenceRecord,
        hash: Option<PerceptualHash>,
    ) -> MatchReport {
        match record.load() {
            Ok(image) => self.evaluate(query, record, &image, hash),
            Err(error) => MatchReport::failed(record, error),
        }
    }

    fn evaluate(
        &self,
        query: &PreparedQuery,
        record: &ReferenceRecord,
        image: &DynamicImage,
        hash: Option<PerceptualHash>,
    ) -> MatchReport {
        let hash = hash
            .or_else(|| self.cached_hash(record).cloned())
            .unwrap_or_else(|| self.hasher.hash_image(image));
        let gray = to_gray(image);

        let matches = bidirectional_matches(&query.gray, &gray, &self.config.template_options());
        let location = best_location(&matches);

        let (mse, ssim) = if self.config.metrics {
            (mse(&query.gray, &gray), ssim(&query.gray, &gray))
        } else {
            (None, None)
        };

        let orb = match &record.features {
            Some(features) => match_precomputed(&query.features, features, self.config.ratio_threshold),
            None => {
                let features = self.detector.detect_and_compute(&gray);
                match_precomputed(&query.features, &features, self.config.ratio_threshold)
            }
        };

        MatchReport {
            reference_id: record.id.clone(),
            image_path: record.image_path.clone(),
            outcome: MatchOutcome::Scored(Scores {
                phash_distance: query.hash.hamming_distance(&hash).ok(),
                template_scores: matches.map(|m| m.map(|m| m.score)),
                location,
                mse,
                ssim,
                orb,
            }),
        }
    }
}

fn best_location(matches: &[Option<ScaledMatch>; 2]) -> Option<(u32, u32)> {
    matches
        .iter()
        .flatten()
        .fold(None::<&ScaledMatch>, |best, m| match best {
            Some(b) if b.score >= m.score => Some(b),
            _ => Some(m),
        })
        .map(|m| m.location)
}

/// Stable sort: scored entries by `key`, failed entries last.
pub fn sort_reports(reports: &mut [MatchReport], key: SortKey) {
    reports.sort_by(|a, b| compare_reports(a, b, key));
}

fn compare_reports(a: &MatchReport, b: &MatchReport, key: SortKey) -> Ordering {
    match (a.scores(), b.scores()) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(_), Some(_)) => match key {
            SortKey::Template => descending(a.template_score(), b.template_score()),
            SortKey::Orb => descending(a.match_ratio(), b.match_ratio()),
            SortKey::Phash => match (a.phash_distance(), b.phash_distance()) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
        },
    }
}

/// Higher first; missing values after present ones.
fn descending(a: Option<f32>, b: Option<f32>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// The top-ranked report, if it is convincing.
///
/// Accepted when its best template score reaches `template_threshold` or its
/// ORB result passes [`MatchConfig::accepts_orb`].
pub fn best_match<'a>(reports: &'a [MatchReport], config: &MatchConfig) -> Option<&'a MatchReport> {
    let top = reports.first()?;
    let scores = top.scores()?;
    let template_ok = top
        .template_score()
        .is_some_and(|s| s >= config.template_threshold);
    let orb_ok = config.accepts_orb(scores.orb.good_matches, scores.orb.match_ratio);
    (template_ok || orb_ok).then_some(top)
}
