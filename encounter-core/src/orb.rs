//! ORB-style keypoint detection and descriptor matching.
//!
//! Keypoints are FAST-9 corners found on an image pyramid, oriented by the
//! intensity centroid of their patch, and described by 256 rotated BRIEF
//! intensity comparisons on a smoothed image. Descriptors are matched by
//! brute-force Hamming distance with a k=2 ratio test.

use std::sync::LazyLock;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::imageops::{self, FilterType};
use image::GrayImage;
use imageproc::corners::{corners_fast9, Corner};
use imageproc::filter::gaussian_blur_f32;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{MatchError, Result};

/// Descriptor length in bytes (256 bits).
pub const DESCRIPTOR_BYTES: usize = 32;

/// Radius of the patch used for orientation.
const ORIENTATION_RADIUS: i32 = 15;
/// Half-extent of the unrotated sampling pattern.
const PATTERN_EXTENT: i64 = 13;
/// Keypoints closer than this to a border are dropped; covers the rotated pattern.
const EDGE: u32 = 19;
/// Non-maximum suppression radius, in pixels of the pyramid level.
const NMS_RADIUS: i32 = 3;
/// Smoothing applied before sampling descriptor pairs.
const DESCRIPTOR_SIGMA: f32 = 2.0;

pub type Descriptor = [u8; DESCRIPTOR_BYTES];

/// A detected keypoint in source-image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// Orientation in radians.
    pub angle: f32,
    /// Pyramid level the keypoint was found on.
    pub octave: u8,
    /// FAST corner score.
    pub response: f32,
}

/// Keypoints and their descriptors (same length, same order).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Features {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
}

impl Features {
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Descriptors packed back to back and base64-encoded.
    pub fn descriptors_to_base64(&self) -> String {
        BASE64.encode(self.descriptors.concat())
    }

    /// Inverse of [`Features::descriptors_to_base64`] (keypoints are not stored).
    pub fn descriptors_from_base64(encoded: &str) -> Result<Vec<Descriptor>> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| MatchError::Index(format!("Invalid descriptor encoding: {e}")))?;
        if bytes.len() % DESCRIPTOR_BYTES != 0 {
            return Err(MatchError::Index(format!(
                "Descriptor blob length {} is not a multiple of {DESCRIPTOR_BYTES}",
                bytes.len()
            )));
        }
        Ok(bytes
            .chunks_exact(DESCRIPTOR_BYTES)
            .map(|chunk| {
                let mut d = [0u8; DESCRIPTOR_BYTES];
                d.copy_from_slice(chunk);
                d
            })
            .collect())
    }
}

/// Detector and matcher parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrbOptions {
    pub max_features: usize,
    pub ratio_threshold: f32,
    pub fast_threshold: u8,
    pub levels: u8,
    pub scale_factor: f32,
}

impl Default for OrbOptions {
    fn default() -> Self {
        Self {
            max_features: 500,
            ratio_threshold: 0.75,
            fast_threshold: 20,
            levels: 8,
            scale_factor: 1.2,
        }
    }
}

impl OrbOptions {
    /// Whether descriptors built with `other` are interchangeable with ours.
    /// The ratio threshold only affects matching, not detection.
    pub fn same_detector(&self, other: &Self) -> bool {
        self.max_features == other.max_features
            && self.fast_threshold == other.fast_threshold
            && self.levels == other.levels
            && self.scale_factor == other.scale_factor
    }
}

/// Match statistics between two images.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrbStats {
    pub keypoints_a: usize,
    pub keypoints_b: usize,
    pub good_matches: usize,
    /// `good_matches / max(1, min(keypoints_a, keypoints_b))`, in [0, 1].
    pub match_ratio: f32,
}

impl OrbStats {
    pub fn from_counts(keypoints_a: usize, keypoints_b: usize, good_matches: usize) -> Self {
        let denom = keypoints_a.min(keypoints_b).max(1);
        Self {
            keypoints_a,
            keypoints_b,
            good_matches,
            match_ratio: (good_matches as f32 / denom as f32).min(1.0),
        }
    }
}

/// Deterministic BRIEF sampling pairs: `(x1, y1, x2, y2)` in pattern space.
static PATTERN: LazyLock<Vec<[i8; 4]>> = LazyLock::new(|| {
    let mut state = 0x5EED_0F0B_u64;
    let mut next = move || {
        // splitmix64
        state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        let z = z ^ (z >> 31);
        ((z % (2 * PATTERN_EXTENT as u64 + 1)) as i64 - PATTERN_EXTENT) as i8
    };

    (0..DESCRIPTOR_BYTES * 8)
        .map(|_| loop {
            let pair = [next(), next(), next(), next()];
            if pair[0] != pair[2] || pair[1] != pair[3] {
                break pair;
            }
        })
        .collect()
});

#[derive(Debug, Clone, Copy, Default)]
pub struct OrbDetector {
    options: OrbOptions,
}

impl OrbDetector {
    pub fn new(options: OrbOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &OrbOptions {
        &self.options
    }

    /// Detect up to `max_features` keypoints and compute their descriptors.
    pub fn detect_and_compute(&self, gray: &GrayImage) -> Features {
        let opts = &self.options;
        let quotas = level_quotas(opts.max_features, opts.levels.max(1), opts.scale_factor);
        let mut features = Features::default();

        for (level, quota) in quotas.into_iter().enumerate() {
            let scale = opts.scale_factor.max(1.0).powi(level as i32);
            let level_img = if level == 0 {
                gray.clone()
            } else {
                let w = (gray.width() as f32 / scale).round() as u32;
                let h = (gray.height() as f32 / scale).round() as u32;
                if w <= 2 * EDGE || h <= 2 * EDGE {
                    break;
                }
                imageops::resize(gray, w, h, FilterType::Triangle)
            };
            if level_img.width() <= 2 * EDGE || level_img.height() <= 2 * EDGE {
                break;
            }

            let corners = select_corners(&level_img, opts.fast_threshold, quota);
            if corners.is_empty() {
                continue;
            }
            trace!(level, corners = corners.len(), "Selected corners");

            let smoothed = gaussian_blur_f32(&level_img, DESCRIPTOR_SIGMA);
            for corner in corners {
                let angle = intensity_centroid_angle(&level_img, corner.x, corner.y);
                features.descriptors.push(describe(&smoothed, corner.x, corner.y, angle));
                features.keypoints.push(Keypoint {
                    x: corner.x as f32 * scale,
                    y: corner.y as f32 * scale,
                    angle,
                    octave: level as u8,
                    response: corner.score,
                });
            }
        }

        features
    }
}

/// Split the feature budget across pyramid levels, favouring finer levels.
fn level_quotas(max_features: usize, levels: u8, scale_factor: f32) -> Vec<usize> {
    let factor = 1.0 / scale_factor.max(1.0);
    let weights: Vec<f32> = (0..levels).map(|l| factor.powi(i32::from(l))).collect();
    let total: f32 = weights.iter().sum();

    let mut quotas: Vec<usize> = weights
        .iter()
        .map(|w| (max_features as f32 * w / total).round() as usize)
        .collect();
    let assigned: usize = quotas.iter().sum();
    if assigned > max_features {
        let excess = assigned - max_features;
        if let Some(last) = quotas.iter_mut().rev().find(|q| **q >= excess) {
            *last -= excess;
        }
    } else if let Some(first) = quotas.first_mut() {
        *first += max_features - assigned;
    }
    quotas
}

/// FAST corners away from the border, strongest first, thinned by radius NMS.
fn select_corners(image: &GrayImage, threshold: u8, quota: usize) -> Vec<Corner> {
    if quota == 0 {
        return Vec::new();
    }
    let (w, h) = image.dimensions();
    let mut corners: Vec<Corner> = corners_fast9(image, threshold)
        .into_iter()
        .filter(|c| c.x >= EDGE && c.y >= EDGE && c.x < w - EDGE && c.y < h - EDGE)
        .collect();
    corners.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut taken = vec![false; (w * h) as usize];
    let mut selected = Vec::with_capacity(quota.min(corners.len()));
    for corner in corners {
        let (cx, cy) = (corner.x as i32, corner.y as i32);
        let suppressed = (-NMS_RADIUS..=NMS_RADIUS).any(|dy| {
            (-NMS_RADIUS..=NMS_RADIUS).any(|dx| {
                let (x, y) = (cx + dx, cy + dy);
                x >= 0 && y >= 0 && (x as u32) < w && (y as u32) < h && taken[(y as u32 * w + x as u32) as usize]
            })
        });
        if suppressed {
            continue;
        }
        taken[(corner.y * w + corner.x) as usize] = true;
        selected.push(corner);
        if selected.len() == quota {
            break;
        }
    }
    selected
}

/// Orientation of the patch around `(x, y)` from its intensity centroid.
fn intensity_centroid_angle(image: &GrayImage, x: u32, y: u32) -> f32 {
    let r2 = ORIENTATION_RADIUS * ORIENTATION_RADIUS;
    let (mut m10, mut m01) = (0i64, 0i64);
    for dy in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
        for dx in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
            if dx * dx + dy * dy > r2 {
                continue;
            }
            let v = i64::from(image.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32)[0]);
            m10 += i64::from(dx) * v;
            m01 += i64::from(dy) * v;
        }
    }
    (m01 as f32).atan2(m10 as f32)
}

/// Rotated BRIEF descriptor sampled from the smoothed level image.
fn describe(smoothed: &GrayImage, x: u32, y: u32, angle: f32) -> Descriptor {
    let (sin, cos) = angle.sin_cos();
    let sample = |px: i8, py: i8| {
        let (px, py) = (f32::from(px), f32::from(py));
        let rx = (px * cos - py * sin).round() as i32;
        let ry = (px * sin + py * cos).round() as i32;
        smoothed.get_pixel((x as i32 + rx) as u32, (y as i32 + ry) as u32)[0]
    };

    let mut descriptor = [0u8; DESCRIPTOR_BYTES];
    for (bit, pair) in PATTERN.iter().enumerate() {
        if sample(pair[0], pair[1]) < sample(pair[2], pair[3]) {
            descriptor[bit / 8] |= 1 << (bit % 8);
        }
    }
    descriptor
}

fn hamming(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Count descriptors in `a` whose nearest neighbour in `b` passes the ratio test.
///
/// A match is accepted when `nearest < ratio * second_nearest`. With fewer
/// than two descriptors in `b` there is no second neighbour and nothing is
/// counted.
pub fn count_good_matches(a: &[Descriptor], b: &[Descriptor], ratio: f32) -> usize {
    if a.is_empty() || b.len() < 2 {
        return 0;
    }

    a.par_iter()
        .filter(|da| {
            let (mut best, mut second) = (u32::MAX, u32::MAX);
            for db in b {
                let d = hamming(da, db);
                if d < best {
                    second = best;
                    best = d;
                } else if d < second {
                    second = d;
                }
            }
            (best as f32) < ratio * second as f32
        })
        .count()
}

/// Match statistics for already extracted features.
pub fn match_precomputed(a: &Features, b: &Features, ratio: f32) -> OrbStats {
    if a.is_empty() || b.is_empty() {
        return OrbStats::from_counts(a.len(), b.len(), 0);
    }
    let good = count_good_matches(&a.descriptors, &b.descriptors, ratio);
    OrbStats::from_counts(a.len(), b.len(), good)
}

/// Detect, describe and match two grayscale images.
pub fn match_features(gray_a: &GrayImage, gray_b: &GrayImage, options: &OrbOptions) -> OrbStats {
    let detector = OrbDetector::new(*options);
    let a = detector.detect_and_compute(gray_a);
    let b = detector.detect_and_compute(gray_b);
    match_precomputed(&a, &b, options.ratio_threshold)
}
