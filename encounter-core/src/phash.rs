//! Perceptual hashing and coarse candidate retrieval.
//!
//! A perceptual hash is a short fingerprint that stays close (in Hamming
//! distance) for visually similar images. It is cheap to compare, so it is
//! used as a prefilter before the expensive template and keypoint checks.
//!
//! # Usage
//!
//! ```no_run
//! use encounter_core::phash::{HashAlgorithm, HashIndex, PerceptualHasher};
//!
//! let hasher = PerceptualHasher::new(HashAlgorithm::PHash);
//! let query = hasher.hash_bytes(&std::fs::read("query.png").unwrap()).unwrap();
//!
//! let mut index = HashIndex::new();
//! index.insert("slime", hasher.hash_bytes(&std::fs::read("slime.jpg").unwrap()).unwrap());
//! for candidate in index.candidates(&query, Some(12), Some(5)) {
//!     println!("{} at distance {}", candidate.reference_id, candidate.distance);
//! }
//! ```

use blockhash::{blockhash64, Blockhash64};
use image::DynamicImage;
use image_hasher::{HashAlg, HasherConfig};
use serde::{Deserialize, Serialize};

use crate::error::{MatchError, Result};

/// Hash size in bytes for both supported algorithms (64 bits).
pub const PERCEPTUAL_HASH_SIZE: usize = 8;

/// Perceptual hash algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// DCT-based pHash on an 8x8 grid, median threshold.
    #[default]
    PHash,
    /// Grid-based Blockhash, 64-bit output.
    Blockhash64,
}

impl std::str::FromStr for HashAlgorithm {
    type Err = MatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "phash" => Ok(Self::PHash),
            "blockhash" | "blockhash64" => Ok(Self::Blockhash64),
            other => Err(MatchError::InvalidConfig(format!(
                "unknown hash algorithm '{other}' (expected phash or blockhash64)"
            ))),
        }
    }
}

/// Computed perceptual hash with metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerceptualHash {
    /// The hash bytes
    pub hash: Vec<u8>,
    /// Algorithm used to compute the hash
    pub algorithm: HashAlgorithm,
    /// Hash size in bits
    pub bit_size: u32,
}

impl PerceptualHash {
    pub fn from_bytes(hash: Vec<u8>, algorithm: HashAlgorithm) -> Self {
        let bit_size = (hash.len() * 8) as u32;
        Self {
            hash,
            algorithm,
            bit_size,
        }
    }

    /// Hamming distance to another hash.
    ///
    /// Hashes from different algorithms are not comparable.
    pub fn hamming_distance(&self, other: &Self) -> Result<u32> {
        if self.algorithm != other.algorithm {
            return Err(MatchError::PerceptualHash(format!(
                "cannot compare {:?} hash with {:?} hash",
                self.algorithm, other.algorithm
            )));
        }
        hamming_distance(&self.hash, &other.hash)
            .ok_or_else(|| MatchError::PerceptualHash("Cannot compare empty hashes".into()))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.hash)
    }

    pub fn from_hex(hex_str: &str, algorithm: HashAlgorithm) -> Result<Self> {
        let hash = hex::decode(hex_str)
            .map_err(|e| MatchError::PerceptualHash(format!("Invalid hex string: {e}")))?;
        Ok(Self::from_bytes(hash, algorithm))
    }
}

/// Perceptual hasher configuration and computation.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerceptualHasher {
    algorithm: HashAlgorithm,
}

impl PerceptualHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }

    /// Compute a hash from encoded image bytes.
    pub fn hash_bytes(&self, image_data: &[u8]) -> Result<PerceptualHash> {
        let image = image::load_from_memory(image_data)
            .map_err(|e| MatchError::PerceptualHash(format!("Failed to decode image: {e}")))?;
        Ok(self.hash_image(&image))
    }

    /// Compute a hash from a decoded image.
    pub fn hash_image(&self, image: &DynamicImage) -> PerceptualHash {
        match self.algorithm {
            HashAlgorithm::PHash => {
                let hasher = HasherConfig::new()
                    .hash_size(8, 8)
                    .hash_alg(HashAlg::Median)
                    .preproc_dct()
                    .to_hasher();
                let hash = hasher.hash_image(image);
                PerceptualHash::from_bytes(hash.as_bytes().to_vec(), HashAlgorithm::PHash)
            }
            HashAlgorithm::Blockhash64 => {
                let hash: Blockhash64 = blockhash64(image);
                let bytes: [u8; PERCEPTUAL_HASH_SIZE] = hash.into();
                PerceptualHash::from_bytes(bytes.to_vec(), HashAlgorithm::Blockhash64)
            }
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }
}

/// Number of differing bits between two hash byte arrays.
///
/// Arrays of different lengths are compared on their overlap, plus a
/// penalty of 8 bits per missing byte. Returns `None` if either is empty.
pub fn hamming_distance(hash1: &[u8], hash2: &[u8]) -> Option<u32> {
    if hash1.is_empty() || hash2.is_empty() {
        return None;
    }

    let min_len = hash1.len().min(hash2.len());
    let distance: u32 = hash1[..min_len]
        .iter()
        .zip(&hash2[..min_len])
        .map(|(a, b)| (a ^ b).count_ones())
        .sum();
    let size_penalty = (hash1.len().abs_diff(hash2.len()) * 8) as u32;

    Some(distance + size_penalty)
}

/// A reference that survived the hash prefilter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub distance: u32,
    pub reference_id: String,
}

/// In-memory list of reference hashes, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct HashIndex {
    entries: Vec<(String, PerceptualHash)>,
}

impl HashIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, reference_id: impl Into<String>, hash: PerceptualHash) {
        self.entries.push((reference_id.into(), hash));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// References within `max_distance` of `query`, nearest first.
    ///
    /// Ties keep insertion order. Incomparable entries (other algorithm,
    /// empty hash) are never returned. `top_k` truncates after sorting.
    pub fn candidates(
        &self,
        query: &PerceptualHash,
        max_distance: Option<u32>,
        top_k: Option<usize>,
    ) -> Vec<Candidate> {
        let mut found: Vec<Candidate> = self
            .entries
            .iter()
            .filter_map(|(id, hash)| {
                let distance = query.hamming_distance(hash).ok()?;
                max_distance
                    .map_or(true, |max| distance <= max)
                    .then(|| Candidate {
                        distance,
                        reference_id: id.clone(),
                    })
            })
            .collect();

        found.sort_by_key(|c| c.distance);
        if let Some(k) = top_k {
            found.truncate(k);
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn pattern(seed: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(64, 64, |x, y| {
            let v = if ((x / 8) * seed + (y / 8)) % 3 == 0 { 230 } else { 20 };
            Rgb([v, (x * 4) as u8, (y * 4) as u8])
        }))
    }

    fn raw(bytes: [u8; 8]) -> PerceptualHash {
        PerceptualHash::from_bytes(bytes.to_vec(), HashAlgorithm::PHash)
    }

    #[test]
    fn test_hamming_distance_identical() {
        let hash = [0x00, 0xFF, 0xAA, 0x55, 0x00, 0xFF, 0xAA, 0x55];
        assert_eq!(hamming_distance(&hash, &hash), Some(0));
    }

    #[test]
    fn test_hamming_distance_different() {
        assert_eq!(hamming_distance(&[0x00; 8], &[0xFF; 8]), Some(64));
        assert_eq!(hamming_distance(&[0x01, 0, 0, 0], &[0x00, 0, 0, 0]), Some(1));
    }

    #[test]
    fn test_hamming_distance_size_mismatch_with_penalty() {
        assert_eq!(hamming_distance(&[0x00; 5], &[0x00; 8]), Some(24));
    }

    #[test]
    fn test_hamming_distance_empty() {
        assert_eq!(hamming_distance(&[], &[0x00, 0x00]), None);
    }

    #[test]
    fn test_hash_distance_symmetric_and_reflexive() {
        for algorithm in [HashAlgorithm::PHash, HashAlgorithm::Blockhash64] {
            let hasher = PerceptualHasher::new(algorithm);
            let a = hasher.hash_image(&pattern(3));
            let b = hasher.hash_image(&pattern(5));
            assert_eq!(a.hamming_distance(&a).unwrap(), 0);
            assert_eq!(
                a.hamming_distance(&b).unwrap(),
                b.hamming_distance(&a).unwrap()
            );
            assert_eq!(a.bit_size, 64);
        }
    }

    #[test]
    fn test_cross_algorithm_comparison_rejected() {
        let a = PerceptualHasher::new(HashAlgorithm::PHash).hash_image(&pattern(2));
        let b = PerceptualHasher::new(HashAlgorithm::Blockhash64).hash_image(&pattern(2));
        assert!(a.hamming_distance(&b).is_err());
    }

    #[test]
    fn test_hex_roundtrip() {
        let original = raw([0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE, 0xBA, 0xBE]);
        assert_eq!(original.to_hex(), "deadbeefcafebabe");
        let restored = PerceptualHash::from_hex("deadbeefcafebabe", HashAlgorithm::PHash).unwrap();
        assert_eq!(restored, original);
        assert!(PerceptualHash::from_hex("xyz", HashAlgorithm::PHash).is_err());
    }

    #[test]
    fn test_candidates_sorted_and_truncated() {
        let mut index = HashIndex::new();
        index.insert("far", raw([0xFF, 0xFF, 0, 0, 0, 0, 0, 0]));
        index.insert("near", raw([0x01, 0, 0, 0, 0, 0, 0, 0]));
        index.insert("same", raw([0; 8]));
        index.insert("near-too", raw([0x02, 0, 0, 0, 0, 0, 0, 0]));

        let query = raw([0; 8]);
        let all = index.candidates(&query, None, None);
        let ids: Vec<_> = all.iter().map(|c| c.reference_id.as_str()).collect();
        assert_eq!(ids, ["same", "near", "near-too", "far"]);

        let top2 = index.candidates(&query, None, Some(2));
        assert_eq!(top2.len(), 2);
        assert_eq!(top2[1].reference_id, "near");

        let close = index.candidates(&query, Some(1), None);
        assert_eq!(close.len(), 3);
        assert!(close.iter().all(|c| c.distance <= 1));
    }

    #[test]
    fn test_candidates_monotonic_in_threshold() {
        let mut index = HashIndex::new();
        for i in 0..32u8 {
            let byte = i.wrapping_mul(37);
            index.insert(format!("ref{i}"), raw([byte, byte ^ 0x5A, i, 0, 0, 0, 0, 0]));
        }
        let query = raw([0x12, 0x34, 0, 0, 0, 0, 0, 0]);

        for lo in 0..24u32 {
            for hi in lo..24u32 {
                let small = index.candidates(&query, Some(lo), None);
                let large = index.candidates(&query, Some(hi), None);
                assert!(small.len() <= large.len());
                assert!(small.iter().all(|c| large.contains(c)));
            }
        }
    }
}
