//! Common utility functions shared across CLI commands.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use encounter_core::{CropParams, DatabaseFilter, FeatureIndex, MatchConfig, OrbOptions, ReferenceSet};
use serde::Serialize;
use tracing::{debug, info};

use crate::{CropArgs, MatchArgs, RefsArgs};

/// Suffixes written by `split`, left to right.
pub const SLOT_SUFFIXES: [&str; 3] = ["left", "mid", "right"];

/// Resolve the match configuration: `--config` file, else `$ENCOUNTER_CONFIG`
/// and its field overrides, else defaults.
pub fn load_config(path: Option<&Path>) -> Result<MatchConfig> {
    match path {
        Some(path) => MatchConfig::load(path)
            .with_context(|| format!("Invalid config file: {}", path.display())),
        None => MatchConfig::from_env().context("Invalid config from environment"),
    }
}

/// Apply crop flags on top of `base`.
pub fn apply_crop_args(base: CropParams, args: &CropArgs) -> CropParams {
    CropParams {
        top_fraction: args.top_fraction.unwrap_or(base.top_fraction),
        center_fraction: args.center_fraction.unwrap_or(base.center_fraction),
        h_offset: args.h_offset.unwrap_or(base.h_offset),
        pad_px: args.pad_px.unwrap_or(base.pad_px),
        keep: args.keep.unwrap_or(base.keep),
    }
}

/// Fold crop and matching flags into `config` and re-validate.
pub fn apply_overrides(mut config: MatchConfig, crop: &CropArgs, matching: &MatchArgs) -> Result<MatchConfig> {
    if crop.is_set() {
        config.crop = Some(apply_crop_args(config.crop.unwrap_or_default(), crop));
    }
    if let Some(threshold) = matching.phash_threshold {
        config.phash_threshold = Some(threshold);
    }
    if let Some(k) = matching.top_k {
        config.top_k = Some(k);
    }
    if let Some(scales) = &matching.scales {
        config.scales = scales.clone();
    }
    if let Some(downscale) = matching.downscale {
        config.downscale = downscale;
    }
    if let Some(threshold) = matching.template_threshold {
        config.template_threshold = threshold;
    }
    if let Some(max) = matching.max_features {
        config.max_features = max;
    }
    if let Some(ratio) = matching.ratio_threshold {
        config.ratio_threshold = ratio;
    }
    if let Some(key) = matching.sort_by {
        config.sort_by = key;
    }
    if let Some(algorithm) = matching.hash_algorithm {
        config.hash_algorithm = algorithm;
    }
    if matching.no_metrics {
        config.metrics = false;
    }
    if matching.serial {
        config.parallel = false;
    }

    config.validate().context("Invalid config")?;
    debug!(?config, "Resolved match config");
    Ok(config)
}

/// Load references from a directory or an encounter database, attaching a
/// precomputed index when one is given. Cached descriptors are only used
/// when they were built with `orb`'s detector settings.
pub fn load_references(args: &RefsArgs, orb: &OrbOptions) -> Result<ReferenceSet> {
    let mut refs = match (&args.refs, &args.db) {
        (Some(dir), _) => ReferenceSet::from_directory(dir)
            .with_context(|| format!("Failed to read reference directory: {}", dir.display()))?,
        (None, Some(db)) => {
            let root = args
                .resources
                .clone()
                .or_else(|| db.parent().map(Path::to_path_buf))
                .unwrap_or_default();
            let filter = args.day.clone().map(DatabaseFilter::available).unwrap_or_default();
            ReferenceSet::from_database(db, &root, &filter)
                .with_context(|| format!("Failed to load reference database: {}", db.display()))?
        }
        (None, None) => anyhow::bail!("Invalid config: either --refs or --db is required"),
    };

    if let Some(index_path) = &args.index {
        let index = FeatureIndex::load(index_path)
            .with_context(|| format!("Failed to load index: {}", index_path.display()))?;
        let attached = refs.attach_index(&index, orb).context("Feature index does not match the references")?;
        info!(path = %index_path.display(), attached, "Attached feature index");
    }

    info!(count = refs.len(), "Loaded references");
    Ok(refs)
}

/// Serialize `value` as pretty JSON to `path`, or stdout when `path` is `None`.
pub fn write_json<T: Serialize + ?Sized>(value: &T, path: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize report")?;
    match path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to write report: {}", path.display()))?;
            }
            std::fs::write(path, json).with_context(|| format!("Failed to write report: {}", path.display()))?;
            info!(path = %path.display(), "Wrote report");
        }
        None => println!("{json}"),
    }
    Ok(())
}

/// Three-decimal score, or `-` when the direction was not computed.
pub fn format_score(score: Option<f32>) -> String {
    score.map_or_else(|| "-".to_string(), |s| format!("{s:.3}"))
}

/// Output paths for `split`: `<prefix>_left.<ext>`, `_mid`, `_right`.
///
/// The prefix defaults to the input path without its extension; the
/// extension follows the input (PNG when it has none).
pub fn split_paths(input: &Path, prefix: Option<&Path>) -> [PathBuf; 3] {
    let prefix = prefix.map_or_else(|| input.with_extension(""), Path::to_path_buf);
    let ext = input.extension().and_then(|e| e.to_str()).unwrap_or("png");

    SLOT_SUFFIXES.map(|suffix| {
        let mut name = OsString::from(prefix.as_os_str());
        name.push(format!("_{suffix}.{ext}"));
        PathBuf::from(name)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use encounter_core::{Keep, SortKey};

    #[test]
    fn test_split_paths() {
        assert_eq!(
            split_paths(Path::new("shots/enc.png"), None),
            [
                PathBuf::from("shots/enc_left.png"),
                PathBuf::from("shots/enc_mid.png"),
                PathBuf::from("shots/enc_right.png"),
            ]
        );
        let [left, _, right] = split_paths(Path::new("a.jpg"), Some(Path::new("out/slot")));
        assert_eq!(left, PathBuf::from("out/slot_left.jpg"));
        assert_eq!(right, PathBuf::from("out/slot_right.jpg"));
        assert_eq!(split_paths(Path::new("noext"), None)[1], PathBuf::from("noext_mid.png"));
    }

    #[test]
    fn test_format_score() {
        assert_eq!(format_score(Some(0.91234)), "0.912");
        assert_eq!(format_score(Some(-0.5)), "-0.500");
        assert_eq!(format_score(None), "-");
    }

    #[test]
    fn test_crop_args_override_only_given_fields() {
        let args = CropArgs {
            top_fraction: Some(0.4),
            keep: Some(Keep::Bottom),
            ..Default::default()
        };
        let params = apply_crop_args(CropParams::default(), &args);
        assert_eq!(params.top_fraction, 0.4);
        assert_eq!(params.keep, Keep::Bottom);
        assert_eq!(params.center_fraction, CropParams::default().center_fraction);
    }

    #[test]
    fn test_match_overrides() {
        let matching = MatchArgs {
            top_k: Some(3),
            sort_by: Some(SortKey::Orb),
            no_metrics: true,
            serial: true,
            ..Default::default()
        };
        let config = apply_overrides(MatchConfig::default(), &CropArgs::default(), &matching).unwrap();
        assert_eq!(config.top_k, Some(3));
        assert_eq!(config.sort_by, SortKey::Orb);
        assert!(!config.metrics);
        assert!(!config.parallel);
        assert!(config.crop.is_none());
    }

    #[test]
    fn test_invalid_override_rejected() {
        let matching = MatchArgs {
            ratio_threshold: Some(1.5),
            ..Default::default()
        };
        let err = apply_overrides(MatchConfig::default(), &CropArgs::default(), &matching).unwrap_err();
        assert!(format!("{err:#}").contains("Invalid config"));
    }
}
