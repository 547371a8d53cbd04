//! Crop command implementation.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::Colorize;
use encounter_core::{crop, load_image, save_image};
use tracing::info;

use crate::utils::{apply_crop_args, load_config};
use crate::CropArgs;

/// Execute the crop command.
///
/// Flags override the config file's crop, which overrides the default
/// top-half, center-60% band.
pub fn execute(input: PathBuf, output: PathBuf, args: CropArgs, config: Option<&Path>, quiet: bool) -> Result<()> {
    let config = load_config(config)?;
    let params = apply_crop_args(config.crop.unwrap_or_default(), &args);

    let image = load_image(&input).with_context(|| format!("Failed to read image: {}", input.display()))?;
    info!(path = %input.display(), width = image.width(), height = image.height(), "Read image");

    let (cropped, (width, height)) = crop(&image, &params).context("Invalid config: crop parameters")?;
    save_image(&cropped, &output).with_context(|| format!("Failed to write image: {}", output.display()))?;
    info!(path = %output.display(), width, height, "Wrote crop");

    if !quiet {
        println!("{} {}", "Cropped".green().bold(), output.display());
        println!(
            "   {} {}x{} -> {}x{}",
            "Size:".dimmed(),
            image.width(),
            image.height(),
            width,
            height
        );
    }
    Ok(())
}
