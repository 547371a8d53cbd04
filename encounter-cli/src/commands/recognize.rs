//! Recognize command implementation.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::Colorize;
use encounter_core::{load_image, recognize_slots};
use tracing::info;

use crate::utils::{apply_overrides, load_config, load_references, write_json};
use crate::{CropArgs, MatchArgs, OutputFormat, RefsArgs};

/// Execute the recognize command.
pub fn execute(
    screenshot: PathBuf,
    refs: RefsArgs,
    crop: CropArgs,
    config: Option<&Path>,
    format: OutputFormat,
    quiet: bool,
) -> Result<()> {
    let config = apply_overrides(load_config(config)?, &crop, &MatchArgs::default())?;
    let refs = load_references(&refs, &config.orb_options())?;

    let image = load_image(&screenshot)
        .with_context(|| format!("Failed to read screenshot: {}", screenshot.display()))?;
    let slots = recognize_slots(&image, &refs, &config)?;
    info!(path = %screenshot.display(), recognized = slots.len(), "Recognized slots");

    match format {
        OutputFormat::Json => write_json(&slots, None)?,
        OutputFormat::Text if !quiet => {
            if slots.is_empty() {
                println!("{}", "No monsters recognized".yellow().bold());
            }
            for slot in &slots {
                println!(
                    "   {} {:<24} {} {} {} {:.3}",
                    format!("Slot {}:", slot.position).dimmed(),
                    slot.reference_id.green().bold(),
                    "matches".dimmed(),
                    slot.good_matches,
                    "ratio".dimmed(),
                    slot.confidence
                );
            }
        }
        OutputFormat::Text => {}
    }
    Ok(())
}
