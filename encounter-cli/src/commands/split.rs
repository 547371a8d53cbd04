//! Split command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;
use encounter_core::{load_image, save_image, split_three};
use tracing::info;

use crate::utils::split_paths;

/// Execute the split command.
pub fn execute(input: PathBuf, out_prefix: Option<PathBuf>, quiet: bool) -> Result<()> {
    let image = load_image(&input).with_context(|| format!("Failed to read image: {}", input.display()))?;
    let slots = split_three(&image)?;
    let paths = split_paths(&input, out_prefix.as_deref());

    for (slot, path) in slots.iter().zip(&paths) {
        save_image(slot, path).with_context(|| format!("Failed to write image: {}", path.display()))?;
        info!(path = %path.display(), width = slot.width(), height = slot.height(), "Wrote slot");
        if !quiet {
            println!(
                "   {} {} ({}x{})",
                "Wrote:".dimmed(),
                path.display(),
                slot.width(),
                slot.height()
            );
        }
    }
    Ok(())
}
