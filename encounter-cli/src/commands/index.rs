//! Index command implementation.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::Colorize;
use encounter_core::FeatureIndex;
use tracing::{info, warn};

use crate::utils::{load_config, load_references};
use crate::RefsArgs;

/// Execute the index command.
pub fn execute(refs: RefsArgs, out: PathBuf, config: Option<&Path>, quiet: bool) -> Result<()> {
    let config = load_config(config)?;
    // An index is built from the references themselves, not from an older index.
    let refs = load_references(&RefsArgs { index: None, ..refs }, &config.orb_options())?;

    let (index, failures) = FeatureIndex::build(&refs, &config);
    for failure in &failures {
        warn!(id = %failure.reference_id, error = %failure.error, "Reference not indexed");
    }

    index
        .save(&out)
        .with_context(|| format!("Failed to write index: {}", out.display()))?;
    info!(path = %out.display(), entries = index.len(), "Wrote index");

    if !quiet {
        println!("{} {}", "Indexed".green().bold(), out.display());
        println!("   {} {}", "Entries:".dimmed(), index.len());
        println!("   {} {:?}", "Hash:".dimmed(), index.algorithm);
        if !failures.is_empty() {
            println!("   {} {}", "Skipped:".dimmed(), failures.len().to_string().yellow());
            for failure in &failures {
                println!("      {} ({})", failure.reference_id, failure.error.to_string().red());
            }
        }
    }
    Ok(())
}
