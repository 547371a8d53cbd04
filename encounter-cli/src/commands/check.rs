//! Check command implementation.

use anyhow::{bail, Result};
use colored::Colorize;
use encounter_core::{audit, OrbOptions};

use crate::utils::{load_references, write_json};
use crate::{OutputFormat, RefsArgs};

/// Execute the check command. Fails when any reference is missing or
/// unreadable.
pub fn execute(refs: RefsArgs, format: OutputFormat, quiet: bool) -> Result<()> {
    let refs = load_references(&RefsArgs { index: None, ..refs }, &OrbOptions::default())?;
    let report = audit(&refs);

    match format {
        OutputFormat::Json => write_json(&report, None)?,
        OutputFormat::Text if !quiet => {
            let headline = format!("{}/{} references usable", report.ok, report.total);
            if report.is_clean() {
                println!("{}", headline.green().bold());
            } else {
                println!("{}", headline.yellow().bold());
            }
            for id in &report.missing {
                println!("   {} {}", "Missing:".dimmed(), id.red());
            }
            for id in &report.unreadable {
                println!("   {} {}", "Unreadable:".dimmed(), id.red());
            }
        }
        OutputFormat::Text => {}
    }

    if !report.is_clean() {
        bail!(
            "reference check failed: {} missing, {} unreadable",
            report.missing.len(),
            report.unreadable.len()
        );
    }
    Ok(())
}
