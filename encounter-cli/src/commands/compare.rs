//! Compare command implementation.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use encounter_core::{best_match, load_image, Comparator, MatchReport};
use tracing::info;

use crate::utils::{apply_overrides, format_score, load_config, load_references, write_json};
use crate::{CropArgs, MatchArgs, OutputFormat, RefsArgs};

/// Everything the compare command needs from the command line.
pub struct CompareOptions {
    pub query: PathBuf,
    pub refs: RefsArgs,
    pub crop: CropArgs,
    pub matching: MatchArgs,
    pub out: Option<PathBuf>,
    pub format: OutputFormat,
    pub show: usize,
    pub require_match: bool,
    pub config: Option<PathBuf>,
    pub quiet: bool,
}

/// Execute the compare command.
pub fn execute(opts: CompareOptions) -> Result<()> {
    let config = apply_overrides(load_config(opts.config.as_deref())?, &opts.crop, &opts.matching)?;
    let refs = load_references(&opts.refs, &config.orb_options())?;
    let comparator = Comparator::new(config).context("Invalid config")?;

    let query = load_image(&opts.query)
        .with_context(|| format!("Failed to read query image: {}", opts.query.display()))?;
    let reports = comparator.compare(&query, &refs)?;
    info!(
        query = %opts.query.display(),
        reports = reports.len(),
        "Compared query against references"
    );

    if let Some(out) = &opts.out {
        write_json(&reports, Some(out))?;
    }

    let best = best_match(&reports, comparator.config());
    match opts.format {
        OutputFormat::Json => write_json(&reports, None)?,
        OutputFormat::Text if !opts.quiet => print_summary(&reports, best, opts.show),
        OutputFormat::Text => {}
    }

    if opts.require_match && best.is_none() {
        bail!(
            "No match found (template >= {} or ORB acceptance required)",
            comparator.config().template_threshold
        );
    }
    Ok(())
}

fn print_summary(reports: &[MatchReport], best: Option<&MatchReport>, show: usize) {
    println!();
    match best {
        Some(best) => println!("{} {}", "Best match:".green().bold(), best.reference_id.bold()),
        None => println!("{}", "No convincing match".yellow().bold()),
    }
    println!();

    for (rank, report) in reports.iter().take(show).enumerate() {
        match report.scores() {
            Some(scores) => println!(
                "   {:>2}. {:<24} {} {:<7} {} {:<6} {} {}",
                rank + 1,
                report.reference_id,
                "template".dimmed(),
                format_score(report.template_score()),
                "orb".dimmed(),
                format!("{:.3}", scores.orb.match_ratio),
                "phash".dimmed(),
                scores
                    .phash_distance
                    .map_or_else(|| "-".to_string(), |d| d.to_string()),
            ),
            None => println!(
                "   {:>2}. {:<24} {}",
                rank + 1,
                report.reference_id,
                report
                    .error()
                    .map_or_else(String::new, |e| e.to_string())
                    .red()
            ),
        }
    }

    let failed = reports.iter().filter(|r| r.error().is_some()).count();
    if reports.len() > show {
        println!("   {}", format!("... {} more", reports.len() - show).dimmed());
    }
    if failed > 0 {
        println!();
        println!("   {} {}", "Unusable references:".dimmed(), failed.to_string().yellow());
    }
}
