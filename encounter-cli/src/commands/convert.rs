//! Convert command implementation.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use colored::Colorize;
use encounter_core::loader::{convert_file, converted_path, has_image_extension};
use tracing::{debug, info};

/// Execute the convert command.
///
/// Directories are scanned one level deep for images; files already in the
/// target format are skipped.
pub fn execute(inputs: Vec<PathBuf>, to: String, out_dir: Option<PathBuf>, dry_run: bool, quiet: bool) -> Result<()> {
    let to = to.trim_start_matches('.').to_ascii_lowercase();
    let sources = collect_sources(&inputs, &to)?;
    if sources.is_empty() {
        if !quiet {
            println!("{}", "Nothing to convert".yellow());
        }
        return Ok(());
    }

    for src in &sources {
        let dir = out_dir
            .clone()
            .or_else(|| src.parent().map(Path::to_path_buf))
            .unwrap_or_default();
        let dst = converted_path(src, &dir, &to);

        if dry_run {
            if !quiet {
                println!("{} {} -> {}", "[DRY RUN]".yellow(), src.display(), dst.display());
            }
            continue;
        }

        convert_file(src, &dst).with_context(|| format!("Failed to convert {}", src.display()))?;
        info!(src = %src.display(), dst = %dst.display(), "Converted image");
        if !quiet {
            println!("   {} {}", "Wrote:".dimmed(), dst.display());
        }
    }

    if !quiet && !dry_run {
        println!("{} {} image(s) to {}", "Converted".green().bold(), sources.len(), to);
    }
    Ok(())
}

fn collect_sources(inputs: &[PathBuf], to: &str) -> Result<Vec<PathBuf>> {
    let mut sources = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let entries = std::fs::read_dir(input)
                .with_context(|| format!("Failed to read directory: {}", input.display()))?;
            let mut found: Vec<PathBuf> = entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && has_image_extension(p))
                .collect();
            found.sort();
            sources.extend(found);
        } else if input.is_file() {
            sources.push(input.clone());
        } else {
            bail!("Failed to read input: {} does not exist", input.display());
        }
    }

    sources.retain(|p| {
        let same = p
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(to));
        if same {
            debug!(path = %p.display(), "Already in target format");
        }
        !same
    });
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_sources_skips_target_format() {
        let temp = tempfile::TempDir::new().unwrap();
        for name in ["a.png", "b.webp", "notes.txt", "c.JPG"] {
            std::fs::write(temp.path().join(name), b"x").unwrap();
        }
        let sources = collect_sources(&[temp.path().to_path_buf()], "webp").unwrap();
        let names: Vec<_> = sources
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.png", "c.JPG"]);
    }

    #[test]
    fn test_missing_input_is_error() {
        let err = collect_sources(&[PathBuf::from("/nonexistent/x.png")], "webp").unwrap_err();
        assert!(err.to_string().contains("Failed to read input"));
    }
}
