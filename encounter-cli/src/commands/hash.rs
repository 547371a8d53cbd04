//! Hash command implementation.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use encounter_core::{load_image, HashAlgorithm, PerceptualHasher};
use serde::Serialize;
use tracing::info;

use crate::utils::{load_config, write_json};
use crate::OutputFormat;

#[derive(Serialize)]
struct HashLine {
    path: PathBuf,
    algorithm: HashAlgorithm,
    hash: String,
}

/// Execute the hash command.
pub fn execute(
    files: Vec<PathBuf>,
    algorithm: Option<HashAlgorithm>,
    config: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let algorithm = match algorithm {
        Some(algorithm) => algorithm,
        None => load_config(config)?.hash_algorithm,
    };
    let hasher = PerceptualHasher::new(algorithm);

    let mut lines = Vec::with_capacity(files.len());
    for path in files {
        let image = load_image(&path).with_context(|| format!("Failed to read image: {}", path.display()))?;
        let hash = hasher.hash_image(&image).to_hex();
        info!(path = %path.display(), hash = %hash, "Hashed image");
        lines.push(HashLine { path, algorithm, hash });
    }

    match format {
        OutputFormat::Json => write_json(&lines, None)?,
        OutputFormat::Text => {
            for line in &lines {
                println!("{}  {}", line.hash, line.path.display());
            }
        }
    }
    Ok(())
}
