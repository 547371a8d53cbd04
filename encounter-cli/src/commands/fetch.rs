//! Fetch command implementation.

use std::path::PathBuf;

use anyhow::Result;

/// Execute the fetch command.
#[cfg(feature = "network")]
pub async fn execute(url: String, output: PathBuf, timeout: u64, retries: u32, quiet: bool) -> Result<()> {
    use std::time::Duration;

    use anyhow::Context;
    use colored::Colorize;
    use encounter_core::{download_image, FetchConfig, HttpImageSource};
    use tracing::info;

    let source = HttpImageSource::new(FetchConfig {
        timeout: Duration::from_secs(timeout),
        max_retries: retries,
        ..Default::default()
    })?;

    info!(url = %url, "Fetching image");
    let (width, height) = download_image(&source, &url, &output)
        .await
        .with_context(|| format!("Fetch failed for {url}"))?;

    if !quiet {
        println!("{} {}", "Saved".green().bold(), output.display());
        println!("   {} {}x{}", "Size:".dimmed(), width, height);
    }
    Ok(())
}

#[cfg(not(feature = "network"))]
pub async fn execute(url: String, _output: PathBuf, _timeout: u64, _retries: u32, _quiet: bool) -> Result<()> {
    anyhow::bail!("Cannot fetch {url}: encounter was built without the `network` feature")
}
