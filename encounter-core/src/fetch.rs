//! Image download collaborator.
//!
//! Fetching lives outside the matching core: nothing in `compare` or
//! `recognize` touches the network. Transient HTTP failures are retried with
//! exponential backoff.

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use backoff::{future::retry_notify, ExponentialBackoff};
use reqwest::{Client, StatusCode};
use tracing::{debug, info, instrument, warn};

use crate::error::{MatchError, Result};
use crate::loader::save_image;

/// Source of encoded image bytes.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;

    fn name(&self) -> &str;
}

/// Configuration for [`HttpImageSource`].
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Per-request timeout (default: 30s).
    pub timeout: Duration,
    /// Maximum retry attempts for transient errors (default: 3).
    pub max_retries: u32,
    /// Initial retry interval (default: 500ms).
    pub initial_interval: Duration,
    /// Maximum retry interval (default: 5s).
    pub max_interval: Duration,
    /// Refuse plain `http://` URLs (default: false).
    pub https_only: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(5),
            https_only: false,
        }
    }
}

/// HTTP image source with retry and backoff.
pub struct HttpImageSource {
    client: Client,
    config: FetchConfig,
}

impl HttpImageSource {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .https_only(config.https_only)
            .user_agent(concat!("encounter/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MatchError::Fetch(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    async fn fetch_once(&self, url: &str) -> std::result::Result<Vec<u8>, backoff::Error<MatchError>> {
        let start = Instant::now();

        let response = self.client.get(url).send().await.map_err(|e| {
            let latency_ms = start.elapsed().as_millis() as u64;
            if is_transient_error(&e) {
                warn!(error = %e, latency_ms, "Transient error, will retry");
                backoff::Error::transient(MatchError::Fetch(format!("Transient error (will retry): {e}")))
            } else {
                warn!(error = %e, latency_ms, "Permanent error, aborting");
                backoff::Error::permanent(MatchError::Fetch(format!("Request to {url} failed: {e}")))
            }
        })?;

        let status = response.status();
        debug!(status = %status, "Received HTTP response");

        if !status.is_success() {
            let err = MatchError::Fetch(format!("{url} returned status: {status}"));
            return if is_transient_status(status) {
                warn!(status = %status, "Transient HTTP status, will retry");
                Err(backoff::Error::transient(err))
            } else {
                warn!(status = %status, "Permanent HTTP error");
                Err(backoff::Error::permanent(err))
            };
        }

        let body = response.bytes().await.map_err(|e| {
            backoff::Error::transient(MatchError::Fetch(format!("Failed to receive body from {url}: {e}")))
        })?;

        debug!(
            bytes = body.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Request completed successfully"
        );
        Ok(body.to_vec())
    }

    fn build_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.config.initial_interval,
            max_interval: self.config.max_interval,
            max_elapsed_time: Some(self.config.timeout * self.config.max_retries.max(1)),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        retry_notify(
            self.build_backoff(),
            || async move { self.fetch_once(url).await },
            |err: MatchError, duration: Duration| {
                warn!(
                    error = %err,
                    retry_after_ms = duration.as_millis() as u64,
                    "Retry scheduled"
                );
            },
        )
        .await
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// In-memory source keyed by URL.
#[derive(Debug, Clone, Default)]
pub struct StaticImageSource {
    images: HashMap<String, Vec<u8>>,
}

impl StaticImageSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, url: impl Into<String>, bytes: Vec<u8>) {
        self.images.insert(url.into(), bytes);
    }
}

#[async_trait]
impl ImageSource for StaticImageSource {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.images
            .get(url)
            .cloned()
            .ok_or_else(|| MatchError::Fetch(format!("{url} returned status: 404 Not Found")))
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Fetch an image, decode it and save it to `dest` in the format implied by
/// its extension. Returns the image dimensions.
#[instrument(skip(source), fields(source = source.name(), dest = %dest.display()))]
pub async fn download_image(source: &dyn ImageSource, url: &str, dest: &Path) -> Result<(u32, u32)> {
    let bytes = source.fetch(url).await?;
    let image = image::load_from_memory(&bytes).map_err(|e| MatchError::ImageDecode {
        path: url.into(),
        reason: e.to_string(),
    })?;
    save_image(&image, dest)?;
    info!(width = image.width(), height = image.height(), "Downloaded image");
    Ok((image.width(), image.height()))
}

/// Check if a reqwest error is transient and should be retried.
pub fn is_transient_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

/// Check if an HTTP status code indicates a transient error.
pub fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
            | StatusCode::BAD_GATEWAY
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::encode_for_path;
    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
    use tempfile::TempDir;

    fn webp_bytes() -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 6, Rgba([200, 10, 10, 128])));
        encode_for_path(&img, Path::new("icon.webp")).unwrap()
    }

    #[tokio::test]
    async fn test_download_converts_to_jpeg() {
        let temp = TempDir::new().unwrap();
        let mut source = StaticImageSource::new();
        source.insert("https://cdn.example/ghost.webp", webp_bytes());

        let dest = temp.path().join("images/ghost.jpg");
        let size = download_image(&source, "https://cdn.example/ghost.webp", &dest)
            .await
            .unwrap();
        assert_eq!(size, (10, 6));

        let saved = std::fs::read(&dest).unwrap();
        assert_eq!(image::guess_format(&saved).unwrap(), ImageFormat::Jpeg);
    }

    #[tokio::test]
    async fn test_unknown_url_is_fetch_error() {
        let temp = TempDir::new().unwrap();
        let source = StaticImageSource::new();
        let err = download_image(&source, "https://cdn.example/none.png", &temp.path().join("x.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, MatchError::Fetch(_)));
    }

    #[tokio::test]
    async fn test_undecodable_body_is_decode_error() {
        let temp = TempDir::new().unwrap();
        let mut source = StaticImageSource::new();
        source.insert("u", b"<html>nope</html>".to_vec());
        let err = download_image(&source, "u", &temp.path().join("x.png")).await.unwrap_err();
        assert!(matches!(err, MatchError::ImageDecode { .. }));
    }

    #[test]
    fn test_transient_status_codes() {
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_transient_status(StatusCode::GATEWAY_TIMEOUT));
        assert!(is_transient_status(StatusCode::BAD_GATEWAY));
        assert!(!is_transient_status(StatusCode::NOT_FOUND));
        assert!(!is_transient_status(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn test_http_source_builds() {
        let source = HttpImageSource::new(FetchConfig::default()).unwrap();
        assert_eq!(source.name(), "http");
    }
}
