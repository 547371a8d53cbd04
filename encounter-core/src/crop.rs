//! Fractional cropping and three-way slot splitting.
//!
//! Screenshots come in at arbitrary resolutions, so crop regions are given
//! as fractions of the source dimensions rather than pixels.

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::error::{MatchError, Result};

/// Which horizontal band to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Keep {
    #[default]
    Top,
    Bottom,
}

impl std::str::FromStr for Keep {
    type Err = MatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "top" => Ok(Keep::Top),
            "bottom" => Ok(Keep::Bottom),
            other => Err(MatchError::InvalidConfig(format!(
                "keep must be 'top' or 'bottom', got '{other}'"
            ))),
        }
    }
}

/// Crop parameters, all relative to the source image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CropParams {
    /// Fraction of the height to keep, in (0, 1].
    pub top_fraction: f32,
    /// Fraction of the width to keep, centered, in (0, 1].
    pub center_fraction: f32,
    /// Shift of the horizontal center as a fraction of the width, in [-1, 1].
    pub h_offset: f32,
    /// Pixels added to (or removed from, if negative) each horizontal side.
    pub pad_px: i32,
    pub keep: Keep,
}

impl Default for CropParams {
    fn default() -> Self {
        Self {
            top_fraction: 0.5,
            center_fraction: 0.6,
            h_offset: 0.0,
            pad_px: 0,
            keep: Keep::Top,
        }
    }
}

impl CropParams {
    /// Parameters that keep the whole image.
    pub fn identity() -> Self {
        Self {
            top_fraction: 1.0,
            center_fraction: 1.0,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_fraction("top_fraction", self.top_fraction)?;
        check_fraction("center_fraction", self.center_fraction)?;
        if !self.h_offset.is_finite() || !(-1.0..=1.0).contains(&self.h_offset) {
            return Err(MatchError::InvalidConfig(format!(
                "h_offset must be within [-1, 1], got {}",
                self.h_offset
            )));
        }
        Ok(())
    }
}

pub(crate) fn check_fraction(name: &str, value: f32) -> Result<()> {
    if !value.is_finite() || value <= 0.0 || value > 1.0 {
        return Err(MatchError::InvalidConfig(format!(
            "{name} must be within (0, 1], got {value}"
        )));
    }
    Ok(())
}

/// Pixel rectangle inside a source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Compute the crop rectangle for a `width` x `height` source.
///
/// The result always lies inside the source and is at least 1x1 (for a
/// non-empty source).
pub fn crop_rect(width: u32, height: u32, params: &CropParams) -> CropRect {
    let w = i64::from(width);
    let h = i64::from(height);

    // Halves round to even.
    let crop_h = ((h as f64 * f64::from(params.top_fraction)).round_ties_even() as i64).clamp(1, h.max(1));
    let crop_w = ((w as f64 * f64::from(params.center_fraction)).round_ties_even() as i64).clamp(1, w.max(1));
    let center_x = (w as f64 / 2.0 + f64::from(params.h_offset) * w as f64).round_ties_even() as i64;

    let mut left = center_x - crop_w / 2;
    let mut right = left + crop_w;
    if left < 0 {
        left = 0;
        right = w.min(crop_w);
    }
    if right > w {
        right = w;
        left = (w - crop_w).max(0);
    }

    let pad = i64::from(params.pad_px);
    left = (left - pad).max(0);
    right = (right + pad).min(w);

    // Negative padding can collapse the band; keep at least one column.
    if right <= left {
        let mid = ((left + right) / 2).clamp(0, (w - 1).max(0));
        left = mid;
        right = (mid + 1).min(w.max(1));
    }

    let top = match params.keep {
        Keep::Top => 0,
        Keep::Bottom => (h - crop_h).max(0),
    };

    CropRect {
        x: left as u32,
        y: top as u32,
        width: (right - left) as u32,
        height: crop_h as u32,
    }
}

/// Crop `image` and return the cropped image with its `(width, height)`.
pub fn crop(image: &DynamicImage, params: &CropParams) -> Result<(DynamicImage, (u32, u32))> {
    params.validate()?;
    if image.width() == 0 || image.height() == 0 {
        return Err(MatchError::InvalidConfig("cannot crop an empty image".into()));
    }

    let rect = crop_rect(image.width(), image.height(), params);
    let cropped = image.crop_imm(rect.x, rect.y, rect.width, rect.height);
    let size = (cropped.width(), cropped.height());
    Ok((cropped, size))
}

/// Split an image into three full-height vertical slices.
///
/// The first two slices are `width / 3` wide; the last absorbs the remainder.
pub fn split_three(image: &DynamicImage) -> Result<[DynamicImage; 3]> {
    let (w, h) = (image.width(), image.height());
    if w < 3 || h == 0 {
        return Err(MatchError::InvalidConfig(format!(
            "image too small to split into thirds: {w}x{h}"
        )));
    }

    let third = w / 3;
    Ok([
        image.crop_imm(0, 0, third, h),
        image.crop_imm(third, 0, third, h),
        image.crop_imm(third * 2, 0, w - third * 2, h),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb, RgbImage};

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        }))
    }

    #[test]
    fn test_identity_crop_returns_original() {
        for (w, h) in [(1, 1), (5, 3), (64, 48), (101, 77)] {
            let img = gradient(w, h);
            let (cropped, size) = crop(&img, &CropParams::identity()).unwrap();
            assert_eq!(size, (w, h));
            assert_eq!(cropped.to_rgb8(), img.to_rgb8());
        }
    }

    #[test]
    fn test_crop_dimensions_bounded() {
        let fractions = [0.01f32, 0.1, 0.33, 0.5, 0.77, 1.0];
        let offsets = [-1.0f32, -0.4, 0.0, 0.25, 1.0];
        let pads = [-50, -3, 0, 7, 500];
        for (w, h) in [(1, 1), (3, 2), (10, 40), (173, 91)] {
            for &tf in &fractions {
                for &cf in &fractions {
                    for &off in &offsets {
                        for &pad in &pads {
                            for keep in [Keep::Top, Keep::Bottom] {
                                let params = CropParams {
                                    top_fraction: tf,
                                    center_fraction: cf,
                                    h_offset: off,
                                    pad_px: pad,
                                    keep,
                                };
                                let r = crop_rect(w, h, &params);
                                assert!(r.width >= 1 && r.height >= 1, "{params:?} -> {r:?}");
                                assert!(r.x + r.width <= w, "{params:?} -> {r:?}");
                                assert!(r.y + r.height <= h, "{params:?} -> {r:?}");
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_centered_crop_geometry() {
        let params = CropParams {
            top_fraction: 0.5,
            center_fraction: 0.6,
            ..Default::default()
        };
        let r = crop_rect(100, 80, &params);
        assert_eq!(r, CropRect { x: 20, y: 0, width: 60, height: 40 });
    }

    #[test]
    fn test_half_pixels_round_to_even() {
        let params = CropParams {
            top_fraction: 0.5,
            center_fraction: 0.5,
            ..Default::default()
        };
        assert_eq!(crop_rect(5, 5, &params), CropRect { x: 1, y: 0, width: 2, height: 2 });
        assert_eq!(crop_rect(7, 3, &params), CropRect { x: 2, y: 0, width: 4, height: 2 });
    }

    #[test]
    fn test_offset_and_padding_clamped() {
        let params = CropParams {
            top_fraction: 1.0,
            center_fraction: 0.5,
            h_offset: 0.5,
            pad_px: 10,
            keep: Keep::Top,
        };
        // Center shifted to the right edge: band is pushed back inside.
        let r = crop_rect(100, 10, &params);
        assert_eq!(r.x + r.width, 100);
        assert_eq!(r.x, 40);
    }

    #[test]
    fn test_keep_bottom() {
        let img = gradient(20, 10);
        let params = CropParams {
            top_fraction: 0.3,
            center_fraction: 1.0,
            keep: Keep::Bottom,
            ..Default::default()
        };
        let (cropped, size) = crop(&img, &params).unwrap();
        assert_eq!(size, (20, 3));
        assert_eq!(cropped.get_pixel(0, 0), img.get_pixel(0, 7));
    }

    #[test]
    fn test_invalid_params_rejected() {
        let img = gradient(10, 10);
        for params in [
            CropParams { top_fraction: 0.0, ..Default::default() },
            CropParams { top_fraction: 1.5, ..Default::default() },
            CropParams { center_fraction: -0.2, ..Default::default() },
            CropParams { h_offset: 1.2, ..Default::default() },
            CropParams { h_offset: f32::NAN, ..Default::default() },
        ] {
            assert!(matches!(crop(&img, &params), Err(MatchError::InvalidConfig(_))));
        }
    }

    #[test]
    fn test_split_three_widths() {
        for w in [3u32, 10, 11, 100, 302] {
            let img = gradient(w, 7);
            let [left, mid, right] = split_three(&img).unwrap();
            assert_eq!(left.width(), w / 3);
            assert_eq!(mid.width(), w / 3);
            assert_eq!(left.width() + mid.width() + right.width(), w);
            assert!([left.height(), mid.height(), right.height()].iter().all(|&h| h == 7));
        }
    }

    #[test]
    fn test_split_three_too_narrow() {
        assert!(split_three(&gradient(2, 5)).is_err());
    }

    #[test]
    fn test_keep_from_str() {
        assert_eq!("TOP".parse::<Keep>().unwrap(), Keep::Top);
        assert_eq!("bottom".parse::<Keep>().unwrap(), Keep::Bottom);
        assert!("middle".parse::<Keep>().is_err());
    }
}
