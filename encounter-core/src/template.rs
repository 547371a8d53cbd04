//! Zero-mean normalized cross-correlation template matching.
//!
//! Scores are in [-1, 1] with 1.0 a perfect match, the same normalization
//! family as OpenCV's `TM_CCOEFF_NORMED`, so thresholds carry over between
//! "query inside reference" and "reference inside query".

use image::imageops::{self, FilterType};
use image::GrayImage;
use imageproc::integral_image::{integral_image, integral_squared_image, sum_image_pixels};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Window variance (sum of squared deviations) below which a window is flat.
const FLAT_VARIANCE: f64 = 1e-3;

/// Best alignment of a template inside an image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemplateMatch {
    pub score: f32,
    /// Top-left corner of the best window.
    pub location: (u32, u32),
}

/// Best alignment across several template scales.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaledMatch {
    pub score: f32,
    pub location: (u32, u32),
    pub scale: f32,
}

/// Scales and pre-shrink applied by [`bidirectional_scores`].
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateOptions {
    pub scales: Vec<f32>,
    /// Factor in (0, 1] applied to both images before matching.
    pub downscale: f32,
}

impl Default for TemplateOptions {
    fn default() -> Self {
        Self {
            scales: vec![1.0],
            downscale: 1.0,
        }
    }
}

/// Slide `template` over `image` and return the best ZNCC window.
///
/// Returns `None` when the template is empty or larger than the image in
/// either dimension. Flat windows (or a flat template) score 0.
pub fn match_template_zncc(image: &GrayImage, template: &GrayImage) -> Option<TemplateMatch> {
    let (iw, ih) = image.dimensions();
    let (tw, th) = template.dimensions();
    if tw == 0 || th == 0 || tw > iw || th > ih {
        return None;
    }

    let n = f64::from(tw * th);
    let t_mean = template.pixels().map(|p| f64::from(p[0])).sum::<f64>() / n;
    let centered: Vec<f64> = template.pixels().map(|p| f64::from(p[0]) - t_mean).collect();
    let t_energy: f64 = centered.iter().map(|v| v * v).sum();

    let sums = integral_image::<_, u64>(image);
    let squares = integral_squared_image::<_, u64>(image);
    let pixels = image.as_raw();
    let stride = iw as usize;
    let (tw_us, th_us) = (tw as usize, th as usize);

    let out_w = iw - tw + 1;
    let out_h = ih - th + 1;

    (0..out_h)
        .into_par_iter()
        .map(|y| {
            let mut best = TemplateMatch {
                score: f32::NEG_INFINITY,
                location: (0, y),
            };
            for x in 0..out_w {
                let score = if t_energy < FLAT_VARIANCE {
                    0.0
                } else {
                    let s = sum_image_pixels(&sums, x, y, x + tw - 1, y + th - 1)[0] as f64;
                    let s2 = sum_image_pixels(&squares, x, y, x + tw - 1, y + th - 1)[0] as f64;
                    let w_energy = s2 - s * s / n;
                    if w_energy < FLAT_VARIANCE {
                        0.0
                    } else {
                        let mut cross = 0.0f64;
                        for ty in 0..th_us {
                            let row = (y as usize + ty) * stride + x as usize;
                            let window = &pixels[row..row + tw_us];
                            let tpl = &centered[ty * tw_us..(ty + 1) * tw_us];
                            cross += window
                                .iter()
                                .zip(tpl)
                                .map(|(&p, &t)| f64::from(p) * t)
                                .sum::<f64>();
                        }
                        (cross / (w_energy * t_energy).sqrt()).clamp(-1.0, 1.0)
                    }
                };
                if score as f32 > best.score {
                    best = TemplateMatch {
                        score: score as f32,
                        location: (x, y),
                    };
                }
            }
            best
        })
        .reduce_with(|a, b| {
            // Deterministic regardless of rayon's split: higher score, then top-most row.
            if b.score > a.score || (b.score == a.score && b.location.1 < a.location.1) {
                b
            } else {
                a
            }
        })
}

/// Match `template` at each scale and keep the best score.
///
/// Scales whose resized template does not fit inside `query` are skipped.
/// Returns `None` if no scale could be attempted.
pub fn match_multiscale(query: &GrayImage, template: &GrayImage, scales: &[f32]) -> Option<ScaledMatch> {
    let mut best: Option<ScaledMatch> = None;

    for &scale in scales {
        if !(scale.is_finite() && scale > 0.0) {
            continue;
        }
        let w = ((template.width() as f32 * scale).round() as u32).max(1);
        let h = ((template.height() as f32 * scale).round() as u32).max(1);
        if w > query.width() || h > query.height() {
            debug!(scale, w, h, "Template does not fit at this scale, skipping");
            continue;
        }

        let found = if w == template.width() && h == template.height() {
            match_template_zncc(query, template)
        } else {
            let resized = imageops::resize(template, w, h, FilterType::Triangle);
            match_template_zncc(query, &resized)
        };

        if let Some(m) = found {
            if best.map_or(true, |b| m.score > b.score) {
                best = Some(ScaledMatch {
                    score: m.score,
                    location: m.location,
                    scale,
                });
            }
        }
    }

    best
}

/// Best matches in both directions: `[a inside b, b inside a]`.
///
/// A direction is `None` when the template never fits at any scale.
/// Locations are mapped back to the full-resolution image.
pub fn bidirectional_matches(a: &GrayImage, b: &GrayImage, options: &TemplateOptions) -> [Option<ScaledMatch>; 2] {
    let shrinking = options.downscale < 1.0;
    let (a, b) = if shrinking {
        (shrink(a, options.downscale), shrink(b, options.downscale))
    } else {
        (a.clone(), b.clone())
    };

    let restore = |m: ScaledMatch| {
        if !shrinking {
            return m;
        }
        let f = options.downscale;
        ScaledMatch {
            location: (
                (m.location.0 as f32 / f).round() as u32,
                (m.location.1 as f32 / f).round() as u32,
            ),
            ..m
        }
    };

    [
        match_multiscale(&b, &a, &options.scales).map(restore),
        match_multiscale(&a, &b, &options.scales).map(restore),
    ]
}

/// Template scores in both directions: `[a inside b, b inside a]`.
pub fn bidirectional_scores(a: &GrayImage, b: &GrayImage, options: &TemplateOptions) -> [Option<f32>; 2] {
    bidirectional_matches(a, b, options).map(|m| m.map(|m| m.score))
}

fn shrink(image: &GrayImage, factor: f32) -> GrayImage {
    let w = ((image.width() as f32 * factor).round() as u32).max(1);
    let h = ((image.height() as f32 * factor).round() as u32).max(1);
    imageops::resize(image, w, h, FilterType::Triangle)
}
