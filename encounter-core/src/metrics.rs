//! Whole-image pixel metrics reported next to the match scores.

use image::imageops::{self, FilterType};
use image::GrayImage;

/// Side of the square SSIM window.
const SSIM_WINDOW: u32 = 7;
const SSIM_C1: f64 = (0.01 * 255.0) * (0.01 * 255.0);
const SSIM_C2: f64 = (0.03 * 255.0) * (0.03 * 255.0);

/// Resize `b` to `a`'s dimensions when they differ.
fn aligned(a: &GrayImage, b: &GrayImage) -> GrayImage {
    if a.dimensions() == b.dimensions() {
        b.clone()
    } else {
        imageops::resize(b, a.width(), a.height(), FilterType::Triangle)
    }
}

/// Mean squared error between two grayscale images.
///
/// Returns `None` for an empty `a`.
pub fn mse(a: &GrayImage, b: &GrayImage) -> Option<f64> {
    if a.width() == 0 || a.height() == 0 || b.width() == 0 || b.height() == 0 {
        return None;
    }
    let b = aligned(a, b);
    let total: f64 = a
        .as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(&x, &y)| {
            let d = f64::from(x) - f64::from(y);
            d * d
        })
        .sum();
    Some(total / a.as_raw().len() as f64)
}

/// Summed-area table over an arbitrary per-pixel value.
struct SummedArea {
    width: usize,
    table: Vec<f64>,
}

impl SummedArea {
    fn new(width: u32, height: u32, value: impl Fn(usize) -> f64) -> Self {
        let (w, h) = (width as usize, height as usize);
        let stride = w + 1;
        let mut table = vec![0.0; stride * (h + 1)];
        for y in 0..h {
            let mut row = 0.0;
            for x in 0..w {
                row += value(y * w + x);
                table[(y + 1) * stride + x + 1] = table[y * stride + x + 1] + row;
            }
        }
        Self { width: stride, table }
    }

    /// Sum over the `size` x `size` window with top-left `(x, y)`.
    fn window(&self, x: usize, y: usize, size: usize) -> f64 {
        let s = self.width;
        self.table[(y + size) * s + x + size] - self.table[y * s + x + size] - self.table[(y + size) * s + x]
            + self.table[y * s + x]
    }
}

/// Mean structural similarity over all 7x7 windows.
///
/// Uses uniform windows with sample covariance and a data range of 255.
/// `b` is resized to `a` first. Returns `None` when `a` is smaller than
/// one window.
pub fn ssim(a: &GrayImage, b: &GrayImage) -> Option<f64> {
    let (w, h) = a.dimensions();
    if w < SSIM_WINDOW || h < SSIM_WINDOW || b.width() == 0 || b.height() == 0 {
        return None;
    }
    let b = aligned(a, b);
    let (pa, pb) = (a.as_raw(), b.as_raw());

    let px = |i: usize| f64::from(pa[i]);
    let py = |i: usize| f64::from(pb[i]);
    let sx = SummedArea::new(w, h, px);
    let sy = SummedArea::new(w, h, py);
    let sxx = SummedArea::new(w, h, |i| px(i) * px(i));
    let syy = SummedArea::new(w, h, |i| py(i) * py(i));
    let sxy = SummedArea::new(w, h, |i| px(i) * py(i));

    let k = SSIM_WINDOW as usize;
    let n = (k * k) as f64;
    let cov_norm = n / (n - 1.0);

    let (out_w, out_h) = ((w - SSIM_WINDOW + 1) as usize, (h - SSIM_WINDOW + 1) as usize);
    let mut total = 0.0;
    for y in 0..out_h {
        for x in 0..out_w {
            let ux = sx.window(x, y, k) / n;
            let uy = sy.window(x, y, k) / n;
            let vx = cov_norm * (sxx.window(x, y, k) / n - ux * ux);
            let vy = cov_norm * (syy.window(x, y, k) / n - uy * uy);
            let vxy = cov_norm * (sxy.window(x, y, k) / n - ux * uy);

            let numerator = (2.0 * ux * uy + SSIM_C1) * (2.0 * vxy + SSIM_C2);
            let denominator = (ux * ux + uy * uy + SSIM_C1) * (vx + vy + SSIM_C2);
            total += numerator / denominator;
        }
    }

    Some(total / (out_w * out_h) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn ramp(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| Luma([((x * 9 + y * 5) % 256) as u8]))
    }

    #[test]
    fn test_identical_images() {
        let img = ramp(32, 24);
        assert_eq!(mse(&img, &img), Some(0.0));
        let s = ssim(&img, &img).unwrap();
        assert!((s - 1.0).abs() < 1e-9, "ssim = {s}");
    }

    #[test]
    fn test_constant_offset_mse() {
        let a = GrayImage::from_pixel(10, 10, Luma([100]));
        let b = GrayImage::from_pixel(10, 10, Luma([110]));
        assert_eq!(mse(&a, &b), Some(100.0));
    }

    #[test]
    fn test_different_sizes_are_aligned() {
        let a = GrayImage::from_pixel(20, 20, Luma([50]));
        let b = GrayImage::from_pixel(40, 10, Luma([50]));
        assert_eq!(mse(&a, &b), Some(0.0));
        assert!((ssim(&a, &b).unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_inverted_image_has_low_ssim() {
        let a = ramp(32, 32);
        let b = GrayImage::from_fn(32, 32, |x, y| Luma([255 - a.get_pixel(x, y)[0]]));
        assert!(ssim(&a, &b).unwrap() < 0.0);
    }

    #[test]
    fn test_too_small_for_ssim() {
        let a = ramp(6, 30);
        assert!(ssim(&a, &a).is_none());
        assert_eq!(mse(&a, &a), Some(0.0));
    }
}
