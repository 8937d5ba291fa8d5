//! Scene-change scoring

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};

/// Grayscale thumbnail of `size` x `size` pixels
pub fn downsample_gray(image: &RgbImage, size: u32) -> GrayImage {
    let gray = imageops::grayscale(image);
    imageops::resize(&gray, size, size, FilterType::Triangle)
}

/// Mean absolute pixel difference between two thumbnails, on the 0-255 scale.
///
/// Thumbnails of different sizes are compared over their common area.
pub fn change_score(previous: &GrayImage, current: &GrayImage) -> f64 {
    let width = previous.width().min(current.width());
    let height = previous.height().min(current.height());
    let count = u64::from(width) * u64::from(height);
    if count == 0 {
        return 0.0;
    }

    let mut total: u64 = 0;
    for y in 0..height {
        for x in 0..width {
            let a = previous.get_pixel(x, y)[0];
            let b = current.get_pixel(x, y)[0];
            total += u64::from(a.abs_diff(b));
        }
    }
    total as f64 / count as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    #[test]
    fn test_downsample_dimensions() {
        let image = RgbImage::from_pixel(640, 360, Rgb([10, 20, 30]));
        let thumb = downsample_gray(&image, 64);
        assert_eq!(thumb.dimensions(), (64, 64));
    }

    #[test]
    fn test_identical_frames_score_zero() {
        let a = GrayImage::from_pixel(8, 8, Luma([77]));
        assert_eq!(change_score(&a, &a.clone()), 0.0);
    }

    #[test]
    fn test_black_to_white_scores_255() {
        let black = GrayImage::from_pixel(8, 8, Luma([0]));
        let white = GrayImage::from_pixel(8, 8, Luma([255]));
        assert_eq!(change_score(&black, &white), 255.0);
        assert_eq!(change_score(&white, &black), 255.0);
    }

    #[test]
    fn test_partial_change_is_averaged() {
        let a = GrayImage::from_pixel(2, 2, Luma([0]));
        let mut b = a.clone();
        b.put_pixel(0, 0, Luma([200]));
        assert_eq!(change_score(&a, &b), 50.0);
    }

    #[test]
    fn test_empty_thumbnail() {
        let empty = GrayImage::new(0, 0);
        assert_eq!(change_score(&empty, &empty), 0.0);
    }
}
