//! ORB-style keypoint detection and 256-bit binary description.
//!
//! FAST-9 segment-test corners ranked by local contrast, intensity-centroid
//! orientation and steered BRIEF descriptors over the learned ORB test-pair
//! pattern. Modestly rotation-invariant, fast to match via Hamming distance.

mod brief;
mod fast;

/// 256-bit binary descriptor, 32 bytes.
pub type Descriptor = [u8; 32];

/// A detected corner with its response score and orientation (radians).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub response: f32,
    pub angle: f32,
}

/// Detector tuning knobs.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OrbConfig {
    /// FAST segment-test intensity threshold.
    pub fast_threshold: u8,
    /// Keep at most this many keypoints, ranked by response score.
    pub max_keypoints: usize,
    /// Minimum spacing (pixels) enforced between kept keypoints.
    pub nms_radius: f32,
}

impl Default for OrbConfig {
    fn default() -> Self {
        Self {
            fast_threshold: 20,
            max_keypoints: 500,
            nms_radius: 5.0,
        }
    }
}

/// Smoothing applied before orientation and description; single-pixel
/// BRIEF comparisons flip on pixel noise otherwise.
const DESCRIPTOR_SIGMA: f32 = 2.0;

/// Detect up to `config.max_keypoints` keypoints and compute their
/// descriptors. Keypoint and descriptor lists are index-aligned.
///
/// Corners are detected on the image as given; orientation moments and
/// descriptor samples are taken from a Gaussian-smoothed copy.
pub fn detect_and_compute(
    img: &image::GrayImage,
    config: &OrbConfig,
) -> (Vec<Keypoint>, Vec<Descriptor>) {
    let corners = fast::detect_corners(img, config.fast_threshold);
    let mut keypoints = fast::suppress_non_maxima(corners, config.nms_radius, config.max_keypoints);
    if keypoints.is_empty() {
        return (keypoints, Vec::new());
    }
    let smoothed = imageproc::filter::gaussian_blur_f32(img, DESCRIPTOR_SIGMA);
    for kp in keypoints.iter_mut() {
        kp.angle = brief::orientation(&smoothed, kp.x as i32, kp.y as i32);
    }
    let descriptors = keypoints
        .iter()
        .map(|kp| brief::describe(&smoothed, kp))
        .collect();
    (keypoints, descriptors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::gray_u8_noise;
    use image::{GrayImage, Luma};

    #[test]
    fn flat_image_has_no_keypoints() {
        let img = GrayImage::from_pixel(64, 64, Luma([128]));
        let (kps, descs) = detect_and_compute(&img, &OrbConfig::default());
        assert!(kps.is_empty());
        assert!(descs.is_empty());
    }

    #[test]
    fn bright_square_corners_are_detected() {
        let mut img = GrayImage::new(64, 64);
        for y in 20..40u32 {
            for x in 20..40u32 {
                img.put_pixel(x, y, Luma([255]));
            }
        }
        let (kps, descs) = detect_and_compute(&img, &OrbConfig::default());
        assert!(!kps.is_empty());
        assert_eq!(kps.len(), descs.len());
        // Every keypoint sits on or next to the square's boundary.
        for kp in &kps {
            let near_edge = |v: f32, lo: f32, hi: f32| (v - lo).abs() <= 3.0 || (v - hi).abs() <= 3.0;
            let inside = |v: f32, lo: f32, hi: f32| v >= lo - 3.0 && v <= hi + 3.0;
            assert!(
                (near_edge(kp.x, 20.0, 39.0) && inside(kp.y, 20.0, 39.0))
                    || (near_edge(kp.y, 20.0, 39.0) && inside(kp.x, 20.0, 39.0)),
                "stray keypoint at ({}, {})",
                kp.x,
                kp.y
            );
        }
    }

    #[test]
    fn max_keypoints_caps_detection() {
        let img = gray_u8_noise(128, 128, 21);
        let config = OrbConfig {
            max_keypoints: 10,
            ..OrbConfig::default()
        };
        let (kps, _) = detect_and_compute(&img, &config);
        assert!(kps.len() <= 10);
        assert!(!kps.is_empty());
    }

    #[test]
    fn detection_is_deterministic() {
        let img = gray_u8_noise(96, 96, 5);
        let config = OrbConfig::default();
        let (kps_a, descs_a) = detect_and_compute(&img, &config);
        let (kps_b, descs_b) = detect_and_compute(&img, &config);
        assert_eq!(kps_a, kps_b);
        assert_eq!(descs_a, descs_b);
    }

    #[test]
    fn tiny_image_yields_nothing() {
        let img = GrayImage::from_pixel(5, 5, Luma([200]));
        let (kps, _) = detect_and_compute(&img, &OrbConfig::default());
        assert!(kps.is_empty());
    }
}
