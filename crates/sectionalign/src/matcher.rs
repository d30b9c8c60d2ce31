//! Descriptor matching between two background-subtracted sections.
//!
//! Cross-checked brute-force Hamming matching with an adaptive per-pair
//! distance threshold derived from the spread of both descriptor sets.

use std::str::FromStr;

use image::GrayImage;

use crate::orb::{self, Descriptor, Keypoint, OrbConfig};
use crate::preprocess::{std_scale, to_gray_u8, GrayF32};

/// Fewest correspondences an affine fit downstream can work with.
pub const MIN_CORRESPONDENCES: usize = 3;

/// Feature algorithm selector.
///
/// A tagged variant per supported algorithm; the orchestrator dispatches on
/// it, so new algorithms are added as new variants without touching the
/// pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MatchMethod {
    /// ORB keypoints with steered BRIEF binary descriptors.
    Orb,
}

impl FromStr for MatchMethod {
    type Err = UnsupportedMethodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ORB" => Ok(MatchMethod::Orb),
            other => Err(UnsupportedMethodError {
                name: other.to_string(),
            }),
        }
    }
}

/// Rejection of an unknown feature-algorithm name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedMethodError {
    pub name: String,
}

impl std::fmt::Display for UnsupportedMethodError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unsupported alignment method {:?}, only \"ORB\" is accepted", self.name)
    }
}

impl std::error::Error for UnsupportedMethodError {}

/// Which of the two matched images a failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairSide {
    First,
    Second,
}

impl std::fmt::Display for PairSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PairSide::First => write!(f, "first image"),
            PairSide::Second => write!(f, "second image"),
        }
    }
}

/// Failure to establish usable correspondences between one image pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    /// One image yielded no keypoint descriptors at all.
    NoDescriptors { side: PairSide },
    /// Fewer than [`MIN_CORRESPONDENCES`] matches survived the distance
    /// filter.
    TooFewMatches { needed: usize, found: usize },
}

impl std::fmt::Display for MatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchError::NoDescriptors { side } => {
                write!(f, "no feature descriptors detected in the {side}")
            }
            MatchError::TooFewMatches { needed, found } => write!(
                f,
                "only {found} matches survived distance filtering, {needed} required"
            ),
        }
    }
}

impl std::error::Error for MatchError {}

/// One accepted descriptor correspondence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorMatch {
    /// Descriptor index in the first image.
    pub query_idx: usize,
    /// Descriptor index in the second image.
    pub train_idx: usize,
    /// Hamming distance between the two descriptors.
    pub distance: u32,
}

/// Matching configuration for one image pair.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MatchConfig {
    pub method: MatchMethod,
    /// Brightness rescale applied before the detector's 8-bit conversion.
    pub scale_factor: f32,
    /// Maximum keypoints per image; detector default when `None`.
    pub feature_size: Option<usize>,
    /// Match-distance acceptance multiplier in `[0, 1]`.
    pub threshold_factor: f32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            method: MatchMethod::Orb,
            scale_factor: 1.8,
            feature_size: None,
            threshold_factor: 0.67,
        }
    }
}

/// Result of matching two images: detector output for both sides, the raw
/// cross-checked match list and the distance threshold used for filtering.
///
/// Constructed once per image pair, consumed by the affine estimator via
/// [`FeatureAlignment::matched_points`], and retained only transiently for
/// diagnostics.
#[derive(Debug, Clone)]
pub struct FeatureAlignment {
    /// First image as seen by the detector (rescaled 8-bit).
    pub image1: GrayImage,
    /// Second image as seen by the detector (rescaled 8-bit).
    pub image2: GrayImage,
    pub keypoints1: Vec<Keypoint>,
    pub keypoints2: Vec<Keypoint>,
    pub descriptors1: Vec<Descriptor>,
    pub descriptors2: Vec<Descriptor>,
    /// Cross-checked matches, unfiltered.
    pub matches: Vec<DescriptorMatch>,
    /// Distance threshold; only matches strictly below it are accepted.
    pub threshold: f32,
}

impl FeatureAlignment {
    /// Accepted matches: strictly below the distance threshold.
    pub fn accepted(&self) -> impl Iterator<Item = &DescriptorMatch> {
        self.matches
            .iter()
            .filter(|m| (m.distance as f32) < self.threshold)
    }

    /// Corresponding `[x, y]` pixel coordinates of the accepted matches,
    /// pair-ordered: the i-th entry of each list belongs to one match.
    pub fn matched_points(&self) -> (Vec<[f64; 2]>, Vec<[f64; 2]>) {
        let mut xy1 = Vec::new();
        let mut xy2 = Vec::new();
        for m in self.accepted() {
            let k1 = &self.keypoints1[m.query_idx];
            let k2 = &self.keypoints2[m.train_idx];
            xy1.push([k1.x as f64, k1.y as f64]);
            xy2.push([k2.x as f64, k2.y as f64]);
        }
        (xy1, xy2)
    }
}

/// Detect, describe and match features between two float-grayscale images.
///
/// Both images are brightness-rescaled and converted to 8-bit for the
/// detector. Fails when either side yields no descriptors or when fewer
/// than [`MIN_CORRESPONDENCES`] matches survive the distance filter.
pub fn match_images(
    img1: &GrayF32,
    img2: &GrayF32,
    config: &MatchConfig,
) -> Result<FeatureAlignment, MatchError> {
    match config.method {
        MatchMethod::Orb => match_orb(img1, img2, config),
    }
}

fn match_orb(
    img1: &GrayF32,
    img2: &GrayF32,
    config: &MatchConfig,
) -> Result<FeatureAlignment, MatchError> {
    let orb_config = OrbConfig {
        max_keypoints: config
            .feature_size
            .unwrap_or(OrbConfig::default().max_keypoints),
        ..OrbConfig::default()
    };

    let image1 = to_gray_u8(&std_scale(img1, config.scale_factor));
    let image2 = to_gray_u8(&std_scale(img2, config.scale_factor));

    let (keypoints1, descriptors1) = orb::detect_and_compute(&image1, &orb_config);
    let (keypoints2, descriptors2) = orb::detect_and_compute(&image2, &orb_config);
    if descriptors1.is_empty() {
        return Err(MatchError::NoDescriptors {
            side: PairSide::First,
        });
    }
    if descriptors2.is_empty() {
        return Err(MatchError::NoDescriptors {
            side: PairSide::Second,
        });
    }

    let matches = match_descriptors(&descriptors1, &descriptors2);
    let threshold = distance_threshold(&descriptors1, &descriptors2, config.threshold_factor);

    let alignment = FeatureAlignment {
        image1,
        image2,
        keypoints1,
        keypoints2,
        descriptors1,
        descriptors2,
        matches,
        threshold,
    };

    let accepted = alignment.accepted().count();
    if accepted < MIN_CORRESPONDENCES {
        return Err(MatchError::TooFewMatches {
            needed: MIN_CORRESPONDENCES,
            found: accepted,
        });
    }
    Ok(alignment)
}

/// Brute-force Hamming matching with a cross-check constraint: a pair is
/// kept only when each descriptor is the other's single best match.
pub(crate) fn match_descriptors(
    descriptors1: &[Descriptor],
    descriptors2: &[Descriptor],
) -> Vec<DescriptorMatch> {
    let best_in_2: Vec<(usize, u32)> = descriptors1
        .iter()
        .map(|d| nearest(d, descriptors2))
        .collect();
    let best_in_1: Vec<(usize, u32)> = descriptors2
        .iter()
        .map(|d| nearest(d, descriptors1))
        .collect();

    best_in_2
        .iter()
        .enumerate()
        .filter(|&(q, &(t, _))| best_in_1[t].0 == q)
        .map(|(q, &(t, distance))| DescriptorMatch {
            query_idx: q,
            train_idx: t,
            distance,
        })
        .collect()
}

fn nearest(descriptor: &Descriptor, pool: &[Descriptor]) -> (usize, u32) {
    let mut best = (0usize, u32::MAX);
    for (i, other) in pool.iter().enumerate() {
        let d = hamming(descriptor, other);
        if d < best.1 {
            best = (i, d);
        }
    }
    best
}

fn hamming(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Adaptive acceptance threshold: the smaller of the two images' minimum
/// per-descriptor byte spreads, scaled by `threshold_factor`. Descriptor
/// distance scale depends on image content, so the cutoff adapts per pair.
pub(crate) fn distance_threshold(
    descriptors1: &[Descriptor],
    descriptors2: &[Descriptor],
    threshold_factor: f32,
) -> f32 {
    min_byte_spread(descriptors1).min(min_byte_spread(descriptors2)) * threshold_factor
}

/// Minimum over descriptors of the population standard deviation of the 32
/// descriptor bytes.
fn min_byte_spread(descriptors: &[Descriptor]) -> f32 {
    descriptors
        .iter()
        .map(|d| {
            let n = d.len() as f32;
            let mean = d.iter().map(|&b| b as f32).sum::<f32>() / n;
            let var = d.iter().map(|&b| (b as f32 - mean).powi(2)).sum::<f32>() / n;
            var.sqrt()
        })
        .fold(f32::INFINITY, f32::min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::subtract_background;
    use crate::test_utils::{block_image, noise_image};

    fn prepared(seed: u64) -> GrayF32 {
        subtract_background(&noise_image(120, 120, seed), 7.0)
    }

    #[test]
    fn parse_orb_and_reject_others() {
        assert_eq!("ORB".parse::<MatchMethod>().unwrap(), MatchMethod::Orb);
        let err = "SIFT".parse::<MatchMethod>().unwrap_err();
        assert_eq!(err.name, "SIFT");
    }

    #[test]
    fn identical_images_match_at_zero_distance() {
        let img = prepared(31);
        let alignment = match_images(&img, &img, &MatchConfig::default()).unwrap();
        assert!(alignment.accepted().count() >= MIN_CORRESPONDENCES);
        for m in alignment.accepted() {
            assert_eq!(m.distance, 0);
        }
        let (xy1, xy2) = alignment.matched_points();
        assert_eq!(xy1, xy2);
    }

    #[test]
    fn cross_check_is_mutual() {
        let a = prepared(1);
        let b = prepared(2);
        let alignment = match_images(&a, &b, &MatchConfig::default());
        // Independent noise may legitimately fail the distance filter; the
        // mutual-best property is checked on the raw match list either way.
        let (matches, d1, d2) = match alignment {
            Ok(al) => (al.matches, al.descriptors1, al.descriptors2),
            Err(_) => {
                let al = match_orb(&a, &b, &MatchConfig {
                    threshold_factor: 1.0,
                    ..MatchConfig::default()
                });
                match al {
                    Ok(al) => (al.matches, al.descriptors1, al.descriptors2),
                    Err(_) => return,
                }
            }
        };
        for m in &matches {
            let (best_t, _) = super::nearest(&d1[m.query_idx], &d2);
            assert_eq!(best_t, m.train_idx);
            let (best_q, _) = super::nearest(&d2[m.train_idx], &d1);
            assert_eq!(best_q, m.query_idx);
        }
    }

    #[test]
    fn translated_sections_yield_enough_matches() {
        // The same textured block at different row offsets: every corner
        // keypoint must find its counterpart despite the 90-degree
        // similarity between the block's corners.
        let a = subtract_background(&block_image(100, 140, 10, 45, 10, 77), 7.0);
        let b = subtract_background(&block_image(100, 140, 50, 45, 10, 77), 7.0);
        let alignment = match_images(&a, &b, &MatchConfig::default()).unwrap();
        assert!(alignment.accepted().count() >= MIN_CORRESPONDENCES);
        let (xy1, xy2) = alignment.matched_points();
        for (p1, p2) in xy1.iter().zip(xy2.iter()) {
            assert!((p2[1] - p1[1] - 40.0).abs() < 2.0, "row shift {} -> {}", p1[1], p2[1]);
            assert!((p2[0] - p1[0]).abs() < 2.0, "column drift {} -> {}", p1[0], p2[0]);
        }
    }

    #[test]
    fn zero_threshold_factor_accepts_nothing() {
        let img = prepared(17);
        let config = MatchConfig {
            threshold_factor: 0.0,
            ..MatchConfig::default()
        };
        let err = match_images(&img, &img, &config).unwrap_err();
        assert_eq!(
            err,
            MatchError::TooFewMatches {
                needed: MIN_CORRESPONDENCES,
                found: 0
            }
        );
    }

    #[test]
    fn unit_threshold_factor_accepts_maximal_cross_checked_set() {
        let img = prepared(23);
        let config = MatchConfig {
            threshold_factor: 1.0,
            ..MatchConfig::default()
        };
        let alignment = match_images(&img, &img, &config).unwrap();
        // Identical descriptor sets: every cross-checked match has distance
        // zero and the threshold is positive, so all of them are accepted.
        assert_eq!(alignment.accepted().count(), alignment.matches.len());
    }

    #[test]
    fn flat_images_fail_with_no_descriptors() {
        let flat = GrayF32::from_pixel(64, 64, image::Luma([0.5]));
        let textured = prepared(29);
        let err = match_images(&flat, &textured, &MatchConfig::default()).unwrap_err();
        assert_eq!(
            err,
            MatchError::NoDescriptors {
                side: PairSide::First
            }
        );
    }
}
