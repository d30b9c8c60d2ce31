//! Alignment orchestration: reference selection and pairwise transforms.

use rayon::prelude::*;

use crate::affine::{estimate_affine, AffineMatrix, EstimateError, RansacConfig};
use crate::matcher::{match_images, MatchConfig, MatchError, MatchMethod, PairSide};
use crate::point::{center_of_mass, Coordinates};
use crate::preprocess::{subtract_background, GrayF32};

/// Alignment pipeline configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AlignConfig {
    /// Percentile (from the anterior end) of the A-P centroid positions
    /// used to pick the reference section, in `[0, 100]`.
    pub use_percentile: f64,
    /// Gaussian standard deviation (pixels) for background subtraction.
    pub background_dia: f32,
    /// Brightness rescale applied before feature detection.
    pub scale_factor: f32,
    /// Feature algorithm; only ORB is implemented.
    pub method: MatchMethod,
    /// Maximum keypoints per image; detector default when `None`.
    pub feature_size: Option<usize>,
    /// Match-distance acceptance multiplier in `[0, 1]`.
    pub threshold_factor: f32,
    /// RANSAC parameters for the affine fit.
    pub ransac: RansacConfig,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            use_percentile: 15.0,
            background_dia: 7.0,
            scale_factor: 1.8,
            method: MatchMethod::Orb,
            feature_size: None,
            threshold_factor: 0.67,
            ransac: RansacConfig::default(),
        }
    }
}

impl AlignConfig {
    /// Reject out-of-range values before any per-image computation.
    pub fn validate(&self) -> Result<(), AlignError> {
        if !(0.0..=100.0).contains(&self.use_percentile) {
            return Err(AlignError::InvalidPercentile {
                value: self.use_percentile,
            });
        }
        if !(0.0..=1.0).contains(&self.threshold_factor) {
            return Err(AlignError::InvalidThresholdFactor {
                value: self.threshold_factor,
            });
        }
        if !(self.background_dia > 0.0) {
            return Err(AlignError::InvalidBackgroundDia {
                value: self.background_dia,
            });
        }
        Ok(())
    }

    fn match_config(&self) -> MatchConfig {
        MatchConfig {
            method: self.method,
            scale_factor: self.scale_factor,
            feature_size: self.feature_size,
            threshold_factor: self.threshold_factor,
        }
    }
}

/// Errors from a whole-stack alignment call. Every failure is fatal; no
/// partial results are returned and nothing is retried.
#[derive(Debug, Clone, PartialEq)]
pub enum AlignError {
    /// The input sequence was empty.
    EmptyInput,
    /// `use_percentile` outside `[0, 100]`.
    InvalidPercentile { value: f64 },
    /// `threshold_factor` outside `[0, 1]`.
    InvalidThresholdFactor { value: f32 },
    /// Non-positive background smoothing radius.
    InvalidBackgroundDia { value: f32 },
    /// Unknown feature-algorithm name.
    UnsupportedMethod { name: String },
    /// An image had zero total intensity; its centroid is undefined.
    ZeroIntensityImage { index: usize },
    /// One image of a pair yielded no feature descriptors.
    NoDescriptors {
        reference: usize,
        query: usize,
        /// Input index of the offending image.
        image: usize,
    },
    /// Too few matches survived distance filtering for a pair.
    TooFewMatches {
        reference: usize,
        query: usize,
        found: usize,
    },
    /// The affine estimator rejected a pair's correspondences.
    Estimation {
        reference: usize,
        query: usize,
        source: EstimateError,
    },
}

impl std::fmt::Display for AlignError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlignError::EmptyInput => write!(f, "no images to align"),
            AlignError::InvalidPercentile { value } => {
                write!(f, "use_percentile must be in [0, 100], got {value}")
            }
            AlignError::InvalidThresholdFactor { value } => {
                write!(f, "threshold_factor must be in [0, 1], got {value}")
            }
            AlignError::InvalidBackgroundDia { value } => {
                write!(f, "background_dia must be positive, got {value}")
            }
            AlignError::UnsupportedMethod { name } => {
                write!(f, "unsupported alignment method {name:?}, only \"ORB\" is accepted")
            }
            AlignError::ZeroIntensityImage { index } => {
                write!(f, "image {index} has zero total intensity; centroid is undefined")
            }
            AlignError::NoDescriptors {
                reference,
                query,
                image,
            } => write!(
                f,
                "no feature descriptors in image {image} while aligning {query} to reference {reference}"
            ),
            AlignError::TooFewMatches {
                reference,
                query,
                found,
            } => write!(
                f,
                "only {found} matches between image {query} and reference {reference}, at least 3 required"
            ),
            AlignError::Estimation {
                reference,
                query,
                source,
            } => write!(
                f,
                "affine estimation failed for image {query} against reference {reference}: {source}"
            ),
        }
    }
}

impl std::error::Error for AlignError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AlignError::Estimation { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<crate::matcher::UnsupportedMethodError> for AlignError {
    fn from(e: crate::matcher::UnsupportedMethodError) -> Self {
        AlignError::UnsupportedMethod { name: e.name }
    }
}

/// Align an ordered stack of sections into the reference frame.
///
/// Returns one transform per input image, in input order, mapping that
/// image's pixel coordinates into the reference image's frame; the entry
/// at the reference index is the identity. A single-image stack
/// short-circuits to one identity transform. Pairwise work runs in
/// parallel; the first failure aborts the whole call.
pub fn align_images(
    images: &[GrayF32],
    config: &AlignConfig,
) -> Result<Vec<AffineMatrix>, AlignError> {
    if images.is_empty() {
        return Err(AlignError::EmptyInput);
    }
    if images.len() == 1 {
        return Ok(vec![AffineMatrix::identity()]);
    }
    config.validate()?;

    // One grid serves every section of the common shape; differently sized
    // sections fall back to per-image grids.
    let coords = Coordinates::from_image(&images[0]);
    let mut positions = Vec::with_capacity(images.len());
    for (index, img) in images.iter().enumerate() {
        let shared = coords.matches(img).then_some(&coords);
        let centroid = center_of_mass(img, shared, true)
            .ok_or(AlignError::ZeroIntensityImage { index })?;
        positions.push(centroid.row);
    }

    let refidx = reference_index(&positions, config.use_percentile);
    tracing::info!(
        "reference section {} of {} (A-P position {})",
        refidx,
        images.len(),
        positions[refidx]
    );

    let reference = subtract_background(&images[refidx], config.background_dia);
    let match_config = config.match_config();

    images
        .par_iter()
        .enumerate()
        .map(|(i, img)| {
            if i == refidx {
                return Ok(AffineMatrix::identity());
            }
            let query = subtract_background(img, config.background_dia);
            let alignment =
                match_images(&reference, &query, &match_config).map_err(|e| match e {
                    MatchError::NoDescriptors { side } => AlignError::NoDescriptors {
                        reference: refidx,
                        query: i,
                        image: match side {
                            PairSide::First => refidx,
                            PairSide::Second => i,
                        },
                    },
                    MatchError::TooFewMatches { found, .. } => AlignError::TooFewMatches {
                        reference: refidx,
                        query: i,
                        found,
                    },
                })?;
            let (xy_ref, xy_query) = alignment.matched_points();
            tracing::debug!(
                "{} correspondences accepted for image {} against reference {}",
                xy_ref.len(),
                i,
                refidx
            );
            estimate_affine(&xy_query, &xy_ref, &config.ransac).map_err(|source| {
                AlignError::Estimation {
                    reference: refidx,
                    query: i,
                    source,
                }
            })
        })
        .collect()
}

/// Pick the reference index from per-section A-P positions.
///
/// With exactly two sections the one with the minimum position wins. For
/// larger stacks the target is the ceiling of the linearly interpolated
/// `use_percentile`-th percentile; the first section whose position is
/// nearest the target is selected. Deterministic; ties break toward the
/// lowest index. Panics when `positions` is empty.
pub fn reference_index(positions: &[f64], use_percentile: f64) -> usize {
    assert!(!positions.is_empty(), "positions must be non-empty");
    if positions.len() == 2 {
        return if positions[1] < positions[0] { 1 } else { 0 };
    }

    let target = percentile(positions, use_percentile).ceil();
    let mut best = 0usize;
    let mut best_dist = f64::INFINITY;
    for (i, &pos) in positions.iter().enumerate() {
        let dist = (pos - target).abs();
        if dist < best_dist {
            best = i;
            best_dist = dist;
        }
    }
    best
}

/// Linearly interpolated percentile, `p` in `[0, 100]`.
fn percentile(values: &[f64], p: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let frac = rank - lo as f64;
    if frac == 0.0 || lo + 1 >= sorted.len() {
        sorted[lo]
    } else {
        sorted[lo] + frac * (sorted[lo + 1] - sorted[lo])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{block_image, noise_image};
    use approx::assert_relative_eq;

    #[test]
    fn empty_input_is_rejected() {
        let err = align_images(&[], &AlignConfig::default()).unwrap_err();
        assert_eq!(err, AlignError::EmptyInput);
    }

    #[test]
    fn single_image_returns_identity_regardless_of_config() {
        let images = vec![GrayF32::new(8, 8)];
        let config = AlignConfig {
            use_percentile: 999.0,
            threshold_factor: 7.0,
            ..AlignConfig::default()
        };
        let transforms = align_images(&images, &config).unwrap();
        assert_eq!(transforms, vec![AffineMatrix::identity()]);
    }

    #[test]
    fn out_of_range_percentile_fails_before_processing() {
        let images = vec![GrayF32::new(8, 8), GrayF32::new(8, 8)];
        let config = AlignConfig {
            use_percentile: 120.0,
            ..AlignConfig::default()
        };
        let err = align_images(&images, &config).unwrap_err();
        assert_eq!(err, AlignError::InvalidPercentile { value: 120.0 });
    }

    #[test]
    fn out_of_range_threshold_factor_fails_before_processing() {
        let images = vec![GrayF32::new(8, 8), GrayF32::new(8, 8)];
        let config = AlignConfig {
            threshold_factor: 1.5,
            ..AlignConfig::default()
        };
        let err = align_images(&images, &config).unwrap_err();
        assert_eq!(err, AlignError::InvalidThresholdFactor { value: 1.5 });
    }

    #[test]
    fn unsupported_method_name_is_a_config_error() {
        let err: AlignError = "SIFT".parse::<MatchMethod>().unwrap_err().into();
        assert_eq!(
            err,
            AlignError::UnsupportedMethod {
                name: "SIFT".to_string()
            }
        );
    }

    #[test]
    fn zero_intensity_image_is_a_hard_error() {
        let images = vec![
            block_image(64, 64, 10, 10, 9, 1),
            GrayF32::new(64, 64),
            block_image(64, 64, 30, 10, 9, 1),
        ];
        let err = align_images(&images, &AlignConfig::default()).unwrap_err();
        assert_eq!(err, AlignError::ZeroIntensityImage { index: 1 });
    }

    #[test]
    fn two_positions_select_the_minimum() {
        assert_eq!(reference_index(&[30.0, 20.0], 15.0), 1);
        assert_eq!(reference_index(&[20.0, 30.0], 95.0), 0);
        // Tie breaks toward the lowest index.
        assert_eq!(reference_index(&[25.0, 25.0], 50.0), 0);
    }

    #[test]
    fn percentile_selection_picks_nearest_position() {
        // 15th percentile of {10, 50, 90} interpolates to 22; the nearest
        // position is 10, so the first section is the reference.
        assert_eq!(reference_index(&[10.0, 50.0, 90.0], 15.0), 0);
        // Deterministic on repeat calls.
        assert_eq!(reference_index(&[10.0, 50.0, 90.0], 15.0), 0);
        // High percentile lands on the posterior end.
        assert_eq!(reference_index(&[10.0, 50.0, 90.0], 100.0), 2);
    }

    #[test]
    #[should_panic(expected = "positions must be non-empty")]
    fn reference_index_rejects_empty_positions() {
        reference_index(&[], 15.0);
    }

    #[test]
    fn percentile_is_linearly_interpolated() {
        let values = [10.0, 50.0, 90.0];
        assert_relative_eq!(percentile(&values, 0.0), 10.0);
        assert_relative_eq!(percentile(&values, 50.0), 50.0);
        assert_relative_eq!(percentile(&values, 15.0), 22.0);
        assert_relative_eq!(percentile(&values, 100.0), 90.0);
    }

    #[test]
    fn identical_pair_aligns_to_near_identity() {
        let img = noise_image(120, 120, 41);
        let images = vec![img.clone(), img];
        let transforms = align_images(&images, &AlignConfig::default()).unwrap();
        assert_eq!(transforms.len(), 2);
        // Identical centroids: the tie breaks to index 0 as reference.
        assert_eq!(transforms[0], AffineMatrix::identity());
        let [tx, ty] = transforms[1].translation_part();
        assert!(tx.abs() < 0.5 && ty.abs() < 0.5, "translation ({tx}, {ty})");
        let [[a, b], [c, d]] = transforms[1].linear();
        assert_relative_eq!(a, 1.0, epsilon = 1e-3);
        assert_relative_eq!(d, 1.0, epsilon = 1e-3);
        assert_relative_eq!(b, 0.0, epsilon = 1e-3);
        assert_relative_eq!(c, 0.0, epsilon = 1e-3);
    }

    #[test]
    fn shifted_block_stack_selects_anterior_reference_and_recovers_shift() {
        // Three sections with the same textured block at row offsets 10, 50
        // and 90; percentile 15 makes the most anterior section the
        // reference and the other transforms recover the row shifts.
        let images = vec![
            block_image(100, 140, 10, 45, 10, 77),
            block_image(100, 140, 50, 45, 10, 77),
            block_image(100, 140, 90, 45, 10, 77),
        ];
        let transforms = align_images(&images, &AlignConfig::default()).unwrap();
        assert_eq!(transforms.len(), 3);
        assert_eq!(transforms[0], AffineMatrix::identity());

        for (i, expected_dy) in [(1usize, -40.0f64), (2, -80.0)] {
            let [tx, ty] = transforms[i].translation_part();
            assert!(tx.abs() < 3.0, "image {i}: tx {tx}");
            assert!((ty - expected_dy).abs() < 3.0, "image {i}: ty {ty}");
            let [[a, b], [c, d]] = transforms[i].linear();
            assert!((a - 1.0).abs() < 0.1 && (d - 1.0).abs() < 0.1);
            assert!(b.abs() < 0.1 && c.abs() < 0.1);
        }
    }

    #[test]
    fn output_order_matches_input_order() {
        // The reference lands mid-stack with a high percentile; its slot,
        // and only its slot, carries the identity.
        let images = vec![
            block_image(100, 140, 90, 45, 10, 77),
            block_image(100, 140, 50, 45, 10, 77),
            block_image(100, 140, 10, 45, 10, 77),
        ];
        let config = AlignConfig {
            use_percentile: 50.0,
            ..AlignConfig::default()
        };
        let transforms = align_images(&images, &config).unwrap();
        assert_eq!(transforms.len(), 3);
        assert_eq!(transforms[1], AffineMatrix::identity());
        assert_ne!(transforms[0], AffineMatrix::identity());
        assert_ne!(transforms[2], AffineMatrix::identity());
    }
}
