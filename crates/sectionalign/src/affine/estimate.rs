//! Least-squares affine fitting with a RANSAC wrapper.
//!
//! The estimator consumes two parallel `[x, y]` point lists (source and
//! destination) and produces the 2×3 affine matrix minimizing total
//! point-to-point displacement. Any linear-algebra backend satisfying this
//! contract could replace the nalgebra implementation.

use nalgebra::{DMatrix, DVector};
use rand::prelude::*;

use super::AffineMatrix;

/// An affine fit has six parameters; three non-collinear point pairs pin
/// them down.
const MIN_POINTS: usize = 3;

/// Errors from affine estimation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EstimateError {
    /// Too few point pairs for the requested fit.
    TooFewPoints {
        /// Required minimum number of pairs.
        needed: usize,
        /// Provided number of pairs.
        got: usize,
    },
    /// RANSAC could not find enough inliers.
    InsufficientInliers {
        /// Required minimum number of inliers.
        needed: usize,
        /// Number of inliers found.
        found: usize,
    },
    /// The point pairs are collinear; the fit is under-determined.
    DegenerateGeometry,
}

impl std::fmt::Display for EstimateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EstimateError::TooFewPoints { needed, got } => {
                write!(f, "need at least {needed} point pairs, got {got}")
            }
            EstimateError::InsufficientInliers { needed, found } => {
                write!(f, "RANSAC found {found} inliers, {needed} required")
            }
            EstimateError::DegenerateGeometry => {
                write!(f, "matched points are collinear; affine fit is under-determined")
            }
        }
    }
}

impl std::error::Error for EstimateError {}

/// RANSAC parameters for the affine fit.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RansacConfig {
    /// Number of minimal-sample iterations.
    pub max_iters: usize,
    /// Inlier reprojection-error threshold in pixels.
    pub inlier_threshold: f64,
    /// Minimum inlier count for an accepted model.
    pub min_inliers: usize,
    /// RNG seed; fits are deterministic for a fixed seed.
    pub seed: u64,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            max_iters: 500,
            inlier_threshold: 3.0,
            min_inliers: MIN_POINTS,
            seed: 42,
        }
    }
}

/// Plain least-squares affine fit of `src -> dst` over all pairs.
///
/// Solves the two 3-parameter row systems via SVD. Collinear input makes
/// the design matrix rank-deficient and fails with
/// [`EstimateError::DegenerateGeometry`].
pub fn fit_affine_lstsq(src: &[[f64; 2]], dst: &[[f64; 2]]) -> Result<AffineMatrix, EstimateError> {
    debug_assert_eq!(src.len(), dst.len());
    let n = src.len();
    if n < MIN_POINTS {
        return Err(EstimateError::TooFewPoints {
            needed: MIN_POINTS,
            got: n,
        });
    }

    let mut design = DMatrix::<f64>::zeros(n, 3);
    for (i, p) in src.iter().enumerate() {
        design[(i, 0)] = p[0];
        design[(i, 1)] = p[1];
        design[(i, 2)] = 1.0;
    }
    let bx = DVector::from_iterator(n, dst.iter().map(|p| p[0]));
    let by = DVector::from_iterator(n, dst.iter().map(|p| p[1]));

    let svd = design.svd(true, true);
    let smax = svd.singular_values.max();
    let tol = smax * 1e-9;
    if smax == 0.0 || svd.rank(tol) < 3 {
        return Err(EstimateError::DegenerateGeometry);
    }
    let row_x = svd
        .solve(&bx, tol)
        .map_err(|_| EstimateError::DegenerateGeometry)?;
    let row_y = svd
        .solve(&by, tol)
        .map_err(|_| EstimateError::DegenerateGeometry)?;

    Ok(AffineMatrix::new([
        [row_x[0], row_x[1], row_x[2]],
        [row_y[0], row_y[1], row_y[2]],
    ]))
}

/// Robust affine estimation: RANSAC over 3-pair minimal samples, inlier
/// selection by reprojection error, final re-fit over all inliers.
///
/// With exactly three pairs this degenerates to the direct fit. The search
/// exits early once more than 90% of the pairs are inliers.
pub fn estimate_affine(
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
    config: &RansacConfig,
) -> Result<AffineMatrix, EstimateError> {
    debug_assert_eq!(src.len(), dst.len());
    let n = src.len();
    if n < MIN_POINTS {
        return Err(EstimateError::TooFewPoints {
            needed: MIN_POINTS,
            got: n,
        });
    }
    if n == MIN_POINTS {
        return fit_affine_lstsq(src, dst);
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut best_model: Option<AffineMatrix> = None;
    let mut best_mask = vec![false; n];
    let mut best_inlier_count = 0usize;
    let mut degenerate_samples = 0usize;

    for iter in 0..config.max_iters {
        let sample = sample_indices(&mut rng, n, MIN_POINTS);
        let sample_src: Vec<[f64; 2]> = sample.iter().map(|&i| src[i]).collect();
        let sample_dst: Vec<[f64; 2]> = sample.iter().map(|&i| dst[i]).collect();

        let model = match fit_affine_lstsq(&sample_src, &sample_dst) {
            Ok(model) => model,
            Err(_) => {
                degenerate_samples += 1;
                continue;
            }
        };

        let mut mask = vec![false; n];
        let mut inlier_count = 0usize;
        for i in 0..n {
            if reprojection_error(&model, src[i], dst[i]) < config.inlier_threshold {
                mask[i] = true;
                inlier_count += 1;
            }
        }

        if inlier_count > best_inlier_count {
            best_inlier_count = inlier_count;
            best_model = Some(model);
            best_mask = mask;
            if best_inlier_count * 10 > n * 9 {
                break;
            }
        }

        // Every minimal sample degenerate so far: the match set itself is
        // collinear, more iterations will not help.
        if degenerate_samples == iter + 1 && iter + 1 >= 32 {
            return Err(EstimateError::DegenerateGeometry);
        }
    }

    let Some(best_model) = best_model else {
        if degenerate_samples == config.max_iters {
            return Err(EstimateError::DegenerateGeometry);
        }
        return Err(EstimateError::InsufficientInliers {
            needed: config.min_inliers,
            found: 0,
        });
    };

    if best_inlier_count < config.min_inliers {
        return Err(EstimateError::InsufficientInliers {
            needed: config.min_inliers,
            found: best_inlier_count,
        });
    }

    let inlier_src: Vec<[f64; 2]> = best_mask
        .iter()
        .zip(src.iter())
        .filter(|(&m, _)| m)
        .map(|(_, &p)| p)
        .collect();
    let inlier_dst: Vec<[f64; 2]> = best_mask
        .iter()
        .zip(dst.iter())
        .filter(|(&m, _)| m)
        .map(|(_, &p)| p)
        .collect();

    // Re-fit over all inliers; keep the sample model if the refit is
    // unexpectedly degenerate.
    Ok(fit_affine_lstsq(&inlier_src, &inlier_dst).unwrap_or(best_model))
}

fn reprojection_error(model: &AffineMatrix, src: [f64; 2], dst: [f64; 2]) -> f64 {
    let p = model.apply(src);
    let dx = p[0] - dst[0];
    let dy = p[1] - dst[1];
    (dx * dx + dy * dy).sqrt()
}

/// Sample `k` distinct indices from `0..n` using a Fisher–Yates partial
/// shuffle.
fn sample_indices(rng: &mut impl Rng, n: usize, k: usize) -> Vec<usize> {
    debug_assert!(k <= n);
    let mut indices: Vec<usize> = (0..n).collect();
    for i in 0..k {
        let j = rng.gen_range(i..n);
        indices.swap(i, j);
    }
    indices.truncate(k);
    indices
}
