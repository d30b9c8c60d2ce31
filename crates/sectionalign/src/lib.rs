//! sectionalign — affine alignment of serial-section image stacks.
//!
//! Aligns an ordered stack of 2-D grayscale section images (e.g. serial
//! brain-section photographs) into a common coordinate frame by estimating
//! a per-image 2×3 affine transform relative to an automatically chosen
//! reference section. The pipeline stages are:
//!
//! 1. **Centroid** – intensity-weighted center of mass per section, used as
//!    a proxy for its position along the anterior-posterior (row) axis.
//! 2. **Reference selection** – the section whose A-P position sits at a
//!    configurable percentile of the stack becomes the reference.
//! 3. **Background subtraction** – z-score normalization minus a
//!    Gaussian-smoothed background, flattening illumination gradients
//!    before feature detection.
//! 4. **Feature matching** – ORB-style keypoints and binary descriptors,
//!    cross-checked Hamming matching, adaptive distance filtering.
//! 5. **Affine estimation** – RANSAC-filtered least-squares fit of a 2×3
//!    affine matrix from the matched point pairs.
//!
//! # Public API
//! [`align_images`] with [`AlignConfig`] is the primary entry point; it
//! returns one [`AffineMatrix`] per input section (identity for the
//! reference), in input order. The individual stages are exported for
//! callers that need finer control or diagnostics.
//!
//! The crate performs no I/O: callers supply in-memory pixel buffers and
//! consume transforms. Warping an image through a transform is provided by
//! [`warp_image`] for downstream consumers; colorized QA rendering is out
//! of scope.

mod affine;
mod align;
mod matcher;
mod orb;
mod point;
mod preprocess;
#[cfg(test)]
mod test_utils;
mod warp;

pub use affine::{
    estimate_affine, fit_affine_lstsq, AffineMatrix, EstimateError, RansacConfig,
};
pub use align::{align_images, reference_index, AlignConfig, AlignError};
pub use matcher::{
    match_images, DescriptorMatch, FeatureAlignment, MatchConfig, MatchError, MatchMethod,
    PairSide, UnsupportedMethodError, MIN_CORRESPONDENCES,
};
pub use orb::{detect_and_compute, Descriptor, Keypoint, OrbConfig};
pub use point::{center_of_mass, Coordinates, Point};
pub use preprocess::{
    std_scale, subtract_background, to_float_grayscale, to_gray_u8, GrayF32,
};
pub use warp::warp_image;
