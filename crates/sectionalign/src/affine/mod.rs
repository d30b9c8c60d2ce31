//! 2×3 affine transforms and their robust estimation from matched points.

mod estimate;

pub use estimate::{estimate_affine, fit_affine_lstsq, EstimateError, RansacConfig};

/// A 2×3 affine matrix mapping homogeneous 2-D pixel coordinates from one
/// image's frame into another's. Row-major:
///
/// ```text
/// | m00 m01 m02 |   x' = m00·x + m01·y + m02
/// | m10 m11 m12 |   y' = m10·x + m11·y + m12
/// ```
///
/// Encodes rotation, scale, shear and translation. Immutable value type.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AffineMatrix {
    m: [[f64; 3]; 2],
}

impl AffineMatrix {
    pub fn new(m: [[f64; 3]; 2]) -> Self {
        Self { m }
    }

    /// The identity transform.
    pub fn identity() -> Self {
        Self {
            m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        }
    }

    /// A pure translation by `(tx, ty)`.
    pub fn translation(tx: f64, ty: f64) -> Self {
        Self {
            m: [[1.0, 0.0, tx], [0.0, 1.0, ty]],
        }
    }

    /// The two matrix rows, `[m00, m01, m02]` and `[m10, m11, m12]`.
    pub fn rows(&self) -> &[[f64; 3]; 2] {
        &self.m
    }

    /// The linear 2×2 part (rotation/scale/shear).
    pub fn linear(&self) -> [[f64; 2]; 2] {
        [
            [self.m[0][0], self.m[0][1]],
            [self.m[1][0], self.m[1][1]],
        ]
    }

    /// The translation component `[tx, ty]`.
    pub fn translation_part(&self) -> [f64; 2] {
        [self.m[0][2], self.m[1][2]]
    }

    /// Apply the transform to a point `[x, y]`.
    pub fn apply(&self, p: [f64; 2]) -> [f64; 2] {
        [
            self.m[0][0] * p[0] + self.m[0][1] * p[1] + self.m[0][2],
            self.m[1][0] * p[0] + self.m[1][1] * p[1] + self.m[1][2],
        ]
    }

    /// Inverse transform, `None` when the linear part is singular.
    pub fn inverse(&self) -> Option<AffineMatrix> {
        let [[a, b], [c, d]] = self.linear();
        let det = a * d - b * c;
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let (ia, ib, ic, id) = (d / det, -b / det, -c / det, a / det);
        let [tx, ty] = self.translation_part();
        Some(AffineMatrix {
            m: [
                [ia, ib, -(ia * tx + ib * ty)],
                [ic, id, -(ic * tx + id * ty)],
            ],
        })
    }
}
