//! Image-space points, coordinate grids and centroid computation.

use crate::preprocess::GrayF32;

/// A location in image space.
///
/// `row` runs along the anterior-posterior axis of the section stack,
/// `col` along the lateral axis.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Point {
    pub row: f64,
    pub col: f64,
}

impl Point {
    /// Horizontal (lateral) coordinate.
    pub fn x(&self) -> f64 {
        self.col
    }

    /// Vertical (anterior-posterior) coordinate.
    pub fn y(&self) -> f64 {
        self.row
    }
}

/// Row- and column-index grids spanning an image's pixel lattice.
///
/// Both grids hold exactly `width * height` entries in row-major order and
/// must match the shape of the image they are used with. Precomputing the
/// grid amortizes centroid computation across a stack of equally sized
/// sections.
#[derive(Debug, Clone)]
pub struct Coordinates {
    rows: Vec<f32>,
    cols: Vec<f32>,
    width: u32,
    height: u32,
}

impl Coordinates {
    pub fn from_dimensions(width: u32, height: u32) -> Self {
        let n = (width as usize) * (height as usize);
        let mut rows = Vec::with_capacity(n);
        let mut cols = Vec::with_capacity(n);
        for r in 0..height {
            for c in 0..width {
                rows.push(r as f32);
                cols.push(c as f32);
            }
        }
        Self {
            rows,
            cols,
            width,
            height,
        }
    }

    pub fn from_image(img: &GrayF32) -> Self {
        Self::from_dimensions(img.width(), img.height())
    }

    /// Whether this grid was derived from an image of the same shape.
    pub fn matches(&self, img: &GrayF32) -> bool {
        self.width == img.width() && self.height == img.height()
    }
}

/// Intensity-weighted centroid of an image.
///
/// Returns `None` when the total intensity is exactly zero, in which case
/// the centroid is undefined. With `round` set, both coordinates are
/// rounded to the nearest integer pixel.
///
/// A grid not matching the image shape is a caller bug; when `coords` is
/// `None` a matching grid is built on the fly.
pub fn center_of_mass(img: &GrayF32, coords: Option<&Coordinates>, round: bool) -> Option<Point> {
    let owned;
    let coords = match coords {
        Some(c) => {
            debug_assert!(c.matches(img));
            c
        }
        None => {
            owned = Coordinates::from_image(img);
            &owned
        }
    };

    let data = img.as_raw();
    let total: f64 = data.iter().map(|&v| v as f64).sum();
    if total == 0.0 {
        return None;
    }

    let mut row_sum = 0.0f64;
    let mut col_sum = 0.0f64;
    for ((&v, &r), &c) in data.iter().zip(coords.rows.iter()).zip(coords.cols.iter()) {
        row_sum += v as f64 * r as f64;
        col_sum += v as f64 * c as f64;
    }

    let mut row = row_sum / total;
    let mut col = col_sum / total;
    if round {
        row = row.round();
        col = col.round();
    }
    Some(Point { row, col })
}
