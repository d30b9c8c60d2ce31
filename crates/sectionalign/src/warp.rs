//! Resampling an image through an affine transform.

use crate::affine::AffineMatrix;
use crate::preprocess::GrayF32;

/// Warp `img` into the frame the transform maps into.
///
/// Output pixel `(x, y)` bilinearly samples the source at the
/// inverse-transformed location; pixels mapping outside the source stay
/// zero. Output dimensions equal the input's. Returns `None` when the
/// transform is not invertible.
///
/// This is the downstream `(image, AffineMatrix)` consumer contract: a QA
/// layer warps each section by its estimated transform to composite it
/// against the reference.
pub fn warp_image(img: &GrayF32, transform: &AffineMatrix) -> Option<GrayF32> {
    let inverse = transform.inverse()?;
    let (width, height) = img.dimensions();
    let mut out = GrayF32::new(width, height);

    for y in 0..height {
        for x in 0..width {
            let [sx, sy] = inverse.apply([x as f64, y as f64]);
            let x0 = sx.floor();
            let y0 = sy.floor();
            if x0 < 0.0 || y0 < 0.0 || x0 + 1.0 > (width - 1) as f64 || y0 + 1.0 > (height - 1) as f64
            {
                continue;
            }
            let (xi, yi) = (x0 as u32, y0 as u32);
            let tx = (sx - x0) as f32;
            let ty = (sy - y0) as f32;

            let v00 = img.get_pixel(xi, yi)[0];
            let v10 = img.get_pixel(xi + 1, yi)[0];
            let v01 = img.get_pixel(xi, yi + 1)[0];
            let v11 = img.get_pixel(xi + 1, yi + 1)[0];

            let value = v00 * (1.0 - tx) * (1.0 - ty)
                + v10 * tx * (1.0 - ty)
                + v01 * (1.0 - tx) * ty
                + v11 * tx * ty;
            out.put_pixel(x, y, image::Luma([value]));
        }
    }
    Some(out)
}
