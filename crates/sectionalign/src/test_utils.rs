//! Seeded synthetic images shared across the test modules.

use image::{GrayImage, Luma};
use rand::prelude::*;

use crate::preprocess::GrayF32;

/// Uniform noise in `[0, 1)` over the whole image.
pub fn noise_image(width: u32, height: u32, seed: u64) -> GrayF32 {
    let mut rng = StdRng::seed_from_u64(seed);
    GrayF32::from_fn(width, height, |_, _| Luma([rng.gen_range(0.0..1.0)]))
}

/// A dark image with one bright textured blob.
///
/// The blob is a `size`-pixel square with a smaller lobe attached at its
/// lower right. The asymmetric outline puts each corner in distinct local
/// context; a symmetric square makes opposite corners indistinguishable to
/// a rotation-normalized descriptor. The blob's top-left pixel sits at
/// `(top, left)` in row/column terms and its texture is reproducible from
/// the seed, so shifted copies carry identical features.
pub fn block_image(width: u32, height: u32, top: u32, left: u32, size: u32, seed: u64) -> GrayF32 {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut img = GrayF32::new(width, height);
    let mut fill = |img: &mut GrayF32, rng: &mut StdRng, r0: u32, c0: u32, side: u32| {
        for dr in 0..side {
            for dc in 0..side {
                let v = rng.gen_range(0.5..1.0);
                let (r, c) = (r0 + dr, c0 + dc);
                if c < width && r < height {
                    img.put_pixel(c, r, Luma([v]));
                }
            }
        }
    };
    fill(&mut img, &mut rng, top, left, size);
    fill(&mut img, &mut rng, top + size, left + size / 2, size / 2);
    img
}

/// Uniform 8-bit noise for the detector tests.
pub fn gray_u8_noise(width: u32, height: u32, seed: u64) -> GrayImage {
    let mut rng = StdRng::seed_from_u64(seed);
    GrayImage::from_fn(width, height, |_, _| Luma([rng.gen_range(0u8..=255)]))
}
