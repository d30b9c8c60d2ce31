//! FAST-9 corner detection, response scoring and non-maximum suppression.

use std::cmp::Ordering;
use std::collections::HashMap;

use image::GrayImage;

use super::Keypoint;

/// Bresenham circle of radius 3 around the candidate pixel, clockwise from
/// twelve o'clock.
const CIRCLE: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

/// Minimum run of consecutive brighter/darker circle pixels for a corner.
const MIN_SEGMENT: u32 = 9;

/// Detect FAST-9 corners. The 3-pixel image border is excluded.
pub(super) fn detect_corners(img: &GrayImage, threshold: u8) -> Vec<Keypoint> {
    let (width, height) = img.dimensions();
    let mut corners = Vec::new();
    if width < 7 || height < 7 {
        return corners;
    }
    for y in 3..height - 3 {
        for x in 3..width - 3 {
            let center = img.get_pixel(x, y)[0];
            if !cardinal_pre_check(img, x, y, center, threshold) {
                continue;
            }
            if !segment_test(img, x, y, center, threshold) {
                continue;
            }
            corners.push(Keypoint {
                x: x as f32,
                y: y as f32,
                response: response(img, x, y, center),
                angle: 0.0,
            });
        }
    }
    corners
}

/// Cheap rejection: any run of [`MIN_SEGMENT`] consecutive circle pixels
/// covers at least two of the four cardinal circle pixels, so fewer than
/// two all-brighter or all-darker cardinals rules a corner out.
fn cardinal_pre_check(img: &GrayImage, x: u32, y: u32, center: u8, threshold: u8) -> bool {
    let bright = center.saturating_add(threshold);
    let dark = center.saturating_sub(threshold);
    let cardinals = [
        img.get_pixel(x, y - 3)[0],
        img.get_pixel(x + 3, y)[0],
        img.get_pixel(x, y + 3)[0],
        img.get_pixel(x - 3, y)[0],
    ];
    let n_bright = cardinals.iter().filter(|&&p| p > bright).count();
    let n_dark = cardinals.iter().filter(|&&p| p < dark).count();
    n_bright >= 2 || n_dark >= 2
}

/// Full segment test: a wrap-around run of at least [`MIN_SEGMENT`]
/// consecutive circle pixels all brighter or all darker than the center by
/// the threshold.
fn segment_test(img: &GrayImage, x: u32, y: u32, center: u8, threshold: u8) -> bool {
    let bright = center.saturating_add(threshold);
    let dark = center.saturating_sub(threshold);

    let mut run_bright = 0u32;
    let mut run_dark = 0u32;
    for i in 0..CIRCLE.len() * 2 {
        let (dx, dy) = CIRCLE[i % CIRCLE.len()];
        let p = img.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32)[0];
        if p > bright {
            run_bright += 1;
            run_dark = 0;
        } else if p < dark {
            run_dark += 1;
            run_bright = 0;
        } else {
            run_bright = 0;
            run_dark = 0;
        }
        if run_bright >= MIN_SEGMENT || run_dark >= MIN_SEGMENT {
            return true;
        }
    }
    false
}

/// Corner response: summed absolute contrast between the center and the
/// circle pixels. Used only for ranking, so the scale is arbitrary.
fn response(img: &GrayImage, x: u32, y: u32, center: u8) -> f32 {
    CIRCLE
        .iter()
        .map(|&(dx, dy)| {
            let p = img.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32)[0];
            (p as i32 - center as i32).unsigned_abs() as f32
        })
        .sum()
}

/// Greedy distance-based non-maximum suppression.
///
/// Corners are visited strongest-first; a corner is kept when no stronger
/// kept corner lies within `radius` pixels of it. Grid buckets of cell
/// side `radius` limit the distance checks to the 3×3 neighboring cells.
/// At most `max_keypoints` survivors are returned, strongest first.
pub(super) fn suppress_non_maxima(
    mut corners: Vec<Keypoint>,
    radius: f32,
    max_keypoints: usize,
) -> Vec<Keypoint> {
    corners.sort_by(|a, b| {
        b.response
            .partial_cmp(&a.response)
            .unwrap_or(Ordering::Equal)
    });

    let r2 = radius * radius;
    let mut cells: HashMap<(i32, i32), Vec<(f32, f32)>> = HashMap::new();
    let mut kept = Vec::new();
    for corner in corners {
        let gx = (corner.x / radius) as i32;
        let gy = (corner.y / radius) as i32;
        let mut suppressed = false;
        'grid: for dy in -1..=1 {
            for dx in -1..=1 {
                let Some(neighbors) = cells.get(&(gx + dx, gy + dy)) else {
                    continue;
                };
                for &(nx, ny) in neighbors {
                    let (ex, ey) = (corner.x - nx, corner.y - ny);
                    if ex * ex + ey * ey < r2 {
                        suppressed = true;
                        break 'grid;
                    }
                }
            }
        }
        if !suppressed {
            cells.entry((gx, gy)).or_default().push((corner.x, corner.y));
            kept.push(corner);
            if kept.len() >= max_keypoints {
                break;
            }
        }
    }
    kept
}
