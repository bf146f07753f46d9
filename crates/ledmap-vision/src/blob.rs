use std::collections::VecDeque;

use ledmap_core::{GrayImageView, Point2D};
use log::warn;
use nalgebra::Point2;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// A connected bright region of a thresholded frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Blob {
    /// Pixel count.
    pub area: usize,
    /// Sum of the intensities of every pixel in the blob.
    pub brightness: u64,
    /// Centre of mass of the blob's pixels, in pixel coordinates.
    pub centroid: Point2<f64>,
    /// Blob pixels with at least one 4-neighbour outside the blob.
    pub contour: Vec<Point2<f32>>,
}

const NEIGHBOURS_8: [(i64, i64); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

const NEIGHBOURS_4: [(i64, i64); 4] = [(0, -1), (-1, 0), (1, 0), (0, 1)];

/// Extract the 8-connected blobs of pixels brighter than `threshold`.
///
/// Blobs are returned in raster order of their first pixel.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "trace", skip(image), fields(width = image.width, height = image.height))
)]
pub fn find_blobs(image: &GrayImageView<'_>, threshold: u8) -> Vec<Blob> {
    let (w, h) = (image.width, image.height);
    if image.data.len() < w * h {
        warn!(
            "frame buffer has {} bytes, expected {}, ignoring it",
            image.data.len(),
            w * h
        );
        return Vec::new();
    }
    let lit = |x: i64, y: i64| image.get(x, y) > threshold;

    let mut visited = vec![false; w * h];
    let mut blobs = Vec::new();
    let mut queue = VecDeque::new();

    for start in 0..w * h {
        if visited[start] || image.data[start] <= threshold {
            continue;
        }
        visited[start] = true;
        queue.push_back(start);

        let mut area = 0usize;
        let mut brightness = 0u64;
        let (mut sum_x, mut sum_y) = (0.0f64, 0.0f64);
        let mut contour = Vec::new();

        while let Some(idx) = queue.pop_front() {
            let (x, y) = ((idx % w) as i64, (idx / w) as i64);
            area += 1;
            brightness += image.data[idx] as u64;
            sum_x += x as f64;
            sum_y += y as f64;

            if NEIGHBOURS_4.iter().any(|&(dx, dy)| !lit(x + dx, y + dy)) {
                contour.push(Point2::new(x as f32, y as f32));
            }

            for &(dx, dy) in &NEIGHBOURS_8 {
                let (nx, ny) = (x + dx, y + dy);
                if !lit(nx, ny) {
                    continue;
                }
                let n = ny as usize * w + nx as usize;
                if !visited[n] {
                    visited[n] = true;
                    queue.push_back(n);
                }
            }
        }

        blobs.push(Blob {
            area,
            brightness,
            centroid: Point2::new(sum_x / area as f64, sum_y / area as f64),
            contour,
        });
    }

    blobs
}

/// Map a pixel position to the square normalized space.
///
/// `u = x / width`, `v = (y + (width - height) / 2) / width`.
pub fn normalize(x: f64, y: f64, width: usize, height: usize) -> (f64, f64) {
    let w = width as f64;
    let v_offset = (w - height as f64) / 2.0;
    (x / w, (y + v_offset) / w)
}

/// Locate the LED in a frame: the blob with the largest integrated brightness.
///
/// Returns `None` when nothing exceeds `threshold`, or when the winning centroid
/// sits exactly at the pixel origin, which some sensors report for a broken frame.
pub fn find_led_in_image(image: &GrayImageView<'_>, threshold: u8) -> Option<Point2D> {
    if image.width == 0 {
        return None;
    }
    let blob = find_blobs(image, threshold)
        .into_iter()
        .max_by_key(|blob| blob.brightness)?;

    if blob.centroid == Point2::origin() {
        return None;
    }

    let (u, v) = normalize(blob.centroid.x, blob.centroid.y, image.width, image.height);
    Some(Point2D::with_contour(u, v, blob.contour))
}
