//! Extent-based crop/rescale of rendered surfaces.

use super::Surface;
use crate::raster::Extent;
use image::RgbaImage;
use rayon::prelude::*;

/// Maximum difference in extent width/height, in source units, treated as equal.
pub const WARP_TOLERANCE: f64 = 0.001;

/// Redraw `surface`, which covers `source`, so that it frames `output` instead.
///
/// When both extents have the same size (within [`WARP_TOLERANCE`]) the surface is
/// returned as is. Otherwise the image is scaled by `source / output` and translated by
/// the offset between the extents' top-left corners, with nearest-neighbour sampling.
/// The result keeps the source's pixel dimensions; uncovered pixels are transparent, and
/// an output extent disjoint from `source` yields a fully transparent surface.
pub fn warp(surface: Surface, source: &Extent, output: &Extent) -> Surface {
    let same_width = (output.width() - source.width()).abs() <= WARP_TOLERANCE;
    let same_height = (output.height() - source.height()).abs() <= WARP_TOLERANCE;
    if same_width && same_height {
        return surface;
    }

    if output.width() <= 0.0 || output.height() <= 0.0 || source.width() <= 0.0 || source.height() <= 0.0 {
        tracing::warn!(?source, ?output, "degenerate extent, skipping warp");
        return surface;
    }

    let width = surface.width();
    let height = surface.height();

    if !source.intersects(output) {
        tracing::debug!(?source, ?output, "output extent misses the image");
        return Surface::transparent(width, height);
    }

    let (w, h) = (width as f64, height as f64);

    let scale_x = source.width() / output.width();
    let scale_y = source.height() / output.height();
    // Row 0 is the top edge, so the vertical offset is measured from max_y downwards
    let offset_x = (source.min_x - output.min_x) / output.width() * w;
    let offset_y = (output.max_y - source.max_y) / output.height() * h;

    tracing::debug!(scale_x, scale_y, offset_x, offset_y, "warping surface");

    let src = surface.as_raw();
    let row_bytes = width as usize * 4;
    let mut image = RgbaImage::new(width, height);
    let buffer: &mut [u8] = &mut image;

    buffer.par_chunks_mut(row_bytes).enumerate().for_each(|(y, row)| {
        let v = (y as f64 + 0.5 - offset_y) / scale_y;
        if v < 0.0 || v >= h {
            return;
        }
        let src_row = v as usize * row_bytes;

        for (x, px) in row.chunks_exact_mut(4).enumerate() {
            let u = (x as f64 + 0.5 - offset_x) / scale_x;
            if u < 0.0 || u >= w {
                continue;
            }
            let at = src_row + u as usize * 4;
            px.copy_from_slice(&src[at..at + 4]);
        }
    });

    Surface::from_image(image)
}
