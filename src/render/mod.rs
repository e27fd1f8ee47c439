//! Color-mapped rendering of decoded rasters and extent warping.

mod color_scale;
mod renderer;
mod surface;
pub mod warp;

pub use color_scale::{ColorScale, ColorScaleCatalog, Rgba};
pub use renderer::{Canvas, RenderState, Renderer, SharedCanvas};
pub use surface::Surface;
pub use warp::{warp, WARP_TOLERANCE};

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("unknown color scale '{0}'")]
    UnknownColorScale(String),

    #[error("expected {expected} pixels for a {width}x{height} raster, got {actual}")]
    PixelCount {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("invalid domain [{min}, {max}]")]
    InvalidDomain { min: f64, max: f64 },

    #[error("cannot create a {width}x{height} drawing surface")]
    Resource { width: u32, height: u32 },

    #[error("failed to encode surface: {0}")]
    Encode(#[from] image::ImageError),
}
