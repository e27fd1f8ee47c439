//! Raster retrieval, caching and rendering for geo-referenced GeoTIFF tiles.
//!
//! A render call flows through five components:
//!
//! - [`fetch`]: byte retrieval with single-flight coalescing, bounded retries and a
//!   byte-bounded LRU cache that also remembers terminal failures
//! - [`raster`]: GeoTIFF decoding into a [`RasterImage`] (pixels, no-data, extent, SRS, flip)
//! - [`srs`]: memoized spatial-reference registration and extent-corner reprojection
//! - [`render`]: the stateful color-mapping [`Renderer`] and the extent [`warp`](render::warp) stage
//! - [`pipeline`]: the orchestrating [`RasterPipeline`]
//!
//! Every shared cache is an owned, injectable object. The `shared()` constructors lazily
//! build process-wide defaults for call sites that do not care about isolation.

pub mod config;
pub mod fetch;
pub mod pipeline;
pub mod raster;
pub mod render;
pub mod srs;

#[cfg(test)]
pub(crate) mod test_util;

pub use config::{ConfigError, PipelineConfig};
pub use fetch::{FetchCache, FetchError, Fetcher, HttpFetcher, RetrieveOptions};
pub use pipeline::{Footprint, PipelineError, RasterPipeline, RenderRequest, RenderedTile};
pub use raster::{decode, decode_band, DecodeError, Extent, RasterImage};
pub use render::{Canvas, ColorScale, ColorScaleCatalog, RenderError, RenderState, Renderer, Surface};
pub use srs::{DefinitionLookup, SrsError, SrsRegistry};

/// Library version, taken from the git tag at build time.
pub fn version() -> &'static str {
    env!("GEORENDER_VERSION")
}
