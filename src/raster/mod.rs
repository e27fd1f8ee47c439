//! Decoded raster model and the GeoTIFF decoder.

mod decoder;

pub use decoder::{decode, decode_band, DecodeError};

use serde::{Deserialize, Serialize};

/// Geographic bounding box `[min_x, min_y, max_x, max_y]` in the units of its SRS.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Extent {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Envelope of two corners given in any order.
    pub fn from_corners(a: (f64, f64), b: (f64, f64)) -> Self {
        Self::new(a.0.min(b.0), a.1.min(b.1), a.0.max(b.0), a.1.max(b.1))
    }

    pub fn from_array(bounds: [f64; 4]) -> Self {
        Self::new(bounds[0], bounds[1], bounds[2], bounds[3])
    }

    pub fn to_array(self) -> [f64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Check if two extents intersect (edges touching counts)
    pub fn intersects(&self, other: &Extent) -> bool {
        !(self.max_x < other.min_x
            || self.min_x > other.max_x
            || self.max_y < other.min_y
            || self.min_y > other.max_y)
    }
}

impl From<[f64; 4]> for Extent {
    fn from(bounds: [f64; 4]) -> Self {
        Self::from_array(bounds)
    }
}

/// One decoded band of a GeoTIFF.
#[derive(Clone, Debug)]
pub struct RasterImage {
    pub width: u32,
    pub height: u32,
    /// Row-major samples of the selected band
    pub pixels: Vec<f64>,
    pub no_data: Option<f64>,
    pub extent: Extent,
    /// Pixel size per axis, signed. North-up rasters have a negative Y resolution.
    pub resolution: (f64, f64),
    /// EPSG code from the GeoKey directory; `None` for user-defined or missing SRS
    pub srs: Option<u32>,
    /// False when the file carries no model transformation; the extent is then in pixels
    pub is_georeferenced: bool,
}

impl RasterImage {
    /// Rows run south-to-north and must be mirrored before compositing.
    pub fn needs_flip(&self) -> bool {
        self.resolution.1 > 0.0
    }
}
