//! Spatial reference resolution.
//!
//! [`SrsRegistry`] memoizes coordinate definitions (proj4 strings) per EPSG code, pulling
//! unknown codes from a [`DefinitionLookup`]. [`reproject_extent`] uses the registered
//! definitions to move an extent between systems by transforming its corners.

mod lookup;
mod registry;
mod transform;

pub use lookup::{BuiltinLookup, HttpLookup, DEFAULT_LOOKUP_TEMPLATE};
pub use registry::SrsRegistry;
pub use transform::{is_geographic, reproject_extent};

use async_trait::async_trait;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SrsError {
    #[error("EPSG:{0} is not in the definition database")]
    UnknownCode(u32),

    #[error("lookup of EPSG:{code} failed: {message}")]
    Lookup { code: u32, message: String },

    #[error("EPSG:{0} is not registered")]
    NotRegistered(u32),

    #[error("invalid definition for EPSG:{code}: {message}")]
    InvalidDefinition { code: u32, message: String },

    #[error("transform from EPSG:{from} to EPSG:{to} failed: {message}")]
    Transform { from: u32, to: u32, message: String },

    #[error("raster has no recognised spatial reference, cannot reproject to EPSG:{target}")]
    UnknownSource { target: u32 },

    #[error("lookup of EPSG:{code} was aborted")]
    Aborted { code: u32 },
}

/// Source of coordinate definitions keyed by EPSG code.
#[async_trait]
pub trait DefinitionLookup: Send + Sync {
    async fn lookup(&self, code: u32) -> Result<String, SrsError>;
}
