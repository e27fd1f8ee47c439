//! GeoTIFF decoding into [`RasterImage`].
//!
//! Georeferencing is read from `ModelTransformation` when present, otherwise from
//! `ModelPixelScale` + `ModelTiepoint`. The stored pixel scale is positive for north-up
//! rasters, so the effective vertical resolution is its negation; a positive effective
//! resolution means rows run south-to-north.

use super::{Extent, RasterImage};
use std::io::Cursor;
use tiff::decoder::ifd::Value;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const MODEL_TRANSFORMATION: u16 = 34264;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;
/// GeoTIFF sentinel for a user-defined coordinate system
const USER_DEFINED: u16 = 32767;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid TIFF data: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("raster has no pixels")]
    Empty,

    #[error("{samples} samples cannot be split into bands of {width}x{height} pixels")]
    SampleCount {
        samples: usize,
        width: u32,
        height: u32,
    },

    #[error("band {band} requested but raster has {bands} band(s)")]
    BandOutOfRange { band: usize, bands: usize },

    #[error("invalid georeferencing: {0}")]
    Georeference(String),

    #[error("unsupported sample format")]
    UnsupportedSampleFormat,
}

struct Georeference {
    extent: Extent,
    resolution: (f64, f64),
    is_georeferenced: bool,
}

/// Decode band 0 of a GeoTIFF.
pub fn decode(bytes: &[u8]) -> Result<RasterImage, DecodeError> {
    decode_band(bytes, 0)
}

/// Decode one band of a GeoTIFF. Multi-sample images are expected in chunky layout.
pub fn decode_band(bytes: &[u8], band: usize) -> Result<RasterImage, DecodeError> {
    let mut decoder = Decoder::new(Cursor::new(bytes))?;
    let (width, height) = decoder.dimensions()?;

    let pixel_count = width as usize * height as usize;
    if pixel_count == 0 {
        return Err(DecodeError::Empty);
    }

    let no_data = read_no_data(&mut decoder)?;
    let georef = read_georeference(&mut decoder, width, height)?;
    let srs = read_srs_code(&mut decoder)?;

    let samples = samples_to_f64(decoder.read_image()?)?;
    if samples.len() % pixel_count != 0 {
        return Err(DecodeError::SampleCount {
            samples: samples.len(),
            width,
            height,
        });
    }

    let bands = samples.len() / pixel_count;
    if band >= bands {
        return Err(DecodeError::BandOutOfRange { band, bands });
    }

    let pixels = if bands == 1 {
        samples
    } else {
        samples.into_iter().skip(band).step_by(bands).collect()
    };

    tracing::debug!(
        width,
        height,
        bands,
        band,
        srs = ?srs,
        no_data = ?no_data,
        "decoded raster"
    );

    Ok(RasterImage {
        width,
        height,
        pixels,
        no_data,
        extent: georef.extent,
        resolution: georef.resolution,
        srs,
        is_georeferenced: georef.is_georeferenced,
    })
}

fn find_tag(
    decoder: &mut Decoder<Cursor<&[u8]>>,
    code: u16,
) -> Result<Option<Value>, DecodeError> {
    Ok(decoder.find_tag(Tag::from_u16_exhaustive(code))?)
}

fn find_f64_vec(
    decoder: &mut Decoder<Cursor<&[u8]>>,
    code: u16,
) -> Result<Option<Vec<f64>>, DecodeError> {
    match find_tag(decoder, code)? {
        Some(value) => Ok(Some(value.into_f64_vec()?)),
        None => Ok(None),
    }
}

/// GDAL stores the no-data value as an ASCII string.
fn read_no_data(decoder: &mut Decoder<Cursor<&[u8]>>) -> Result<Option<f64>, DecodeError> {
    let text = match find_tag(decoder, GDAL_NODATA)? {
        Some(Value::Ascii(text)) => text,
        Some(Value::List(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Byte(b) => Some(b as char),
                _ => None,
            })
            .collect(),
        Some(other) => return Ok(other.into_f64().ok()),
        None => return Ok(None),
    };

    let trimmed = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    match trimmed.parse::<f64>() {
        Ok(value) => Ok(Some(value)),
        Err(_) => {
            tracing::warn!(no_data = trimmed, "ignoring unparseable no-data value");
            Ok(None)
        }
    }
}

fn read_georeference(
    decoder: &mut Decoder<Cursor<&[u8]>>,
    width: u32,
    height: u32,
) -> Result<Georeference, DecodeError> {
    let (origin, resolution) = if let Some(t) = find_f64_vec(decoder, MODEL_TRANSFORMATION)? {
        if t.len() < 16 {
            return Err(DecodeError::Georeference(format!(
                "ModelTransformation has {} values, expected 16",
                t.len()
            )));
        }
        ((t[3], t[7]), (t[0], t[5]))
    } else {
        let scale = find_f64_vec(decoder, MODEL_PIXEL_SCALE)?;
        let tiepoint = find_f64_vec(decoder, MODEL_TIEPOINT)?;

        match (scale, tiepoint) {
            (Some(scale), Some(tie)) => {
                if scale.len() < 2 || tie.len() < 6 {
                    return Err(DecodeError::Georeference(
                        "truncated ModelPixelScale or ModelTiepoint".to_string(),
                    ));
                }
                let resolution = (scale[0], -scale[1]);
                let origin = (
                    tie[3] - tie[0] * resolution.0,
                    tie[4] - tie[1] * resolution.1,
                );
                (origin, resolution)
            }
            _ => {
                // Not georeferenced: fall back to pixel space
                return Ok(Georeference {
                    extent: Extent::new(0.0, 0.0, width as f64, height as f64),
                    resolution: (1.0, -1.0),
                    is_georeferenced: false,
                });
            }
        }
    };

    let far_corner = (
        origin.0 + resolution.0 * width as f64,
        origin.1 + resolution.1 * height as f64,
    );

    Ok(Georeference {
        extent: Extent::from_corners(origin, far_corner),
        resolution,
        is_georeferenced: true,
    })
}

/// EPSG code from the GeoKey directory, preferring the projected CS over the geographic one.
fn read_srs_code(decoder: &mut Decoder<Cursor<&[u8]>>) -> Result<Option<u32>, DecodeError> {
    let keys = match find_tag(decoder, GEO_KEY_DIRECTORY)? {
        Some(value) => value.into_u16_vec()?,
        None => return Ok(None),
    };

    Ok(parse_geo_keys(&keys))
}

fn parse_geo_keys(keys: &[u16]) -> Option<u32> {
    if keys.len() < 4 {
        return None;
    }

    let mut projected = None;
    let mut geographic = None;

    // Header: version, revision, minor revision, key count; then 4 shorts per key
    for entry in keys[4..].chunks_exact(4).take(keys[3] as usize) {
        let (key, location, value) = (entry[0], entry[1], entry[3]);
        // Location 0 means the value is stored inline
        if location != 0 {
            continue;
        }
        match key {
            PROJECTED_CS_TYPE_GEO_KEY => projected = Some(value),
            GEOGRAPHIC_TYPE_GEO_KEY => geographic = Some(value),
            _ => {}
        }
    }

    projected
        .or(geographic)
        .filter(|&code| code != 0 && code != USER_DEFINED)
        .map(u32::from)
}

fn samples_to_f64(result: DecodingResult) -> Result<Vec<f64>, DecodeError> {
    #[allow(unreachable_patterns)]
    let samples = match result {
        DecodingResult::U8(values) => values.into_iter().map(f64::from).collect(),
        DecodingResult::U16(values) => values.into_iter().map(f64::from).collect(),
        DecodingResult::U32(values) => values.into_iter().map(f64::from).collect(),
        DecodingResult::U64(values) => values.into_iter().map(|v| v as f64).collect(),
        DecodingResult::I8(values) => values.into_iter().map(f64::from).collect(),
        DecodingResult::I16(values) => values.into_iter().map(f64::from).collect(),
        DecodingResult::I32(values) => values.into_iter().map(f64::from).collect(),
        DecodingResult::I64(values) => values.into_iter().map(|v| v as f64).collect(),
        DecodingResult::F32(values) => values.into_iter().map(f64::from).collect(),
        DecodingResult::F64(values) => values,
        _ => return Err(DecodeError::UnsupportedSampleFormat),
    };
    Ok(samples)
}
