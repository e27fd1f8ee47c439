//! Scripted collaborators and in-memory GeoTIFF fixtures shared by unit tests.

use crate::fetch::{FetchError, Fetcher};
use crate::srs::{DefinitionLookup, SrsError};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;
use tokio::sync::Semaphore;

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const MODEL_TRANSFORMATION: u16 = 34264;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

// ============================================================================
// Fetcher
// ============================================================================

/// Replays a fixed list of outcomes, one per call, and records every request.
pub(crate) struct ScriptedFetcher {
    outcomes: Mutex<VecDeque<Result<Bytes, FetchError>>>,
    always_fail: bool,
    calls: AtomicUsize,
    requests: Mutex<Vec<(String, Option<Bytes>)>>,
    gate: Option<Semaphore>,
}

impl ScriptedFetcher {
    pub(crate) fn new(outcomes: Vec<Result<Bytes, FetchError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            always_fail: false,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    pub(crate) fn always_failing() -> Self {
        Self {
            always_fail: true,
            ..Self::new(Vec::new())
        }
    }

    /// Hold every request until [`release`](Self::release) hands out a permit.
    pub(crate) fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    pub(crate) fn release(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<(String, Option<Bytes>)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str, body: Option<Bytes>) -> Result<Bytes, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push((url.to_string(), body));

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        if self.always_fail {
            return Err(FetchError::Request {
                url: url.to_string(),
                message: "scripted failure".to_string(),
            });
        }

        let next = self.outcomes.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Err(FetchError::Request {
                url: url.to_string(),
                message: "script exhausted".to_string(),
            })
        })
    }
}

// ============================================================================
// Definition lookup
// ============================================================================

/// Serves definitions from a map, counting lookups. Unknown codes fail.
pub(crate) struct ScriptedLookup {
    definitions: HashMap<u32, String>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedLookup {
    pub(crate) fn new(definitions: &[(u32, &str)]) -> Self {
        Self {
            definitions: definitions
                .iter()
                .map(|(code, def)| (*code, def.to_string()))
                .collect(),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DefinitionLookup for ScriptedLookup {
    async fn lookup(&self, code: u32) -> Result<String, SrsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.definitions
            .get(&code)
            .cloned()
            .ok_or_else(|| SrsError::Lookup {
                code,
                message: "not found".to_string(),
            })
    }
}

pub(crate) const WGS84_PROJ4: &str = "+proj=longlat +datum=WGS84 +no_defs";
pub(crate) const WEB_MERCATOR_PROJ4: &str =
    "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +nadgrids=@null +no_defs";

// ============================================================================
// GeoTIFF fixtures
// ============================================================================

/// Builder for small single-band float GeoTIFFs.
pub(crate) struct GeoTiffFixture {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<f32>,
    /// Upper-left corner in model space
    pub origin: (f64, f64),
    /// Stored ModelPixelScale; a positive Y scale means north-up
    pub scale: (f64, f64),
    /// Written instead of scale + tiepoint when set
    pub transformation: Option<[f64; 16]>,
    pub epsg: Option<u16>,
    pub nodata: Option<&'static str>,
    pub georeferenced: bool,
}

impl GeoTiffFixture {
    pub(crate) fn new(width: u32, height: u32, pixels: Vec<f32>) -> Self {
        Self {
            width,
            height,
            pixels,
            origin: (0.0, height as f64),
            scale: (1.0, 1.0),
            transformation: None,
            epsg: Some(4326),
            nodata: None,
            georeferenced: true,
        }
    }

    /// 4x4 ramp 0, 10, ... 150 with the first pixel set to -9999 (the no-data value).
    pub(crate) fn ramp_4x4() -> Self {
        let mut pixels: Vec<f32> = (0..16).map(|i| i as f32 * 10.0).collect();
        pixels[0] = -9999.0;
        let mut fixture = Self::new(4, 4, pixels);
        fixture.nodata = Some("-9999");
        fixture
    }

    pub(crate) fn encode(&self) -> Bytes {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut encoder = TiffEncoder::new(&mut buffer).unwrap();
            let mut image = encoder
                .new_image::<colortype::Gray32Float>(self.width, self.height)
                .unwrap();

            if self.georeferenced {
                let dir = image.encoder();
                if let Some(matrix) = &self.transformation {
                    dir.write_tag(Tag::Unknown(MODEL_TRANSFORMATION), &matrix[..])
                        .unwrap();
                } else {
                    let scale = [self.scale.0, self.scale.1, 0.0];
                    dir.write_tag(Tag::Unknown(MODEL_PIXEL_SCALE), &scale[..])
                        .unwrap();
                    let tiepoint = [0.0, 0.0, 0.0, self.origin.0, self.origin.1, 0.0];
                    dir.write_tag(Tag::Unknown(MODEL_TIEPOINT), &tiepoint[..])
                        .unwrap();
                }
                if let Some(epsg) = self.epsg {
                    let geographic = (4000..5000).contains(&epsg);
                    let (model_type, cs_key) = if geographic { (2, 2048) } else { (1, 3072) };
                    let keys: [u16; 12] = [1, 1, 0, 2, 1024, 0, 1, model_type, cs_key, 0, 1, epsg];
                    dir.write_tag(Tag::Unknown(GEO_KEY_DIRECTORY), &keys[..])
                        .unwrap();
                }
            }
            if let Some(nodata) = self.nodata {
                image
                    .encoder()
                    .write_tag(Tag::Unknown(GDAL_NODATA), nodata)
                    .unwrap();
            }

            image.write_data(&self.pixels).unwrap();
        }
        Bytes::from(buffer.into_inner())
    }
}

/// Three-sample (chunky) 16-bit TIFF without georeferencing: sample `b` of pixel `i`
/// holds `1000 * b + i`.
pub(crate) fn three_band_u16(width: u32, height: u32) -> Bytes {
    let mut buffer = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut buffer).unwrap();
        let image = encoder
            .new_image::<colortype::RGB16>(width, height)
            .unwrap();
        let data: Vec<u16> = (0..(width * height) as u16)
            .flat_map(|i| [i, 1000 + i, 2000 + i])
            .collect();
        image.write_data(&data).unwrap();
    }
    Bytes::from(buffer.into_inner())
}
