//! Orchestration of one render call: fetch, decode, reproject, render, warp.

use crate::config::{ConfigError, PipelineConfig};
use crate::fetch::{FetchCache, FetchError, RetrieveOptions};
use crate::raster::{decode_band, DecodeError, Extent, RasterImage};
use crate::render::{warp, Canvas, ColorScaleCatalog, RenderError, Renderer, Surface};
use crate::srs::{reproject_extent, SrsError, SrsRegistry};
use bytes::Bytes;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Srs(#[from] SrsError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("decode/render task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Input of a single render call.
#[derive(Clone, Debug)]
pub struct RenderRequest {
    pub url: String,
    /// POST body; not part of the cache key
    pub body: Option<Bytes>,
    pub disable_cache: bool,
    /// Retry budget; the pipeline default applies when `None`
    pub retries: Option<u32>,
    /// Extent the caller wants the surface framed to, in `output_srs` units
    pub output_extent: Option<Extent>,
    pub output_srs: Option<u32>,
    pub band: usize,
    /// Color scale name; the pipeline default applies when `None`
    pub color_scale: Option<String>,
    pub domain: (f64, f64),
    pub clamp: bool,
}

impl RenderRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            body: None,
            disable_cache: false,
            retries: None,
            output_extent: None,
            output_srs: None,
            band: 0,
            color_scale: None,
            domain: (0.0, 255.0),
            clamp: true,
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn uncached(mut self) -> Self {
        self.disable_cache = true;
        self
    }

    pub fn with_output(mut self, extent: Extent, srs: Option<u32>) -> Self {
        self.output_extent = Some(extent);
        self.output_srs = srs;
        self
    }

    pub fn with_output_srs(mut self, srs: u32) -> Self {
        self.output_srs = Some(srs);
        self
    }

    pub fn with_band(mut self, band: usize) -> Self {
        self.band = band;
        self
    }

    pub fn with_color_scale(mut self, name: impl Into<String>) -> Self {
        self.color_scale = Some(name.into());
        self
    }

    pub fn with_domain(mut self, min: f64, max: f64) -> Self {
        self.domain = (min, max);
        self
    }

    pub fn with_clamp(mut self, clamp: bool) -> Self {
        self.clamp = clamp;
        self
    }
}

/// A rendered surface and the extent it covers.
#[derive(Clone, Debug)]
pub struct RenderedTile {
    pub surface: Surface,
    /// The requested output extent when one was given, else the (reprojected) image extent
    pub extent: Extent,
    pub srs: Option<u32>,
}

impl RenderedTile {
    pub fn encode_png(&self) -> Result<Vec<u8>, RenderError> {
        self.surface.encode_png()
    }
}

/// Decoded footprint of a raster without rendering it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Footprint {
    pub extent: Extent,
    pub srs: Option<u32>,
}

/// Fetches, decodes and renders raster tiles.
///
/// Components are injected so that several pipelines can share one cache or registry;
/// [`RasterPipeline::with_shared`] wires up the process-wide defaults.
pub struct RasterPipeline {
    fetch: FetchCache,
    srs: SrsRegistry,
    renderer: Arc<Mutex<Renderer>>,
    default_retries: u32,
    default_color_scale: String,
}

impl RasterPipeline {
    pub fn new(fetch: FetchCache, srs: SrsRegistry, renderer: Renderer) -> Self {
        Self {
            fetch,
            srs,
            renderer: Arc::new(Mutex::new(renderer)),
            default_retries: 0,
            default_color_scale: "gray".to_string(),
        }
    }

    /// Pipeline over the shared fetch cache, SRS registry and canvas.
    pub fn with_shared() -> Self {
        Self::new(
            FetchCache::shared().clone(),
            SrsRegistry::shared().clone(),
            Renderer::with_shared_canvas(),
        )
    }

    /// Build owned components from `config`. The drawing canvas is the shared one.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let fetcher = config.fetch.build_fetcher()?;
        let fetch = FetchCache::new(Arc::new(fetcher), config.fetch.capacity_bytes);
        let srs = SrsRegistry::new(config.srs.build_lookup());
        let renderer = Renderer::new(Canvas::shared(), Arc::new(ColorScaleCatalog::default()));

        tracing::info!(
            capacity_bytes = config.fetch.capacity_bytes,
            default_retries = config.fetch.default_retries,
            "raster pipeline configured"
        );

        Ok(Self::new(fetch, srs, renderer)
            .with_default_retries(config.fetch.default_retries)
            .with_default_color_scale(config.render.default_color_scale.clone()))
    }

    pub fn with_default_retries(mut self, retries: u32) -> Self {
        self.default_retries = retries;
        self
    }

    pub fn with_default_color_scale(mut self, name: impl Into<String>) -> Self {
        self.default_color_scale = name.into();
        self
    }

    pub fn fetch_cache(&self) -> &FetchCache {
        &self.fetch
    }

    pub fn srs_registry(&self) -> &SrsRegistry {
        &self.srs
    }

    fn retrieve_options(&self, disable_cache: bool, retries: Option<u32>) -> RetrieveOptions {
        RetrieveOptions {
            disable_cache,
            retries: retries.unwrap_or(self.default_retries),
        }
    }

    /// Render the raster behind `request.url`.
    ///
    /// When the image's SRS differs from `output_srs`, both codes are registered and the
    /// image extent is reprojected before warping to `output_extent`. An image without a
    /// recognised SRS cannot be reprojected and fails with [`SrsError::UnknownSource`].
    /// Decoding and colourisation run on the blocking pool.
    pub async fn render(&self, request: &RenderRequest) -> Result<RenderedTile, PipelineError> {
        let options = self.retrieve_options(request.disable_cache, request.retries);
        let bytes = self
            .fetch
            .retrieve(&request.url, request.body.clone(), options)
            .await?;

        let image = decode_blocking(bytes, request.band).await?;
        let mut extent = image.extent;
        let mut srs = image.srs;

        match (image.srs, request.output_srs) {
            (Some(from), Some(to)) if from != to => {
                self.srs.ensure_registered(from).await?;
                self.srs.ensure_registered(to).await?;
                extent = reproject_extent(&self.srs, extent, from, to)?;
                srs = Some(to);
                tracing::debug!(url = %request.url, from, to, "reprojected raster extent");
            }
            (None, Some(target)) => return Err(SrsError::UnknownSource { target }.into()),
            _ => {}
        }

        let renderer = self.renderer.clone();
        let color_scale = request
            .color_scale
            .clone()
            .unwrap_or_else(|| self.default_color_scale.clone());
        let (domain, clamp) = (request.domain, request.clamp);
        let surface = tokio::task::spawn_blocking(move || {
            let mut renderer = renderer.lock().unwrap_or_else(PoisonError::into_inner);
            renderer.set_color_scale(color_scale);
            renderer.set_domain(domain.0, domain.1);
            renderer.set_clamp(clamp);
            renderer.render_raster(&image)
        })
        .await??;

        let (surface, extent) = match request.output_extent {
            Some(output) => (warp(surface, &extent, &output), output),
            None => (surface, extent),
        };

        Ok(RenderedTile {
            surface,
            extent,
            srs,
        })
    }

    /// Fetch and decode only, returning the image extent and detected SRS.
    pub async fn footprint(
        &self,
        url: &str,
        body: Option<Bytes>,
        disable_cache: bool,
        retries: Option<u32>,
    ) -> Result<Footprint, PipelineError> {
        let options = self.retrieve_options(disable_cache, retries);
        let bytes = self.fetch.retrieve(url, body, options).await?;
        let image = decode_blocking(bytes, 0).await?;

        Ok(Footprint {
            extent: image.extent,
            srs: image.srs,
        })
    }
}

async fn decode_blocking(bytes: Bytes, band: usize) -> Result<RasterImage, PipelineError> {
    let image = tokio::task::spawn_blocking(move || decode_band(&bytes, band)).await??;
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::EntryState;
    use crate::test_util::{
        GeoTiffFixture, ScriptedFetcher, ScriptedLookup, WEB_MERCATOR_PROJ4, WGS84_PROJ4,
    };

    const CAPACITY: usize = 1 << 20;

    fn pipeline(fetcher: Arc<ScriptedFetcher>, lookup: Arc<ScriptedLookup>) -> RasterPipeline {
        RasterPipeline::new(
            FetchCache::new(fetcher, CAPACITY),
            SrsRegistry::new(lookup),
            Renderer::new(Canvas::new_shared(), Arc::new(ColorScaleCatalog::default())),
        )
    }

    fn lookup() -> Arc<ScriptedLookup> {
        Arc::new(ScriptedLookup::new(&[
            (4326, WGS84_PROJ4),
            (3857, WEB_MERCATOR_PROJ4),
        ]))
    }

    fn request_error(url: &str) -> FetchError {
        FetchError::Request {
            url: url.to_string(),
            message: "connection reset".to_string(),
        }
    }

    // ==================== End-to-End Tests ====================

    #[tokio::test]
    async fn test_retry_then_render_4x4() {
        let tiff = GeoTiffFixture::ramp_4x4().encode();
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            Err(request_error("/cov?x=1")),
            Ok(tiff.clone()),
        ]));
        let pipeline = pipeline(fetcher.clone(), lookup());

        let request = RenderRequest::new("/cov?x=1")
            .with_retries(1)
            .with_domain(0.0, 100.0)
            .with_clamp(true)
            .with_color_scale("gray");
        let tile = pipeline.render(&request).await.unwrap();

        assert_eq!(fetcher.calls(), 2, "one failed attempt plus one retry");
        assert_eq!(
            pipeline.fetch_cache().entry_state("/cov?x=1"),
            Some(EntryState::Ready(tiff.len()))
        );
        assert_eq!((tile.surface.width(), tile.surface.height()), (4, 4));
        assert!(tile.surface.is_transparent(0, 0), "no-data pixel should be transparent");
        // Bottom row holds 120..150, clamped to white; a flipped surface would have the
        // no-data pixel down here instead
        assert_eq!(tile.surface.pixel(0, 3), [255, 255, 255, 255]);
        assert_eq!(tile.surface.pixel(1, 0), [26, 26, 26, 255]);
        assert_eq!(tile.extent, Extent::new(0.0, 0.0, 4.0, 4.0));
        assert_eq!(tile.srs, Some(4326));
    }

    #[tokio::test]
    async fn test_second_render_served_from_cache() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok(GeoTiffFixture::ramp_4x4().encode())]));
        let pipeline = pipeline(fetcher.clone(), lookup());
        let request = RenderRequest::new("/cov?x=2").with_domain(0.0, 150.0);

        let first = pipeline.render(&request).await.unwrap();
        let second = pipeline.render(&request).await.unwrap();

        assert_eq!(fetcher.calls(), 1);
        assert_eq!(first.surface, second.surface);
    }

    #[tokio::test]
    async fn test_encoded_png_output() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok(GeoTiffFixture::ramp_4x4().encode())]));
        let tile = pipeline(fetcher, lookup())
            .render(&RenderRequest::new("/png"))
            .await
            .unwrap();

        let png = tile.encode_png().unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }

    // ==================== Error Propagation Tests ====================

    #[tokio::test]
    async fn test_decode_error_not_negatively_cached() {
        let garbage = Bytes::from_static(b"not a tiff");
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok(garbage.clone())]));
        let pipeline = pipeline(fetcher.clone(), lookup());

        let err = pipeline.render(&RenderRequest::new("/garbage")).await.unwrap_err();

        assert!(matches!(err, PipelineError::Decode(_)), "got {err:?}");
        assert_eq!(
            pipeline.fetch_cache().entry_state("/garbage"),
            Some(EntryState::Ready(garbage.len())),
            "fetched bytes keep their cache slot"
        );
    }

    #[tokio::test]
    async fn test_fetch_failure_is_negatively_cached() {
        let fetcher = Arc::new(ScriptedFetcher::always_failing());
        let pipeline = pipeline(fetcher.clone(), lookup());
        let request = RenderRequest::new("/down");

        let first = pipeline.render(&request).await.unwrap_err();
        let second = pipeline.render(&request).await.unwrap_err();

        assert!(matches!(first, PipelineError::Fetch(FetchError::Request { .. })));
        assert!(matches!(second, PipelineError::Fetch(FetchError::Failed { .. })));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_default_retries_apply() {
        let fetcher = Arc::new(ScriptedFetcher::always_failing());
        let pipeline = pipeline(fetcher.clone(), lookup()).with_default_retries(2);

        assert!(pipeline.render(&RenderRequest::new("/flaky")).await.is_err());
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn test_unknown_color_scale() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok(GeoTiffFixture::ramp_4x4().encode())]));
        let err = pipeline(fetcher, lookup())
            .render(&RenderRequest::new("/c").with_color_scale("sepia"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Render(RenderError::UnknownColorScale(_))));
    }

    // ==================== Reprojection & Warp Tests ====================

    #[tokio::test]
    async fn test_reprojects_to_output_srs() {
        let lookup = lookup();
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok(GeoTiffFixture::ramp_4x4().encode())]));
        let pipeline = pipeline(fetcher, lookup.clone());
        let request = RenderRequest::new("/merc").with_output_srs(3857);

        let tile = pipeline.render(&request).await.unwrap();
        let again = pipeline.render(&request).await.unwrap();

        assert_eq!(tile.srs, Some(3857));
        assert!((tile.extent.max_x - 445_277.96).abs() < 1.0, "got {:?}", tile.extent);
        assert_eq!(tile.extent, again.extent);
        assert_eq!(lookup.calls(), 2, "each code is looked up once");
    }

    #[tokio::test]
    async fn test_same_srs_skips_lookup() {
        let lookup = lookup();
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok(GeoTiffFixture::ramp_4x4().encode())]));
        let tile = pipeline(fetcher, lookup.clone())
            .render(&RenderRequest::new("/same").with_output_srs(4326))
            .await
            .unwrap();

        assert_eq!(tile.srs, Some(4326));
        assert_eq!(lookup.calls(), 0);
    }

    #[tokio::test]
    async fn test_resolution_error_propagates() {
        let lookup = Arc::new(ScriptedLookup::new(&[(4326, WGS84_PROJ4)]));
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok(GeoTiffFixture::ramp_4x4().encode())]));
        let pipeline = pipeline(fetcher, lookup.clone());

        let err = pipeline
            .render(&RenderRequest::new("/utm").with_output_srs(32633))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Srs(SrsError::Lookup { code: 32633, .. })));
    }

    #[tokio::test]
    async fn test_output_srs_without_source_srs_fails() {
        let mut fixture = GeoTiffFixture::ramp_4x4();
        fixture.epsg = None;
        let lookup = lookup();
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok(fixture.encode())]));

        let err = pipeline(fetcher, lookup.clone())
            .render(
                &RenderRequest::new("/custom")
                    .with_output(Extent::new(0.0, 0.0, 500_000.0, 500_000.0), Some(3857)),
            )
            .await
            .unwrap_err();

        assert!(
            matches!(err, PipelineError::Srs(SrsError::UnknownSource { target: 3857 })),
            "got {err:?}"
        );
        assert_eq!(lookup.calls(), 0);
    }

    #[tokio::test]
    async fn test_no_source_srs_renders_without_output_srs() {
        let mut fixture = GeoTiffFixture::ramp_4x4();
        fixture.epsg = None;
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok(fixture.encode())]));

        let tile = pipeline(fetcher, lookup())
            .render(&RenderRequest::new("/custom"))
            .await
            .unwrap();

        assert_eq!(tile.srs, None);
        assert_eq!(tile.extent, Extent::new(0.0, 0.0, 4.0, 4.0));
    }

    #[tokio::test]
    async fn test_warps_to_larger_output_extent() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok(GeoTiffFixture::ramp_4x4().encode())]));
        let output = Extent::new(0.0, 0.0, 8.0, 8.0);
        let tile = pipeline(fetcher, lookup())
            .render(
                &RenderRequest::new("/wide")
                    .with_domain(0.0, 150.0)
                    .with_output(output, None),
            )
            .await
            .unwrap();

        assert_eq!(tile.extent, output);
        assert_eq!((tile.surface.width(), tile.surface.height()), (4, 4));
        assert!(tile.surface.is_transparent(3, 0), "north-east is outside the image");
        assert!(!tile.surface.is_transparent(1, 3), "south-west holds the image");
    }

    // ==================== Footprint & Config Tests ====================

    #[tokio::test]
    async fn test_footprint() {
        let mut fixture = GeoTiffFixture::new(2, 2, vec![1.0; 4]);
        fixture.origin = (500_000.0, 4_600_000.0);
        fixture.scale = (30.0, 30.0);
        fixture.epsg = Some(32633);
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok(fixture.encode())]));

        let footprint = pipeline(fetcher, lookup())
            .footprint("/fp", None, false, None)
            .await
            .unwrap();

        assert_eq!(
            footprint,
            Footprint {
                extent: Extent::new(500_000.0, 4_599_940.0, 500_060.0, 4_600_000.0),
                srs: Some(32633),
            }
        );
    }

    #[tokio::test]
    async fn test_from_config() {
        let config = PipelineConfig::from_json_str(
            r#"{"fetch": {"capacity_bytes": 4096, "default_retries": 1}}"#,
        )
        .unwrap();

        let pipeline = RasterPipeline::from_config(&config).unwrap();

        assert_eq!(pipeline.fetch_cache().capacity_bytes(), 4096);
        assert_eq!(pipeline.default_retries, 1);
        assert!(pipeline.fetch_cache().is_empty());
    }
}
