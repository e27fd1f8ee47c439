//! Stateful color-mapping renderer.
//!
//! A [`Renderer`] holds the render configuration (color scale, domain, clamp, no-data,
//! flip) and draws through a [`Canvas`], a drawing resource that may be shared between
//! renderers. The full configuration is re-applied to the canvas on every render, so a
//! previous image's settings never leak into the next one.

use super::color_scale::{ColorScale, ColorScaleCatalog, Rgba};
use super::{RenderError, Surface};
use crate::raster::RasterImage;
use rayon::prelude::*;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

const TRANSPARENT: Rgba = [0, 0, 0, 0];

/// Largest width or height a canvas will allocate.
const MAX_SURFACE_DIMENSION: u32 = 16384;

/// Tolerance when comparing samples against the no-data value
const NO_DATA_EPSILON: f64 = 1e-10;

/// Canvas shared between renderers. Renders through one canvas are serialized by the lock.
pub type SharedCanvas = Arc<Mutex<Canvas>>;

#[derive(Clone, Debug, PartialEq)]
pub struct RenderState {
    pub color_scale: String,
    /// `(min, max)` mapped onto the color scale's [0, 1] range
    pub domain: (f64, f64),
    pub clamp: bool,
    pub no_data: Option<f64>,
    pub flip: bool,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            color_scale: "gray".to_string(),
            domain: (0.0, 255.0),
            clamp: true,
            no_data: None,
            flip: false,
        }
    }
}

/// Configuration as applied to the drawing resource.
#[derive(Clone, Debug)]
struct CanvasConfig {
    scale: ColorScale,
    domain: (f64, f64),
    clamp: bool,
    no_data: Option<f64>,
}

impl CanvasConfig {
    fn color_for(&self, value: f64) -> Rgba {
        if !value.is_finite() {
            return TRANSPARENT;
        }
        if self
            .no_data
            .is_some_and(|nd| value == nd || (value - nd).abs() < NO_DATA_EPSILON)
        {
            return TRANSPARENT;
        }

        let (min, max) = self.domain;
        let value = if self.clamp {
            value.clamp(min, max)
        } else if value < min || value > max {
            return self.scale.out_of_range();
        } else {
            value
        };

        let range = max - min;
        let t = if range > 0.0 { (value - min) / range } else { 0.0 };
        self.scale.sample(t)
    }
}

/// The drawing resource: a primary surface plus a secondary one for mirrored output.
///
/// Buffers are kept between renders and only reallocated when dimensions change.
#[derive(Debug)]
pub struct Canvas {
    primary: Surface,
    mirror: Surface,
    config: Option<CanvasConfig>,
}

impl Default for Canvas {
    fn default() -> Self {
        Self::new()
    }
}

impl Canvas {
    pub fn new() -> Self {
        Self {
            primary: Surface::transparent(0, 0),
            mirror: Surface::transparent(0, 0),
            config: None,
        }
    }

    /// A fresh canvas wrapped for sharing.
    pub fn new_shared() -> SharedCanvas {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Process-wide default canvas, created on first use.
    pub fn shared() -> SharedCanvas {
        static SHARED: OnceLock<SharedCanvas> = OnceLock::new();
        SHARED.get_or_init(Canvas::new_shared).clone()
    }

    /// Replace the whole configuration at once.
    fn configure(&mut self, config: CanvasConfig) {
        self.config = Some(config);
    }

    fn ensure_size(surface: &mut Surface, width: u32, height: u32) -> Result<(), RenderError> {
        if width == 0 || height == 0 || width > MAX_SURFACE_DIMENSION || height > MAX_SURFACE_DIMENSION {
            return Err(RenderError::Resource { width, height });
        }
        if surface.width() != width || surface.height() != height {
            *surface = Surface::transparent(width, height);
        }
        Ok(())
    }

    fn draw(&mut self, pixels: &[f64], width: u32, height: u32) -> Result<&Surface, RenderError> {
        Self::ensure_size(&mut self.primary, width, height)?;
        let Some(config) = &self.config else {
            return Err(RenderError::Resource { width, height });
        };

        let row_len = width as usize;
        let mut image = std::mem::replace(&mut self.primary, Surface::transparent(0, 0)).into_image();
        {
            let buffer: &mut [u8] = &mut image;
            buffer
                .par_chunks_mut(row_len * 4)
                .zip(pixels.par_chunks(row_len))
                .for_each(|(row, values)| {
                    for (px, &value) in row.chunks_exact_mut(4).zip(values) {
                        px.copy_from_slice(&config.color_for(value));
                    }
                });
        }
        self.primary = Surface::from_image(image);

        Ok(&self.primary)
    }

    /// Copy the primary surface into the secondary one, mirrored vertically.
    fn draw_mirrored(&mut self) -> Result<&Surface, RenderError> {
        let (width, height) = (self.primary.width(), self.primary.height());
        Self::ensure_size(&mut self.mirror, width, height)?;

        let row_bytes = width as usize * 4;
        let source = self.primary.as_raw();
        let mut image = std::mem::replace(&mut self.mirror, Surface::transparent(0, 0)).into_image();
        {
            let buffer: &mut [u8] = &mut image;
            buffer
                .par_chunks_mut(row_bytes)
                .enumerate()
                .for_each(|(y, row)| {
                    let src_y = height as usize - 1 - y;
                    row.copy_from_slice(&source[src_y * row_bytes..(src_y + 1) * row_bytes]);
                });
        }
        self.mirror = Surface::from_image(image);

        Ok(&self.mirror)
    }
}

/// Color-mapping render state machine.
///
/// Starts unconfigured; after the first successful [`render`](Renderer::render) it is
/// configured. The same instance is meant to be reused across many images.
pub struct Renderer {
    state: RenderState,
    catalog: Arc<ColorScaleCatalog>,
    canvas: SharedCanvas,
    renders: u64,
}

impl Renderer {
    pub fn new(canvas: SharedCanvas, catalog: Arc<ColorScaleCatalog>) -> Self {
        Self {
            state: RenderState::default(),
            catalog,
            canvas,
            renders: 0,
        }
    }

    /// Renderer drawing through the process-wide canvas with the built-in color scales.
    pub fn with_shared_canvas() -> Self {
        Self::new(Canvas::shared(), Arc::new(ColorScaleCatalog::default()))
    }

    pub fn state(&self) -> &RenderState {
        &self.state
    }

    pub fn is_configured(&self) -> bool {
        self.renders > 0
    }

    pub fn set_state(&mut self, state: RenderState) {
        self.state = state;
    }

    pub fn set_color_scale(&mut self, name: impl Into<String>) {
        self.state.color_scale = name.into();
    }

    pub fn set_domain(&mut self, min: f64, max: f64) {
        self.state.domain = (min, max);
    }

    pub fn set_clamp(&mut self, clamp: bool) {
        self.state.clamp = clamp;
    }

    pub fn set_no_data(&mut self, no_data: Option<f64>) {
        self.state.no_data = no_data;
    }

    pub fn set_flip(&mut self, flip: bool) {
        self.state.flip = flip;
    }

    /// Render a decoded raster, taking no-data and flip from the image.
    pub fn render_raster(&mut self, image: &RasterImage) -> Result<Surface, RenderError> {
        self.set_no_data(image.no_data);
        self.set_flip(image.needs_flip());
        self.render(&image.pixels, image.width, image.height)
    }

    /// Draw `pixels` (row-major, `width * height` samples) with the current state.
    pub fn render(&mut self, pixels: &[f64], width: u32, height: u32) -> Result<Surface, RenderError> {
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(RenderError::PixelCount {
                width,
                height,
                expected,
                actual: pixels.len(),
            });
        }

        let (min, max) = self.state.domain;
        if !(min.is_finite() && max.is_finite() && min <= max) {
            return Err(RenderError::InvalidDomain { min, max });
        }

        let scale = self
            .catalog
            .get(&self.state.color_scale)
            .cloned()
            .ok_or_else(|| RenderError::UnknownColorScale(self.state.color_scale.clone()))?;

        let mut canvas = self.canvas.lock().unwrap_or_else(PoisonError::into_inner);
        canvas.configure(CanvasConfig {
            scale,
            domain: self.state.domain,
            clamp: self.state.clamp,
            no_data: self.state.no_data,
        });
        canvas.draw(pixels, width, height)?;

        let surface = if self.state.flip {
            canvas.draw_mirrored()?.clone()
        } else {
            canvas.primary.clone()
        };
        drop(canvas);

        self.renders += 1;
        tracing::debug!(
            width,
            height,
            color_scale = %self.state.color_scale,
            flip = self.state.flip,
            "rendered raster"
        );

        Ok(surface)
    }
}
