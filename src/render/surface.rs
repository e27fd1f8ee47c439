use super::RenderError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{ImageBuffer, Rgba, RgbaImage};
use std::io::Cursor;

/// An RGBA drawing surface produced by the renderer.
#[derive(Clone, Debug, PartialEq)]
pub struct Surface {
    image: RgbaImage,
}

impl Surface {
    /// Fully transparent surface.
    pub fn transparent(width: u32, height: u32) -> Self {
        Self {
            image: ImageBuffer::new(width, height),
        }
    }

    pub fn from_image(image: RgbaImage) -> Self {
        Self { image }
    }

    /// Wrap a raw RGBA buffer; `None` if its length does not match the dimensions.
    pub fn from_raw(width: u32, height: u32, rgba: Vec<u8>) -> Option<Self> {
        ImageBuffer::from_raw(width, height, rgba).map(Self::from_image)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.image.get_pixel(x, y).0
    }

    pub fn is_transparent(&self, x: u32, y: u32) -> bool {
        self.pixel(x, y)[3] == 0
    }

    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    /// Vertical mirror: row `y` becomes row `height - 1 - y`.
    pub fn flipped_vertically(&self) -> Surface {
        Surface::from_image(image::imageops::flip_vertical(&self.image))
    }

    pub fn encode_png(&self) -> Result<Vec<u8>, RenderError> {
        let mut bytes: Vec<u8> = Vec::new();
        let mut cursor = Cursor::new(&mut bytes);

        self.image.write_to(&mut cursor, image::ImageFormat::Png)?;

        Ok(bytes)
    }

    /// PNG encoded as a `data:` URL.
    pub fn to_data_url(&self) -> Result<String, RenderError> {
        let png = self.encode_png()?;
        Ok(format!("data:image/png;base64,{}", STANDARD.encode(png)))
    }

    pub(crate) fn put_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        self.image.put_pixel(x, y, Rgba(rgba));
    }
}
