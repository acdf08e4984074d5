use crate::common::{AuthError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, GenericImageView, ImageOutputFormat};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;

pub const PNG_MEDIA_TYPE: &str = "image/png";

/// An encoded still frame on its way to the face service.
///
/// Lives only between capture (or upload) and the request that carries it.
#[derive(Clone, PartialEq, Eq)]
pub struct CapturedImage {
    bytes: Vec<u8>,
    media_type: String,
}

impl CapturedImage {
    pub fn from_dynamic(image: &DynamicImage) -> Result<Self> {
        let mut bytes = Vec::new();
        image.write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)?;
        Ok(Self { bytes, media_type: PNG_MEDIA_TYPE.to_string() })
    }

    /// Accepts a user-supplied file. Anything that is not a decodable image is
    /// rejected before it reaches the face service.
    pub fn from_upload(bytes: Vec<u8>, content_type: Option<&str>) -> Result<Self> {
        if let Some(content_type) = content_type {
            if !content_type.starts_with("image/") {
                return Err(AuthError::InvalidInput("Please upload an image file".into()));
            }
        }

        let format = image::guess_format(&bytes)
            .map_err(|_| AuthError::InvalidInput("Please upload an image file".into()))?;
        image::load_from_memory_with_format(&bytes, format)
            .map_err(|_| AuthError::InvalidInput("Please upload an image file".into()))?;

        let media_type = content_type
            .map(str::to_string)
            .unwrap_or_else(|| format!("image/{}", format.extensions_str().first().unwrap_or(&"png")));

        Ok(Self { bytes, media_type })
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        // Browsers send data URLs; only the payload after the comma is base64.
        let payload = match encoded.split_once("base64,") {
            Some((_, data)) => data,
            None => encoded,
        };
        let bytes = STANDARD
            .decode(payload.trim())
            .map_err(|e| AuthError::InvalidInput(format!("Invalid base64 image: {}", e)))?;
        Self::from_upload(bytes, None)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    pub fn decode(&self) -> Result<DynamicImage> {
        Ok(image::load_from_memory(&self.bytes)?)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn dimensions(&self) -> Result<(u32, u32)> {
        Ok(self.decode()?.dimensions())
    }
}

// Image bytes never end up in logs.
impl fmt::Debug for CapturedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturedImage")
            .field("media_type", &self.media_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDetectionResult {
    pub detected: bool,
    pub bounding_box: Option<BoundingBox>,
    pub confidence: Option<f32>,
}

impl FaceDetectionResult {
    pub fn none() -> Self {
        Self { detected: false, bounding_box: None, confidence: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn sample() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(16, 12, |x, y| Rgb([x as u8 * 10, y as u8 * 10, 0])))
    }

    #[test]
    fn encodes_png_and_decodes_back() {
        let captured = CapturedImage::from_dynamic(&sample()).unwrap();
        assert_eq!(captured.media_type(), PNG_MEDIA_TYPE);
        assert_eq!(captured.dimensions().unwrap(), (16, 12));
    }

    #[test]
    fn upload_rejects_non_images() {
        let err = CapturedImage::from_upload(b"hello".to_vec(), Some("text/plain")).unwrap_err();
        assert!(matches!(err, AuthError::InvalidInput(_)));

        let err = CapturedImage::from_upload(b"not really a png".to_vec(), Some("image/png")).unwrap_err();
        assert!(matches!(err, AuthError::InvalidInput(_)));
    }

    #[test]
    fn accepts_data_urls() {
        let captured = CapturedImage::from_dynamic(&sample()).unwrap();
        let data_url = format!("data:image/png;base64,{}", captured.to_base64());
        let parsed = CapturedImage::from_base64(&data_url).unwrap();
        assert_eq!(parsed.bytes(), captured.bytes());
    }

    #[test]
    fn debug_hides_bytes() {
        let captured = CapturedImage::from_dynamic(&sample()).unwrap();
        let rendered = format!("{:?}", captured);
        assert!(rendered.contains("len"));
        assert!(!rendered.contains("bytes"));
    }
}
