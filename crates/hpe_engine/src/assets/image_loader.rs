//! Image loading for material textures

use super::AssetError;
use std::path::Path;

/// Decoded RGBA8 image ready for GPU upload
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    /// Raw RGBA pixel data
    pub data: Vec<u8>,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
}

impl ImageData {
    /// Load an image from a file path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, AssetError> {
        let path = path.as_ref();
        log::debug!("Loading image from: {:?}", path);

        let img = image::open(path).map_err(|e| AssetError::LoadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        log::info!("Loaded image {}x{} from {:?}", width, height, path);

        Ok(Self {
            data: rgba.into_raw(),
            width,
            height,
        })
    }

    /// Create a solid color image
    pub fn solid_color(width: u32, height: u32, color: [u8; 4]) -> Self {
        let pixel_count = (width * height) as usize;
        let data = color.iter().copied().cycle().take(pixel_count * 4).collect();
        Self { data, width, height }
    }

    /// Get the size of the image data in bytes
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }
}
