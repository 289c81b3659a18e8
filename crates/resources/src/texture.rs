//! Texture decoding into tightly packed RGBA8.

use std::path::Path;

use tracing::info;

use crate::error::{ResourceError, ResourceResult};

#[derive(Debug, Clone)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureData {
    pub fn from_rgba8(image: image::RgbaImage) -> ResourceResult<Self> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(ResourceError::InvalidData(format!(
                "texture has zero size ({width}x{height})"
            )));
        }
        Ok(Self {
            width,
            height,
            pixels: image.into_raw(),
        })
    }
}

/// Decode any supported image format and expand it to RGBA8.
pub fn load_texture(path: &Path) -> ResourceResult<TextureData> {
    let decoded = image::open(path).map_err(|source| ResourceError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    let texture = TextureData::from_rgba8(decoded.to_rgba8())?;

    info!(
        "Loaded texture '{}': {}x{}",
        path.display(),
        texture.width,
        texture.height
    );
    Ok(texture)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rgba8_keeps_layout() {
        let image = image::RgbaImage::from_pixel(4, 2, image::Rgba([1, 2, 3, 4]));
        let texture = TextureData::from_rgba8(image).unwrap();
        assert_eq!((texture.width, texture.height), (4, 2));
        assert_eq!(texture.pixels.len(), 4 * 2 * 4);
        assert_eq!(&texture.pixels[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_empty_image_is_rejected() {
        let image = image::RgbaImage::new(0, 0);
        assert!(matches!(
            TextureData::from_rgba8(image),
            Err(ResourceError::InvalidData(_))
        ));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = load_texture(Path::new("does/not/exist.png")).unwrap_err();
        assert!(err.to_string().contains("does/not/exist.png"));
    }
}
