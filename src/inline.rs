//! Inline image data: images embedded as self-contained data-URL strings.
//!
//! Everything that crosses the message channel does so as an inline string,
//! so neither context ever holds a reference into the other's memory. These
//! helpers convert between raw bytes, `image` rasters, and the
//! `data:<mime>;base64,<payload>` form.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::RgbaImage;

use crate::error::{Error, Result};

/// Encode raw bytes as a data URL with the given MIME type.
pub fn encode(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, BASE64.encode(bytes))
}

/// Decode a data URL into its MIME type and raw bytes.
pub fn decode(data_url: &str) -> Result<(String, Vec<u8>)> {
    let rest = data_url
        .strip_prefix("data:")
        .ok_or_else(|| Error::InlineData("missing data: prefix".into()))?;
    let (mime, payload) = rest
        .split_once(";base64,")
        .ok_or_else(|| Error::InlineData("not base64-encoded".into()))?;
    let bytes = BASE64
        .decode(payload)
        .map_err(|e| Error::InlineData(format!("base64 decode failed: {}", e)))?;
    Ok((mime.to_string(), bytes))
}

/// Encode a raster as PNG bytes.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    image.write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)?;
    Ok(out)
}

/// Encode a raster as a PNG data URL.
pub fn encode_png_data_url(image: &RgbaImage) -> Result<String> {
    Ok(encode("image/png", &encode_png(image)?))
}

/// Decode an image data URL into an RGBA raster.
pub fn decode_image(data_url: &str) -> Result<RgbaImage> {
    let (_, bytes) = decode(data_url)?;
    Ok(image::load_from_memory(&bytes)?.to_rgba8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn round_trips_raw_bytes() {
        let url = encode("image/png", b"\x89PNG1234");
        assert!(url.starts_with("data:image/png;base64,"));
        let (mime, bytes) = decode(&url).unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(bytes, b"\x89PNG1234");
    }

    #[test]
    fn round_trips_a_raster() {
        let mut img = RgbaImage::new(3, 2);
        img.put_pixel(2, 1, Rgba([10, 20, 30, 255]));
        let url = encode_png_data_url(&img).unwrap();
        let back = decode_image(&url).unwrap();
        assert_eq!(back.dimensions(), (3, 2));
        assert_eq!(back.get_pixel(2, 1), &Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn rejects_non_data_urls() {
        assert!(decode("https://example.com/a.png").is_err());
        assert!(decode("data:image/png;base64,!!!").is_err());
    }
}
