use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage, ImageOutputFormat};
use std::io::Cursor;
use crate::common::{BridgeError, Result};

pub const JPEG_MIME: &str = "image/jpeg";
pub const PNG_MIME: &str = "image/png";
pub const DEFAULT_QUALITY: f32 = 0.8;

/// A parsed `data:image/...;base64,...` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl DataUri {
    /// File extension matching the declared mime subtype, or `bin` when the
    /// subtype is not safe to put in a file name.
    pub fn extension(&self) -> &str {
        let subtype = match self.mime.as_str() {
            JPEG_MIME => return "jpg",
            other => other.trim_start_matches("image/"),
        };
        let safe = !subtype.is_empty()
            && subtype
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '+' | '.' | '-'));
        if safe && !subtype.starts_with('.') {
            subtype
        } else {
            "bin"
        }
    }
}

pub fn decode(uri: &str) -> Result<Vec<u8>> {
    decode_uri(uri).map(|parsed| parsed.bytes)
}

pub fn decode_uri(uri: &str) -> Result<DataUri> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| BridgeError::MalformedDataUri("missing `data:` scheme".into()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| BridgeError::MalformedDataUri("missing `,` before payload".into()))?;

    let mut params = header.split(';');
    let mime = params.next().unwrap_or_default().trim().to_ascii_lowercase();
    let subtype = mime
        .strip_prefix("image/")
        .ok_or_else(|| BridgeError::MalformedDataUri(format!("`{}` is not an image mime type", mime)))?;
    if subtype.is_empty() {
        return Err(BridgeError::MalformedDataUri("empty image subtype".into()));
    }
    // `base64` has to be the last parameter
    if header.rsplit(';').next() != Some("base64") || !header.contains(';') {
        return Err(BridgeError::MalformedDataUri("payload is not declared as base64".into()));
    }
    if payload.is_empty() {
        return Err(BridgeError::MalformedDataUri("empty payload".into()));
    }

    let bytes = BASE64
        .decode(payload)
        .map_err(|e| BridgeError::InvalidBase64(e.to_string()))?;

    Ok(DataUri { mime, bytes })
}

/// Re-encodes raw image bytes as `mime` at `quality` (0..=1) and wraps them in a
/// data URI.
pub fn encode(bytes: &[u8], mime: &str, quality: f32) -> Result<String> {
    let image = image::load_from_memory(bytes)?;
    encode_image(&image, mime, quality)
}

pub fn encode_image(image: &DynamicImage, mime: &str, quality: f32) -> Result<String> {
    let mut buffer = Vec::new();
    match mime {
        JPEG_MIME => {
            let rgb = image.to_rgb8();
            let mut encoder = JpegEncoder::new_with_quality(&mut buffer, jpeg_quality(quality));
            encoder.encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)?;
        }
        PNG_MIME => {
            image.write_to(&mut Cursor::new(&mut buffer), ImageOutputFormat::Png)?;
        }
        other => {
            return Err(BridgeError::MalformedDataUri(format!(
                "unsupported target mime type `{}`",
                other
            )));
        }
    }
    Ok(format!("data:{};base64,{}", mime, BASE64.encode(&buffer)))
}

fn jpeg_quality(quality: f32) -> u8 {
    (quality.clamp(0.0, 1.0) * 100.0).round().clamp(1.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use rstest::rstest;

    fn sample_png() -> Vec<u8> {
        let image = RgbImage::from_fn(8, 6, |x, y| Rgb([(x * 30) as u8, (y * 40) as u8, 128]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_decode_returns_payload_bytes() {
        let uri = format!("data:image/png;base64,{}", BASE64.encode(b"hello"));
        assert_eq!(decode(&uri).unwrap(), b"hello".to_vec());
    }

    #[test]
    fn test_decode_keeps_mime_and_tolerates_parameters() {
        let uri = format!("data:image/webp;name=x;base64,{}", BASE64.encode([1u8, 2, 3]));
        let parsed = decode_uri(&uri).unwrap();
        assert_eq!(parsed.mime, "image/webp");
        assert_eq!(parsed.extension(), "webp");
    }

    #[rstest]
    #[case("image/jpeg", "jpg")]
    #[case("image/png", "png")]
    #[case("image/svg+xml", "svg+xml")]
    #[case("image/../../etc", "bin")]
    #[case("image/a/b", "bin")]
    #[case("image/x y", "bin")]
    fn test_extension_is_file_name_safe(#[case] mime: &str, #[case] expected: &str) {
        let parsed = DataUri { mime: mime.into(), bytes: Vec::new() };
        assert_eq!(parsed.extension(), expected);
    }

    #[rstest]
    #[case("image/png;base64,AAAA")]
    #[case("data:text/plain;base64,AAAA")]
    #[case("data:application/octet-stream;base64,AAAA")]
    #[case("data:image/;base64,AAAA")]
    #[case("data:image/png,AAAA")]
    #[case("data:image/png;base64")]
    #[case("data:image/png;base64,")]
    #[case("data:image/png;base64;charset=utf-8,AAAA")]
    fn test_malformed_uris(#[case] uri: &str) {
        let err = decode(uri).unwrap_err();
        assert!(matches!(err, BridgeError::MalformedDataUri(_)), "{uri}: {err}");
    }

    #[rstest]
    #[case("data:image/png;base64,not base64!")]
    #[case("data:image/jpeg;base64,AAA")]
    fn test_invalid_base64(#[case] uri: &str) {
        let err = decode(uri).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidBase64(_)));
    }

    #[test]
    fn test_encode_jpeg_produces_decodable_image() {
        let uri = encode(&sample_png(), JPEG_MIME, DEFAULT_QUALITY).unwrap();
        assert!(uri.starts_with("data:image/jpeg;base64,"));

        let jpeg = decode(&uri).unwrap();
        let image = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((image.width(), image.height()), (8, 6));
    }

    #[test]
    fn test_encode_is_deterministic() {
        let png = sample_png();
        let a = encode(&png, JPEG_MIME, 0.8).unwrap();
        let b = encode(&png, JPEG_MIME, 0.8).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_encode_png_target() {
        let uri = encode(&sample_png(), PNG_MIME, 1.0).unwrap();
        let parsed = decode_uri(&uri).unwrap();
        assert_eq!(parsed.mime, PNG_MIME);
    }

    #[test]
    fn test_encode_rejects_unsupported_mime() {
        let err = encode(&sample_png(), "image/tiff", 0.8).unwrap_err();
        assert!(matches!(err, BridgeError::MalformedDataUri(_)));
    }

    #[test]
    fn test_encode_rejects_non_image_bytes() {
        let err = encode(b"definitely not an image", JPEG_MIME, 0.8).unwrap_err();
        assert!(matches!(err, BridgeError::Image(_)));
    }

    #[rstest]
    #[case(0.8, 80)]
    #[case(0.0, 1)]
    #[case(1.5, 100)]
    fn test_jpeg_quality_mapping(#[case] quality: f32, #[case] expected: u8) {
        assert_eq!(jpeg_quality(quality), expected);
    }
}
