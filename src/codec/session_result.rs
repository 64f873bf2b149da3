//! Session result wire object: `{"error": "..."}` or
//! `{"attachments": [{"recognizableFace": {...}, "bearing": "LEFT", "image": "data:image/jpeg;base64,..."}]}`.

use serde_json::{json, Map, Value};
use crate::codec::{as_object, data_uri, face, field, str_field};
use crate::common::config::ImageConfig;
use crate::common::{BridgeError, Result};
use crate::core::{Attachment, Bearing, ImageScratch, SessionResult};

/// Target format for captured frames embedded in encoded results.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageEncoding {
    pub mime: &'static str,
    pub quality: f32,
}

impl Default for ImageEncoding {
    fn default() -> Self {
        Self {
            mime: data_uri::JPEG_MIME,
            quality: data_uri::DEFAULT_QUALITY,
        }
    }
}

impl From<&ImageConfig> for ImageEncoding {
    fn from(config: &ImageConfig) -> Self {
        Self {
            mime: data_uri::JPEG_MIME,
            quality: config.jpeg_quality,
        }
    }
}

pub fn encode(result: &SessionResult, encoding: &ImageEncoding) -> Result<Value> {
    match result {
        SessionResult::Error(message) => Ok(json!({ "error": message })),
        SessionResult::Attachments(attachments) => {
            let encoded = attachments
                .iter()
                .map(|attachment| encode_attachment(attachment, encoding))
                .collect::<Result<Vec<_>>>()?;
            Ok(json!({ "attachments": encoded }))
        }
    }
}

fn encode_attachment(attachment: &Attachment, encoding: &ImageEncoding) -> Result<Value> {
    let mut object = Map::new();
    object.insert(
        "recognizableFace".into(),
        face::encode(&attachment.face, attachment.template.as_ref()),
    );
    object.insert("bearing".into(), Value::String(attachment.bearing.as_str().into()));
    if let Some(ref image) = attachment.image {
        let uri = data_uri::encode(&image.bytes()?, encoding.mime, encoding.quality)?;
        object.insert("image".into(), Value::String(uri));
    }
    Ok(Value::Object(object))
}

/// Decodes a result object. Images are written into `scratch`; when any
/// attachment fails, the files already written are released before returning.
pub fn decode(value: &Value, scratch: &ImageScratch) -> Result<SessionResult> {
    let object = as_object(value, "session result")?;

    if object.contains_key("error") {
        return Ok(SessionResult::Error(str_field(object, "error")?.to_string()));
    }

    let items = field(object, "attachments")?
        .as_array()
        .ok_or_else(|| BridgeError::wrong_type("attachments", "an array"))?;
    if items.is_empty() {
        return Err(BridgeError::Schema("`attachments` must not be empty".into()));
    }

    let mut attachments = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let attachment = decode_attachment(item, scratch)
            .map_err(|e| BridgeError::Schema(format!("attachment {}: {}", index, e)))?;
        attachments.push(attachment);
    }

    Ok(SessionResult::Attachments(attachments))
}

pub fn decode_str(text: &str, scratch: &ImageScratch) -> Result<SessionResult> {
    decode(&crate::codec::parse_json(text, "session result")?, scratch)
}

fn decode_attachment(value: &Value, scratch: &ImageScratch) -> Result<Attachment> {
    let object = as_object(value, "attachment")?;
    let (face, template) = face::decode(field(object, "recognizableFace")?)?;
    let bearing: Bearing = str_field(object, "bearing")?.parse()?;

    let image = match object.get("image") {
        None | Some(Value::Null) => None,
        Some(Value::String(uri)) => {
            let parsed = data_uri::decode_uri(uri)?;
            Some(scratch.store(&parsed.bytes, parsed.extension())?)
        }
        Some(_) => return Err(BridgeError::wrong_type("image", "a data URI string")),
    };

    Ok(Attachment { face, template, bearing, image })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Face, FaceBounds, FaceTemplate, FrameImage, HeadAngle, Point};
    use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn face(seed: f64) -> Face {
        Face {
            bounds: FaceBounds { x: seed, y: seed + 1.0, width: 50.0, height: 60.0 },
            left_eye: Point { x: seed + 10.0, y: seed + 20.0 },
            right_eye: Point { x: seed + 30.0, y: seed + 20.0 },
            angle: HeadAngle { yaw: seed, pitch: 0.0, roll: -seed },
            quality: 7.5,
            data: vec![seed as u8; 4],
        }
    }

    fn png_frame() -> FrameImage {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([200, 10, 10])))
            .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
            .unwrap();
        FrameImage::from_bytes(bytes)
    }

    fn sample_result() -> SessionResult {
        SessionResult::Attachments(vec![
            Attachment {
                face: face(1.0),
                template: Some(FaceTemplate { data: vec![1, 2, 3], version: 2 }),
                bearing: Bearing::Straight,
                image: Some(png_frame()),
            },
            Attachment {
                face: face(2.0),
                template: None,
                bearing: Bearing::LeftUp,
                image: None,
            },
        ])
    }

    #[test]
    fn test_error_variant_encodes_only_error() {
        let encoded = encode(&SessionResult::failed("timed out"), &ImageEncoding::default()).unwrap();
        assert_eq!(encoded, json!({ "error": "timed out" }));
    }

    #[test]
    fn test_image_key_omitted_without_frame() {
        let encoded = encode(&sample_result(), &ImageEncoding::default()).unwrap();
        let attachments = encoded["attachments"].as_array().unwrap();
        assert!(attachments[0]["image"].as_str().unwrap().starts_with("data:image/jpeg;base64,"));
        assert!(attachments[1].get("image").is_none());
    }

    #[test]
    fn test_round_trip_preserves_shape() {
        let scratch = ImageScratch::new().unwrap();
        let original = sample_result();
        let encoded = encode(&original, &ImageEncoding::default()).unwrap();
        let decoded = decode(&encoded, &scratch).unwrap();

        let before = original.attachments();
        let after = decoded.attachments();
        assert_eq!(after.len(), before.len());
        for (a, b) in before.iter().zip(after) {
            assert_eq!(a.bearing, b.bearing);
            assert_eq!(a.template.is_some(), b.template.is_some());
            assert_eq!(a.face, b.face);
            assert_eq!(a.image.is_some(), b.image.is_some());
        }

        let stored = after[0].image.as_ref().unwrap();
        assert!(stored.path().unwrap().starts_with(scratch.path()));
        assert!(image::load_from_memory(&stored.bytes().unwrap()).is_ok());
    }

    #[test]
    fn test_error_short_circuits_attachments() {
        let scratch = ImageScratch::new().unwrap();
        let value = json!({ "error": "cancelled by user", "attachments": "garbage" });
        let decoded = decode(&value, &scratch).unwrap();
        assert_eq!(decoded.error(), Some("cancelled by user"));
    }

    #[test]
    fn test_unknown_bearing_fails_decode() {
        let scratch = ImageScratch::new().unwrap();
        let mut encoded = encode(&sample_result(), &ImageEncoding::default()).unwrap();
        encoded["attachments"][1]["bearing"] = json!("BACKWARDS");
        let err = decode(&encoded, &scratch).unwrap_err();
        assert!(matches!(err, BridgeError::Schema(_)));
    }

    #[test]
    fn test_bad_image_fails_whole_decode_and_cleans_up() {
        let scratch = ImageScratch::new().unwrap();
        let mut encoded = encode(&sample_result(), &ImageEncoding::default()).unwrap();
        encoded["attachments"][1]["image"] = json!("data:text/plain;base64,AAAA");

        let err = decode(&encoded, &scratch).unwrap_err();
        assert!(matches!(err, BridgeError::Schema(_)));
        assert!(err.to_string().contains("attachment 1"));
        // The first attachment's image was written, then released.
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_empty_attachments_rejected() {
        let scratch = ImageScratch::new().unwrap();
        let err = decode(&json!({ "attachments": [] }), &scratch).unwrap_err();
        assert!(matches!(err, BridgeError::Schema(_)));
    }

    #[test]
    fn test_missing_both_keys_rejected() {
        let scratch = ImageScratch::new().unwrap();
        let err = decode(&json!({}), &scratch).unwrap_err();
        assert!(err.to_string().contains("attachments"));
    }

    #[test]
    fn test_decoded_files_released_with_result() {
        let scratch = ImageScratch::new().unwrap();
        let encoded = encode(&sample_result(), &ImageEncoding::default()).unwrap();
        let decoded = decode_str(&encoded.to_string(), &scratch).unwrap();
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 1);
        drop(decoded);
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_path_like_subtype_stays_in_scratch() {
        let scratch = ImageScratch::new().unwrap();
        let mut encoded = encode(&sample_result(), &ImageEncoding::default()).unwrap();
        let uri = encoded["attachments"][0]["image"].as_str().unwrap().to_string();
        let payload = uri.split_once(',').unwrap().1;
        encoded["attachments"][0]["image"] = json!(format!("data:image/../x;base64,{}", payload));

        let decoded = decode(&encoded, &scratch).unwrap();
        let stored = decoded.attachments()[0].image.as_ref().unwrap();
        let path = stored.path().unwrap();
        assert_eq!(path.parent(), Some(scratch.path()));
        assert_eq!(path.extension().unwrap(), "bin");
    }
}
