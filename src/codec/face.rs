//! Face wire object.
//!
//! ```json
//! { "data": "<base64>", "x": 10.0, "y": 12.0, "width": 80.0, "height": 96.0,
//!   "leftEye": {"x": 30.0, "y": 40.0}, "rightEye": {"x": 60.0, "y": 40.0},
//!   "yaw": 0.0, "pitch": 0.0, "roll": 0.0, "quality": 9.1,
//!   "faceTemplate": {"data": "<base64>", "version": 3} }
//! ```
//!
//! `faceTemplate` is only written when a template exists and may be absent on
//! decode. Every other key is mandatory.

use serde_json::{json, Map, Value};
use crate::codec::{as_object, bytes_field, encode_bytes, f64_field, field, i32_field, parse_json};
use crate::common::{BridgeError, Result};
use crate::core::{Face, FaceBounds, FaceTemplate, HeadAngle, Point};

pub const TEMPLATE_KEY: &str = "faceTemplate";

pub fn encode(face: &Face, template: Option<&FaceTemplate>) -> Value {
    let mut object = Map::new();
    object.insert("data".into(), encode_bytes(&face.data));
    object.insert("leftEye".into(), encode_point(&face.left_eye));
    object.insert("rightEye".into(), encode_point(&face.right_eye));
    object.insert("x".into(), json!(face.bounds.x));
    object.insert("y".into(), json!(face.bounds.y));
    object.insert("width".into(), json!(face.bounds.width));
    object.insert("height".into(), json!(face.bounds.height));
    object.insert("yaw".into(), json!(face.angle.yaw));
    object.insert("pitch".into(), json!(face.angle.pitch));
    object.insert("roll".into(), json!(face.angle.roll));
    object.insert("quality".into(), json!(face.quality));
    if let Some(template) = template {
        object.insert(TEMPLATE_KEY.into(), encode_template(template));
    }
    Value::Object(object)
}

pub fn decode(value: &Value) -> Result<(Face, Option<FaceTemplate>)> {
    let object = as_object(value, "face")?;

    let face = Face {
        bounds: FaceBounds {
            x: f64_field(object, "x")?,
            y: f64_field(object, "y")?,
            width: f64_field(object, "width")?,
            height: f64_field(object, "height")?,
        },
        left_eye: decode_point(object, "leftEye")?,
        right_eye: decode_point(object, "rightEye")?,
        angle: HeadAngle {
            yaw: f64_field(object, "yaw")?,
            pitch: f64_field(object, "pitch")?,
            roll: f64_field(object, "roll")?,
        },
        quality: f64_field(object, "quality")?,
        data: bytes_field(object, "data")?,
    };

    let template = match object.get(TEMPLATE_KEY) {
        None | Some(Value::Null) => None,
        Some(value) => Some(decode_template(value)?),
    };

    Ok((face, template))
}

/// Decodes a face object handed over as JSON text.
pub fn decode_str(text: &str) -> Result<(Face, Option<FaceTemplate>)> {
    decode(&parse_json(text, "face")?)
}

pub fn encode_template(template: &FaceTemplate) -> Value {
    json!({
        "data": encode_bytes(&template.data),
        "version": template.version,
    })
}

pub fn decode_template(value: &Value) -> Result<FaceTemplate> {
    let object = as_object(value, TEMPLATE_KEY)?;
    Ok(FaceTemplate {
        data: bytes_field(object, "data")?,
        version: i32_field(object, "version")?,
    })
}

pub fn decode_template_str(text: &str) -> Result<FaceTemplate> {
    decode_template(&parse_json(text, "face template")?)
}

fn encode_point(point: &Point) -> Value {
    json!({ "x": point.x, "y": point.y })
}

fn decode_point(object: &Map<String, Value>, key: &str) -> Result<Point> {
    let point = as_object(field(object, key)?, key)?;
    Ok(Point {
        x: f64_field(point, "x").map_err(|_| point_error(key, "x"))?,
        y: f64_field(point, "y").map_err(|_| point_error(key, "y"))?,
    })
}

fn point_error(key: &str, axis: &str) -> BridgeError {
    BridgeError::Schema(format!("key `{}.{}` must be present and a number", key, axis))
}
