use crate::common::{BridgeError, Result, Config};
use crate::engine::onnx::detector::optimization_level;
use ort::{Environment, Session, SessionBuilder, Value};
use std::sync::Arc;
use image::{DynamicImage, imageops::FilterType};
use ndarray::{Array4, CowArray};

pub type Embedding = Vec<f32>;

pub struct FaceRecognizer {
    session: Session,
    _environment: Arc<Environment>,
    input_size: u32,
    normalization_value: f32,
}

impl FaceRecognizer {
    pub fn new(config: &Config) -> Result<Self> {
        let environment = Arc::new(
            Environment::builder()
                .with_name("face_recognizer")
                .build()
                .map_err(|e| BridgeError::EnvironmentLoad(format!("Failed to create environment: {}", e)))?
        );

        let model_path = &config.models.recognizer_path;
        if !model_path.exists() {
            return Err(BridgeError::EnvironmentLoad(
                format!("Recognition model not found at: {:?}", model_path)
            ));
        }

        let session = SessionBuilder::new(&environment)?
            .with_optimization_level(optimization_level(config.performance.optimization_level))?
            .with_model_from_file(model_path)?;

        Ok(Self {
            session,
            _environment: environment,
            input_size: config.recognizer.input_size,
            normalization_value: config.recognizer.normalization_value,
        })
    }

    /// Embeds the face inside `region` (x, y, width, height in image pixels).
    pub fn get_embedding(&self, image: &DynamicImage, region: (u32, u32, u32, u32)) -> Result<Embedding> {
        let (x, y, width, height) = region;
        let face_img = image.crop_imm(x, y, width.max(1), height.max(1));
        let resized = face_img.resize_exact(self.input_size, self.input_size, FilterType::Triangle);

        let input_array = self.preprocess_face(&resized);
        let cow_array = CowArray::from(input_array.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;

        let outputs = self.session.run(vec![input_tensor])?;
        let first = outputs
            .first()
            .ok_or_else(|| BridgeError::TemplateExtraction("Recognizer produced no output".into()))?;

        let embedding = first.try_extract::<f32>()?.view().iter().copied().collect::<Embedding>();
        if embedding.is_empty() {
            return Err(BridgeError::TemplateExtraction("Recognizer produced an empty embedding".into()));
        }
        Ok(embedding)
    }

    fn preprocess_face(&self, img: &DynamicImage) -> Array4<f32> {
        // Single-channel model input
        let gray = img.to_luma8();
        let size = self.input_size as usize;
        let norm_val = self.normalization_value;
        let mut array = Array4::<f32>::zeros((1, 1, size, size));

        for y in 0..size {
            for x in 0..size {
                let pixel = gray.get_pixel(x as u32, y as u32);
                array[[0, 0, y, x]] = (pixel[0] as f32 - norm_val) / norm_val;
            }
        }

        array
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Little-endian f32 bytes, the template blob format of this engine.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|value| value.to_le_bytes()).collect()
}

pub fn embedding_from_bytes(bytes: &[u8]) -> Result<Embedding> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(BridgeError::Engine(format!(
            "Template data length {} is not a whole number of f32 values", bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cosine_similarity_bounds() {
        assert_relative_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_relative_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_relative_eq!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]), -1.0);
        assert_relative_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_embedding_bytes_round_trip() {
        let embedding = vec![0.25f32, -1.5, 3.0e-7, f32::MAX];
        let bytes = embedding_to_bytes(&embedding);
        assert_eq!(bytes.len(), 16);
        assert_eq!(embedding_from_bytes(&bytes).unwrap(), embedding);
    }

    #[test]
    fn test_embedding_from_ragged_bytes_fails() {
        assert!(embedding_from_bytes(&[1, 2, 3]).is_err());
        assert!(embedding_from_bytes(&[]).is_err());
    }
}
