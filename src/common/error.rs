use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Malformed data URI: {0}")]
    MalformedDataUri(String),

    #[error("Invalid base64 payload: {0}")]
    InvalidBase64(String),

    #[error("Another session is already in progress")]
    SessionRejected,

    #[error("Failed to load face engine: {0}")]
    EnvironmentLoad(String),

    #[error("Failed to extract face template: {0}")]
    TemplateExtraction(String),

    #[error("Face is missing a recognition template: {0}")]
    MissingTemplate(String),

    #[error("{0}")]
    Engine(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Model error: {0}")]
    Model(#[from] ort::OrtError),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl BridgeError {
    pub fn missing_key(key: &str) -> Self {
        BridgeError::Schema(format!("missing required key `{}`", key))
    }

    pub fn wrong_type(key: &str, expected: &str) -> Self {
        BridgeError::Schema(format!("key `{}` must be {}", key, expected))
    }

    /// Stable tag carried next to the message in ERROR responses.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::Argument(_) => "ARGUMENT_ERROR",
            BridgeError::Schema(_) => "SCHEMA_ERROR",
            BridgeError::MalformedDataUri(_) => "MALFORMED_DATA_URI",
            BridgeError::InvalidBase64(_) => "INVALID_BASE64",
            BridgeError::SessionRejected => "SESSION_REJECTED",
            BridgeError::EnvironmentLoad(_) => "ENVIRONMENT_LOAD_ERROR",
            BridgeError::TemplateExtraction(_) => "TEMPLATE_EXTRACTION_ERROR",
            BridgeError::MissingTemplate(_) => "MISSING_TEMPLATE",
            BridgeError::Engine(_)
            | BridgeError::Model(_)
            | BridgeError::Image(_)
            | BridgeError::Storage(_)
            | BridgeError::Io(_)
            | BridgeError::Config(_)
            | BridgeError::Other(_) => "ENGINE_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(BridgeError::Argument("x".into()), "ARGUMENT_ERROR")]
    #[case(BridgeError::missing_key("x"), "SCHEMA_ERROR")]
    #[case(BridgeError::SessionRejected, "SESSION_REJECTED")]
    #[case(BridgeError::MissingTemplate("face1".into()), "MISSING_TEMPLATE")]
    #[case(BridgeError::Storage("disk".into()), "ENGINE_ERROR")]
    fn test_error_codes(#[case] error: BridgeError, #[case] code: &str) {
        assert_eq!(error.code(), code);
    }

    #[test]
    fn test_missing_key_names_the_key() {
        let message = BridgeError::missing_key("leftEye").to_string();
        assert!(message.contains("leftEye"));
    }

    #[test]
    fn test_engine_message_passes_through_verbatim() {
        let message = BridgeError::Engine("license expired".into()).to_string();
        assert_eq!(message, "license expired");
    }
}
