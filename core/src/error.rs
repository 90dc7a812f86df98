use thiserror::Error;

/// cimg error types
#[derive(Error, Debug)]
pub enum CimgError {
    /// Kubefile missing, unreadable, or structurally invalid
    #[error("Invalid Kubefile: {0}")]
    InvalidKubefile(String),

    /// Inherited plus new layers exceed the maximum depth
    #[error("Layer depth exceeded: {count} layers (max {max})")]
    LayerDepthExceeded { count: usize, max: usize },

    /// Instruction kind that cannot appear at this position
    #[error("Unsupported instruction: {0}")]
    UnsupportedInstruction(String),

    /// Image reference could not be parsed
    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    /// Digest string is not `sha256:<hex>`
    #[error("Invalid digest: {0}")]
    InvalidDigest(String),

    /// Base image is not in the image store
    #[error("Base image not found: {0}")]
    BaseImageNotFound(String),

    /// Base image could not be made available locally
    #[error("Failed to pull base image {reference}: {message}")]
    PullFailed { reference: String, message: String },

    /// A COPY or RUN instruction failed
    #[error("Build instruction failed: {instruction}: {message}")]
    InstructionFailed { instruction: String, message: String },

    /// Layer store error
    #[error("Layer store error: {0}")]
    LayerStoreError(String),

    /// Image store error
    #[error("Image store error: {0}")]
    ImageStoreError(String),

    /// Build cache error
    #[error("Cache error: {0}")]
    CacheError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for CimgError {
    fn from(err: serde_json::Error) -> Self {
        CimgError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for CimgError {
    fn from(err: serde_yaml::Error) -> Self {
        CimgError::SerializationError(err.to_string())
    }
}

/// Result type alias for cimg operations
pub type Result<T> = std::result::Result<T, CimgError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_depth_exceeded_display() {
        let error = CimgError::LayerDepthExceeded {
            count: 129,
            max: 128,
        };
        assert_eq!(
            error.to_string(),
            "Layer depth exceeded: 129 layers (max 128)"
        );
    }

    #[test]
    fn test_pull_failed_display() {
        let error = CimgError::PullFailed {
            reference: "kubernetes:v1.22".to_string(),
            message: "not found".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Failed to pull base image kubernetes:v1.22: not found"
        );
    }

    #[test]
    fn test_instruction_failed_display() {
        let error = CimgError::InstructionFailed {
            instruction: "RUN false".to_string(),
            message: "exit 1".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Build instruction failed: RUN false: exit 1"
        );
    }

    #[test]
    fn test_invalid_kubefile_display() {
        let error = CimgError::InvalidKubefile("first line must be FROM".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid Kubefile: first line must be FROM"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: CimgError = io_error.into();
        assert!(matches!(err, CimgError::IoError(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope");
        let err: CimgError = result.unwrap_err().into();
        assert!(matches!(err, CimgError::SerializationError(_)));
    }

    #[test]
    fn test_serde_yaml_error_conversion() {
        let result: std::result::Result<serde_yaml::Value, _> =
            serde_yaml::from_str("invalid: yaml: content:");
        let err: CimgError = result.unwrap_err().into();
        assert!(matches!(err, CimgError::SerializationError(_)));
    }

    #[test]
    fn test_other_error_display() {
        let error = CimgError::Other("something broke".to_string());
        assert_eq!(error.to_string(), "something broke");
    }
}
