pub mod dimensions;
pub mod preview;
pub mod pricing;
pub mod service;
pub mod validation;

pub mod errors {
    use lasercut_io::IoError;
    use thiserror::Error;

    /// 分析与报价流水线的错误分类。
    #[derive(Debug, Error)]
    pub enum QuoteError {
        #[error("uploaded file is empty")]
        EmptyUpload,
        #[error("unsupported file type: {0} (only .dxf is accepted)")]
        UnsupportedFileType(String),
        #[error("malformed drawing: {0}")]
        MalformedDrawing(String),
        #[error("invalid geometry: {0}")]
        InvalidGeometry(String),
        #[error("unsupported unit `{0}` (expected mm or cm)")]
        UnsupportedUnit(String),
        #[error("invalid thickness {0}: must be a finite value greater than zero")]
        InvalidThickness(f64),
        #[error("invalid quantity {0}: must be between 1 and 30")]
        InvalidQuantity(i64),
        #[error("unknown material `{0}`")]
        UnknownMaterial(String),
        #[error("finish `{finish}` is not available for material `{material}`")]
        UnknownFinish { material: String, finish: String },
        #[error("value out of range: {0}")]
        OutOfRange(String),
        #[error("preview generation failed: {0}")]
        PreviewGenerationFailed(String),
    }

    impl QuoteError {
        /// 由调用方输入导致的错误；其余为服务端错误。
        pub fn is_client_error(&self) -> bool {
            !matches!(
                self,
                QuoteError::OutOfRange(_) | QuoteError::PreviewGenerationFailed(_)
            )
        }
    }

    impl From<IoError> for QuoteError {
        fn from(err: IoError) -> Self {
            match err {
                IoError::MalformedDrawing(message) => QuoteError::MalformedDrawing(message),
                other => QuoteError::MalformedDrawing(other.to_string()),
            }
        }
    }
}

pub use errors::QuoteError;
