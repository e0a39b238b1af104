/// Error types for the transcode service.
///
/// Mirrors the shape of the reference codebase's `AppError`: a single flat
/// enum with a `Result<T>` alias, mapped to transport-level errors at the
/// RPC boundary rather than carried through the core.
use thiserror::Error;
use tonic::Status;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<AppError> for Status {
    fn from(err: AppError) -> Self {
        match err {
            AppError::ValidationError(msg) => Status::invalid_argument(msg),
            AppError::NotFound(msg) => Status::not_found(msg),
            AppError::Cancelled(msg) => Status::cancelled(msg),
            AppError::Internal(msg) => {
                tracing::error!("internal error: {}", msg);
                Status::internal(msg)
            }
            AppError::Io(err) => {
                tracing::error!("io error: {}", err);
                Status::internal(err.to_string())
            }
        }
    }
}
