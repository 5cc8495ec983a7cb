use axum::http::StatusCode;
use thiserror::Error;

/// Error taxonomy for the generation/grading core.
///
/// `Conflict` covers both user-visible conflicts (retry while a stage is not
/// in `error`) and guard-key losses; the latter are absorbed by callers and
/// never surfaced over HTTP.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("generation failed: {0}")]
    UpstreamGeneration(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl CoreError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::UpstreamGeneration(_) => StatusCode::BAD_GATEWAY,
            CoreError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Handler-side mapping to the `(status, message)` pair the router uses.
    pub fn into_parts(self) -> (StatusCode, String) {
        let status = self.status_code();
        (status, self.to_string())
    }
}

impl From<mongodb::error::Error> for CoreError {
    fn from(err: mongodb::error::Error) -> Self {
        CoreError::Storage(anyhow::Error::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_taxonomy() {
        assert_eq!(
            CoreError::Validation("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            CoreError::NotFound("missing".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            CoreError::Conflict("held".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            CoreError::UpstreamGeneration("timeout".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }
}
