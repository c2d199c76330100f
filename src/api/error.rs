use axum::extract::multipart::MultipartError;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::{error, warn};
use crate::error::{MediaError, TranscodeError, ValidationCode};

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("user may not perform that action")]
    Forbidden,

    #[error("entity not found")]
    NotFound,

    #[error("error in the request: {0}")]
    Validation(ValidationCode),

    #[error("an external process failed: {0}")]
    ProcessFailed(#[from] TranscodeError),

    #[error("an internal server error occurred: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(code: ValidationCode) -> Self {
        Self::Validation(code)
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Validation(code) => code.as_str(),
            Self::ProcessFailed(_) => "process_failed",
            Self::Internal(_) => "internal_error",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Validation(ValidationCode::TooLarge) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::ProcessFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<MediaError> for ApiError {
    fn from(value: MediaError) -> Self {
        match value {
            MediaError::NotFound => Self::NotFound,
            MediaError::Validation(code) => Self::Validation(code),
            MediaError::Transcode(e) => Self::ProcessFailed(e),
            MediaError::Internal(e) => Self::Internal(e),
            other => Self::Internal(other.into()),
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(value: std::io::Error) -> Self {
        Self::Internal(value.into())
    }
}

impl From<MultipartError> for ApiError {
    fn from(value: MultipartError) -> Self {
        if value.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return Self::validation(ValidationCode::TooLarge);
        }
        warn!("Malformed multipart body: {}", value.body_text());
        Self::validation(ValidationCode::InvalidRequest)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(value: JsonRejection) -> Self {
        warn!("Rejected JSON body: {}", value.body_text());
        Self::validation(ValidationCode::InvalidRequest)
    }
}

impl From<QueryRejection> for ApiError {
    fn from(value: QueryRejection) -> Self {
        warn!("Rejected query string: {}", value.body_text());
        Self::validation(ValidationCode::InvalidRequest)
    }
}

impl From<PathRejection> for ApiError {
    fn from(_: PathRejection) -> Self {
        Self::validation(ValidationCode::InvalidId)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::ProcessFailed(ref e) => {
                warn!("Transcoder error: {}", e);
            }

            Self::Internal(ref e) => {
                error!("Internal error: {:?}", e);
            }

            _ => (),
        }

        #[derive(serde::Serialize)]
        struct ErrorBody {
            status: &'static str,
            error: &'static str,
        }

        let body = ErrorBody { status: "error", error: self.code() };
        (self.status_code(), Json(body)).into_response()
    }
}
