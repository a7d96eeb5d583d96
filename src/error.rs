use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use diesel::result::{DatabaseErrorKind, Error as QueryError};
use log::{error, warn};
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by a request.
///
/// Row-level problems never show up here; they are absorbed where they occur
/// and only promoted to `StorageInconsistent` when nothing usable is left.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    BadRequest(String),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("storage inconsistent: {0}")]
    StorageInconsistent(String),
    #[error("request deadline exceeded")]
    DeadlineExceeded,
    #[error("clustering worker error: {0}")]
    Worker(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    fn message(&self) -> String {
        match self {
            Self::BadRequest(msg) => msg.clone(),
            Self::StorageUnavailable(_) => "storage is unavailable".to_string(),
            Self::StorageInconsistent(_) => "stored cluster data is inconsistent".to_string(),
            Self::DeadlineExceeded => "request deadline exceeded".to_string(),
            Self::Worker(_) => "clustering worker failed".to_string(),
            Self::Internal(_) => "internal server error".to_string(),
        }
    }

    fn detail(&self) -> Option<String> {
        match self {
            Self::StorageUnavailable(detail)
            | Self::StorageInconsistent(detail)
            | Self::Worker(detail) => Some(detail.clone()),
            Self::BadRequest(_) | Self::DeadlineExceeded | Self::Internal(_) => None,
        }
    }
}

impl From<QueryError> for Error {
    fn from(error: QueryError) -> Self {
        match error {
            QueryError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, info) => {
                Self::BadRequest(format!("unknown reference: {}", info.message()))
            }
            QueryError::DatabaseError(_, ref info)
                if info.message().contains("statement timeout") =>
            {
                Self::DeadlineExceeded
            }
            QueryError::DeserializationError(e) => Self::StorageInconsistent(e.to_string()),
            QueryError::SerializationError(e) => Self::Internal(e.to_string()),
            e => Self::StorageUnavailable(e.to_string()),
        }
    }
}

impl From<r2d2::Error> for Error {
    fn from(error: r2d2::Error) -> Self {
        Self::StorageUnavailable(format!("connection pool: {}", error))
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::BadRequest(format!("invalid JSON body: {}", error))
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    status: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            Self::Worker(_) => StatusCode::BAD_GATEWAY,
            Self::StorageUnavailable(_) | Self::StorageInconsistent(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            error!("{}", self);
        } else {
            warn!("{}", self);
        }
        HttpResponse::build(status).json(ErrorBody {
            status: "error",
            message: self.message(),
            error: self.detail(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_the_taxonomy() {
        assert_eq!(
            Error::BadRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::StorageUnavailable("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            Error::StorageInconsistent("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            Error::DeadlineExceeded.status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            Error::Worker("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            Error::Internal("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_errors_do_not_leak_detail() {
        let e = Error::Internal("secret stack".into());
        assert_eq!(e.message(), "internal server error");
        assert!(e.detail().is_none());
    }

    #[test]
    fn query_errors_are_classified() {
        assert!(matches!(
            Error::from(QueryError::NotFound),
            Error::StorageUnavailable(_)
        ));
        assert!(matches!(
            Error::from(QueryError::RollbackTransaction),
            Error::StorageUnavailable(_)
        ));
        let e: Box<dyn std::error::Error + Send + Sync> = "bad column".into();
        assert!(matches!(
            Error::from(QueryError::DeserializationError(e)),
            Error::StorageInconsistent(_)
        ));
    }

    #[test]
    fn json_errors_are_bad_requests() {
        let e = serde_json::from_str::<Vec<i32>>("{").unwrap_err();
        assert!(matches!(Error::from(e), Error::BadRequest(_)));
    }
}
