use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::{error, warn};

use super::types::ErrorResponse;
use crate::folder::InvalidRequest;

/// API错误类型
pub struct AppError {
    status: StatusCode,
    message: String,
    source: anyhow::Error,
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;

impl AppError {
    fn new(err: anyhow::Error) -> Self {
        match err.downcast_ref::<InvalidRequest>() {
            Some(invalid) => {
                Self { status: StatusCode::BAD_REQUEST, message: invalid.0.clone(), source: err }
            }
            None => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: "Something went wrong".to_owned(),
                source: err,
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("{}: {:#}", self.message, self.source);
        } else {
            warn!("{}: {:#}", self.message, self.source);
        }
        (self.status, Json(ErrorResponse { error: self.message })).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::new(err.into())
    }
}

/// 为服务端错误设置返回给客户端的提示，客户端错误保持原样
pub trait ResultExt<T> {
    fn or_error(self, message: &str) -> Result<T>;
}

impl<T> ResultExt<T> for anyhow::Result<T> {
    fn or_error(self, message: &str) -> Result<T> {
        self.map_err(|err| {
            let mut err = AppError::new(err);
            if err.status.is_server_error() {
                err.message = message.to_owned();
            }
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;

    #[test]
    fn test_invalid_request_is_bad_request() {
        let err: anyhow::Result<()> = Err(InvalidRequest("No files uploaded".into()).into());
        let err = err.or_error("Error uploading images").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "No files uploaded");
    }

    #[test]
    fn test_other_errors_are_internal() {
        let err: anyhow::Result<()> = Err(anyhow!("connection refused"));
        let err = err.or_error("Error indexing images").unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, "Error indexing images");
    }

    #[test]
    fn test_context_keeps_client_error() {
        let err = anyhow::Error::from(InvalidRequest("bad path".into())).context("搜索失败");
        assert_eq!(AppError::from(err).status(), StatusCode::BAD_REQUEST);
    }
}
