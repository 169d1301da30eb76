//! Mapping of crate errors onto HTTP responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::error::Error;

/// Handler error, rendered as `{"error": "..."}`
#[derive(Debug)]
pub struct ApiError(pub Error);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Validation(_) | Error::Template(_) => StatusCode::BAD_REQUEST,
            Error::InvalidTransition { .. } | Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::Delivery(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Error::not_found("Incident", 1), StatusCode::NOT_FOUND)]
    #[case(Error::validation("bad"), StatusCode::BAD_REQUEST)]
    #[case(Error::conflict("Incident", 1), StatusCode::CONFLICT)]
    #[case(Error::InvalidTransition { from: "resolved".into(), to: "acknowledged".into() }, StatusCode::CONFLICT)]
    #[case(Error::storage("down"), StatusCode::INTERNAL_SERVER_ERROR)]
    fn test_status_mapping(#[case] err: Error, #[case] expected: StatusCode) {
        assert_eq!(ApiError(err).status(), expected);
    }
}
