use crate::error::Error;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub(crate) struct APIError(anyhow::Error);

impl IntoResponse for APIError {
    fn into_response(self) -> Response {
        let any_err = self.0;
        let status = match any_err.downcast_ref::<Error>() {
            Some(Error::TokenMismatch(_)) => StatusCode::FORBIDDEN,
            Some(Error::KeyNotFound) => StatusCode::NOT_FOUND,
            Some(Error::AlreadyExists(_)) => StatusCode::CONFLICT,
            Some(Error::InvalidArgument(_)) => StatusCode::BAD_REQUEST,
            Some(Error::BackendUnreachable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            _ => match any_err.downcast_ref::<JsonRejection>() {
                Some(JsonRejection::JsonDataError(_)) => StatusCode::UNPROCESSABLE_ENTITY,
                Some(JsonRejection::JsonSyntaxError(_)) => StatusCode::BAD_REQUEST,
                Some(JsonRejection::MissingJsonContentType(_)) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        };
        let body = Json(json!({
            "status": status.as_u16(),
            "error": format!("{any_err}"),
        }));
        (status, body).into_response()
    }
}

impl<E> From<E> for APIError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
