use crate::identity::IdentityError;
use crate::protocol::ProtocolError;
use crate::store::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Auth errors
    #[error("no credential supplied")]
    AuthFailNoToken,
    #[error("credential has the wrong format")]
    AuthFailTokenWrongFormat,
    #[error("credential rejected: {0}")]
    AuthFailRejected(IdentityError),
    #[error("claimed subject {claimed:?} does not match the authorized subject")]
    AuthFailSubjectMismatch { claimed: String },

    // Input errors
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    // Infrastructure errors
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Identity(IdentityError),
}

pub type Result<T> = core::result::Result<T, Error>;

impl From<IdentityError> for Error {
    fn from(err: IdentityError) -> Self {
        Error::Identity(err)
    }
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::AuthFailNoToken | Error::AuthFailTokenWrongFormat | Error::AuthFailRejected(_) => {
                StatusCode::UNAUTHORIZED
            }
            Error::AuthFailSubjectMismatch { .. } => StatusCode::FORBIDDEN,
            Error::Protocol(_) => StatusCode::BAD_REQUEST,
            Error::Store(_) | Error::Identity(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to clients. Infrastructure details stay in logs.
    pub fn client_message(&self) -> String {
        match self {
            Error::AuthFailNoToken => "No auth token found".to_string(),
            Error::AuthFailTokenWrongFormat => "Auth token wrong format".to_string(),
            Error::AuthFailRejected(_) => "Unauthorized".to_string(),
            Error::AuthFailSubjectMismatch { .. } => "Subject mismatch".to_string(),
            Error::Protocol(e) => e.client_message(),
            Error::Store(_) | Error::Identity(_) => "Internal error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.client_message()
            }
        }));

        (self.status(), body).into_response()
    }
}
