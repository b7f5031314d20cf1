// src/error.rs
use log::error;
use serde_json::json;
use std::convert::Infallible;
use thiserror::Error;
use warp::http::{header, StatusCode, Uri};
use warp::reject::Reject;
use warp::{Rejection, Reply};

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("session token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("username is already taken")]
    UsernameTaken,
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("symbol not owned")]
    NotOwned,
    #[error("shares sold can't exceed shares owned")]
    InsufficientShares,
    #[error("trade value out of range")]
    Overflow,
}

/// The uniform user-facing failure: a status code and a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apology {
    pub code: StatusCode,
    pub message: String,
}

impl Apology {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Apology {
            code,
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Apology::new(StatusCode::FORBIDDEN, message)
    }

    pub fn internal() -> Self {
        Apology::new(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
    }
}

impl Reject for Apology {}

impl Reply for Apology {
    fn into_response(self) -> warp::reply::Response {
        let body = json!({ "code": self.code.as_u16(), "message": self.message });
        warp::reply::with_status(warp::reply::json(&body), self.code).into_response()
    }
}

impl From<Error> for Apology {
    fn from(e: Error) -> Self {
        match e {
            Error::UsernameTaken | Error::InsufficientFunds | Error::InsufficientShares => {
                Apology::forbidden(e.to_string())
            }
            Error::NotOwned => Apology::forbidden("must provide valid stock symbol"),
            Error::Overflow => Apology::new(StatusCode::BAD_REQUEST, e.to_string()),
            Error::Database(_) | Error::Hash(_) | Error::Token(_) => {
                error!("Request failed: {}", e);
                Apology::internal()
            }
        }
    }
}

/// No valid session; answered with a redirect to the login form.
#[derive(Debug)]
pub struct Unauthenticated;

impl Reject for Unauthenticated {}

pub async fn handle_rejection(err: Rejection) -> Result<warp::reply::Response, Infallible> {
    if err.find::<Unauthenticated>().is_some() {
        let redirect = warp::redirect::see_other(Uri::from_static("/login"));
        return Ok(
            warp::reply::with_header(redirect, header::SET_COOKIE, crate::auth::clear_cookie())
                .into_response(),
        );
    }

    let apology = if let Some(apology) = err.find::<Apology>() {
        apology.clone()
    } else if err.is_not_found() {
        Apology::new(StatusCode::NOT_FOUND, "not found")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        Apology::new(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        Apology::new(StatusCode::PAYLOAD_TOO_LARGE, "request body too large")
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        Apology::new(StatusCode::LENGTH_REQUIRED, "content length required")
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        Apology::new(StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported media type")
    } else if err.find::<warp::body::BodyDeserializeError>().is_some() {
        Apology::new(StatusCode::BAD_REQUEST, "malformed form body")
    } else {
        error!("Unhandled rejection: {:?}", err);
        Apology::internal()
    };

    Ok(apology.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn apology_survives_the_rejection_round_trip() {
        let rejection: Rejection = Apology::forbidden("insufficient funds").into();
        let resp = handle_rejection(rejection).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let rejection: Rejection = Apology::from(Error::Overflow).into();
        let resp = handle_rejection(rejection).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_session_redirects_and_clears_cookie() {
        let resp = handle_rejection(warp::reject::custom(Unauthenticated))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(resp.headers()[header::LOCATION], "/login");
        assert!(resp.headers()[header::SET_COOKIE]
            .to_str()
            .unwrap()
            .contains("Max-Age=0"));
    }
}
