pub mod cart;
pub mod checkout;
pub mod orders;
pub mod webhook;

use std::future::{ready, Ready};

use actix_web::dev::Payload;
use actix_web::{FromRequest, HttpRequest};
use uuid::Uuid;

use crate::errors::AppError;

/// Requester identity, as established by the upstream auth gateway and
/// passed down in the `x-user-id` header. The core trusts this identity
/// without re-verifying credentials.
#[derive(Debug, Clone, Copy)]
pub struct AuthedUser(pub Uuid);

impl FromRequest for AuthedUser {
    type Error = AppError;
    type Future = Ready<Result<Self, AppError>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(
            req.headers()
                .get("x-user-id")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| Uuid::parse_str(value).ok())
                .map(AuthedUser)
                .ok_or(AppError::Unauthorized),
        )
    }
}
