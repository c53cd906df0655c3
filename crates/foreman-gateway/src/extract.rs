//! JSON body extraction with API-contract rejections.
//!
//! axum's stock `Json` rejection maps to 400; the API contract wants 422
//! for malformed input, so requests go through this wrapper instead.

use axum::Json;
use axum::extract::{FromRequest, Request};
use serde::de::DeserializeOwned;

use foreman_kernel::EngineError;

use crate::error::ApiError;

/// `Json<T>` with rejections converted to `422 {"detail": ...}`.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(ApiError(EngineError::invalid_input(
                "body",
                rejection.body_text(),
            ))),
        }
    }
}
