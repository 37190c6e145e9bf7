use crate::api::error::AppError;
use crate::utils::auth::{SignedToken, signed_headers};
use axum::{extract::Request, middleware::Next, response::Response};

/// Turns away requests without usable `timeStamp`/`token` headers before
/// their body is read. The parsed pair is handed to the handler as an
/// `Extension<SignedToken>`; the handler checks it against its payload.
pub async fn signed_request_middleware(mut req: Request, next: Next) -> Result<Response, AppError> {
    let (timestamp, token) = signed_headers(req.headers())?;
    req.extensions_mut().insert(SignedToken { timestamp, token });
    Ok(next.run(req).await)
}
