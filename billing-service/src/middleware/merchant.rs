//! Merchant context extractor.
//!
//! The API gateway authenticates the merchant's API key and forwards the
//! verified identity in the `X-Merchant-ID` header. Identity is only ever
//! taken from that header, never parsed out of a token or key format.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use uuid::Uuid;

/// Verified merchant identity for a request.
#[derive(Debug, Clone, Copy)]
pub struct MerchantContext {
    pub merchant_id: Uuid,
}

#[async_trait]
impl<S> FromRequestParts<S> for MerchantContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get("X-Merchant-ID")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!(
                    "Missing X-Merchant-ID header (required from gateway)"
                ))
            })?;

        let merchant_id = Uuid::parse_str(raw).map_err(|_| {
            AppError::Unauthorized(anyhow::anyhow!("Malformed X-Merchant-ID header"))
        })?;

        let span = tracing::Span::current();
        span.record("merchant_id", raw);

        Ok(MerchantContext { merchant_id })
    }
}
