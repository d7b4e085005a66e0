//! Scheduler bearer authentication for internal routes.
//!
//! The batch trigger and the internal lifecycle endpoints are called by the
//! platform scheduler, authenticated with a shared secret compared in
//! constant time.

use crate::config::SchedulerConfig;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use secrecy::ExposeSecret;
use service_core::error::AppError;
use subtle::ConstantTimeEq;

/// Proof that the request carried the scheduler's bearer token.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerAuth;

#[async_trait]
impl<S> FromRequestParts<S> for SchedulerAuth
where
    S: AsRef<SchedulerConfig> + Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!("Missing Authorization header"))
            })?;

        let token = header.strip_prefix("Bearer ").ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Authorization must be a bearer token"))
        })?;

        let expected = state.as_ref().token.expose_secret();
        let matches: bool = token.as_bytes().ct_eq(expected.as_bytes()).into();
        if !matches {
            return Err(AppError::Unauthorized(anyhow::anyhow!(
                "Invalid scheduler token"
            )));
        }

        Ok(SchedulerAuth)
    }
}
