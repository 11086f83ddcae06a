//! Custom Axum extractors.
//!
//! - [`CorrelationId`]: the request's correlation ID, set by the middleware
//! - [`QueryIdParam`]: the validated `query_id` query-string parameter

use crate::error::AppError;
use axum::{
    async_trait,
    extract::{FromRequestParts, Query},
    http::request::Parts,
};
use querycast_core::query::QueryId;
use serde::Deserialize;
use std::convert::Infallible;
use uuid::Uuid;

/// Correlation ID for request tracing.
///
/// Read from request extensions when the middleware is installed, otherwise a
/// fresh UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<Self>()
            .copied()
            .unwrap_or_else(|| Self(Uuid::new_v4())))
    }
}

/// Raw `query_id` parameter. Absent and empty are treated alike.
#[derive(Debug, Default, Deserialize)]
pub struct RawQueryId {
    /// The parameter as sent.
    #[serde(default)]
    pub query_id: Option<String>,
}

impl RawQueryId {
    /// Validate the parameter.
    ///
    /// # Errors
    ///
    /// Returns a 400 [`AppError`] when it is missing or not a well-formed ID.
    pub fn parse(&self) -> Result<QueryId, AppError> {
        let raw = self
            .query_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::bad_request("query_id is required"))?;
        Ok(raw.parse()?)
    }
}

/// Validated `query_id` from the query string.
///
/// Rejects with 400 `BAD_REQUEST` when the parameter is missing or malformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryIdParam(pub QueryId);

#[async_trait]
impl<S> FromRequestParts<S> for QueryIdParam
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Query(raw) = Query::<RawQueryId>::try_from_uri(&parts.uri)
            .map_err(|e| AppError::bad_request(e.body_text()))?;
        raw.parse().map(Self)
    }
}
