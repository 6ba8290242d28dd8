// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tenant and actor extraction from request headers.

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use flowgate_core::audit::{Actor, AuditContext};

use crate::error::ApiError;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const USER_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";
pub const IMPERSONATOR_HEADER: &str = "x-impersonator-id";
pub const IMPERSONATION_SESSION_HEADER: &str = "x-impersonation-session-id";

/// Audit context of the calling user.
///
/// With `X-Impersonator-Id` set, the impersonator becomes the actor and the
/// user named by `X-User-Id` the effective subject.
#[derive(Debug, Clone)]
pub struct RequestContext(pub AuditContext);

impl RequestContext {
    pub fn tenant_id(&self) -> &str {
        &self.0.tenant_id
    }

    /// Build the context from request headers.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, ApiError> {
        let tenant_id = required(headers, TENANT_HEADER)?;
        let user_id = required(headers, USER_HEADER)?;
        let user = Actor::new(user_id, optional(headers, USER_EMAIL_HEADER));

        let ctx = match optional(headers, IMPERSONATOR_HEADER) {
            Some(impersonator) => AuditContext::new(tenant_id, Actor::new(impersonator, None))
                .impersonating(user, optional(headers, IMPERSONATION_SESSION_HEADER)),
            None => AuditContext::new(tenant_id, user),
        };
        Ok(Self(ctx))
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers)
    }
}

fn optional(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn required(headers: &HeaderMap, name: &str) -> Result<String, ApiError> {
    optional(headers, name).ok_or_else(|| ApiError::BadRequest(format!("missing {name} header")))
}
