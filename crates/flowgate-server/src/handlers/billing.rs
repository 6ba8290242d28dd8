// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Billing webhook and entitlements.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use chrono::Utc;
use flowgate_core::Error;
use flowgate_core::plans::{Entitlements, load_entitlements};
use serde_json::Value;
use tracing::info;

use crate::billing::{SIGNATURE_HEADER, WebhookOutcome, verify_signature};
use crate::context::RequestContext;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Verify and apply a Stripe event.
pub async fn webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookOutcome>> {
    let secret = state
        .stripe_webhook_secret
        .as_deref()
        .ok_or_else(|| Error::Unavailable("billing webhook is not configured".to_string()))?;
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    verify_signature(&body, signature, secret, Utc::now().timestamp())?;

    let event: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid event payload: {e}")))?;
    let outcome = state.billing.handle_event(&event).await?;
    info!(
        event_type = %outcome.event_type,
        handled = outcome.handled,
        tenant_id = ?outcome.tenant_id,
        "Billing webhook processed"
    );
    Ok(Json(outcome))
}

/// Plan limits and current usage of the calling tenant.
pub async fn entitlements(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
) -> ApiResult<Json<Entitlements>> {
    Ok(Json(
        load_entitlements(state.persistence.as_ref(), ctx.tenant_id()).await?,
    ))
}
