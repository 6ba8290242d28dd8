// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Audit log, observability, and tenant maintenance endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use flowgate_core::audit::AuditLogEntry;
use flowgate_core::downgrade::DowngradeCheck;
use flowgate_core::models::{GracePeriod, GracePeriodStatus};
use flowgate_core::observability::Overview;
use flowgate_core::pagination::Page;
use flowgate_core::retention::RetentionReport;
use serde::Deserialize;

use super::PageQuery;
use crate::context::RequestContext;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct GracePeriodQuery {
    pub status: Option<GracePeriodStatus>,
}

pub async fn list_audit_logs(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<AuditLogEntry>>> {
    let request = query.request();
    let (items, total) = state
        .persistence
        .list_audit_logs(ctx.tenant_id(), &request)
        .await?;
    Ok(Json(Page::new(items, total, request)))
}

pub async fn overview(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
) -> ApiResult<Json<Overview>> {
    Ok(Json(state.observability.overview(ctx.tenant_id()).await?))
}

/// Retention cleanup for the calling tenant, outside the worker schedule.
pub async fn run_retention(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
) -> ApiResult<Json<RetentionReport>> {
    Ok(Json(state.retention.run_for_tenant(ctx.tenant_id()).await?))
}

/// Downgrade check for the calling tenant.
pub async fn check_downgrade(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
) -> ApiResult<Json<DowngradeCheck>> {
    Ok(Json(state.downgrade.check_tenant(&ctx.0).await?))
}

pub async fn list_grace_periods(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Query(query): Query<GracePeriodQuery>,
) -> ApiResult<Json<Vec<GracePeriod>>> {
    let grace_periods = state
        .persistence
        .list_grace_periods(ctx.tenant_id(), query.status)
        .await?;
    Ok(Json(grace_periods))
}
