// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Snapshot endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use flowgate_core::models::Snapshot;
use flowgate_core::pagination::Page;
use uuid::Uuid;

use super::PageQuery;
use crate::context::RequestContext;
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn list_snapshots(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(environment_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<Snapshot>>> {
    let page = state
        .snapshots
        .list_snapshots(ctx.tenant_id(), environment_id, query.request())
        .await?;
    Ok(Json(page))
}

/// Manual backup of an environment.
pub async fn create_snapshot(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(environment_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<Snapshot>)> {
    let snapshot = state
        .snapshots
        .create_manual_backup(&ctx.0, environment_id)
        .await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

pub async fn get_snapshot(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Snapshot>> {
    Ok(Json(state.snapshots.get_snapshot(ctx.tenant_id(), id).await?))
}
