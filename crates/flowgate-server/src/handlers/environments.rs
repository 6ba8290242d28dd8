// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Environment endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use flowgate_core::environments::{ConnectionStatus, CreateEnvironment, UpdateEnvironment};
use flowgate_core::models::{Environment, WorkflowRecord};
use flowgate_core::pagination::Page;
use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use super::PageQuery;
use crate::context::RequestContext;
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn create_environment(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Json(input): Json<CreateEnvironment>,
) -> ApiResult<(StatusCode, Json<Environment>)> {
    let environment = state.environments.create(&ctx.0, input).await?;
    Ok((StatusCode::CREATED, Json(environment)))
}

pub async fn list_environments(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<Environment>>> {
    let page = state
        .environments
        .list(ctx.tenant_id(), query.request())
        .await?;
    Ok(Json(page))
}

pub async fn get_environment(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Environment>> {
    Ok(Json(state.environments.get(ctx.tenant_id(), id).await?))
}

pub async fn update_environment(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
    Json(patch): Json<UpdateEnvironment>,
) -> ApiResult<Json<Environment>> {
    Ok(Json(state.environments.update(&ctx.0, id, patch).await?))
}

pub async fn delete_environment(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.environments.delete(&ctx.0, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn test_connection(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ConnectionStatus>> {
    Ok(Json(
        state.environments.test_connection(ctx.tenant_id(), id).await?,
    ))
}

/// Start a sync in the background and return 202 right away.
pub async fn sync_environment(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let environment = state.environments.get(ctx.tenant_id(), id).await?;

    let sync = state.sync.clone();
    let audit_ctx = ctx.0.clone();
    tokio::spawn(async move {
        match sync.sync_environment(&audit_ctx, &environment).await {
            Ok(summary) => info!(
                tenant_id = %audit_ctx.tenant_id,
                environment_id = %environment.id,
                workflows_synced = summary.workflows_synced,
                workflows_removed = summary.workflows_removed,
                executions_synced = summary.executions_synced,
                errors = summary.errors.len(),
                "Environment sync finished"
            ),
            Err(e) => warn!(
                tenant_id = %audit_ctx.tenant_id,
                environment_id = %environment.id,
                error = %e,
                "Environment sync failed"
            ),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"status": "accepted", "environmentId": id})),
    ))
}

pub async fn list_workflows(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<WorkflowRecord>>> {
    let page = state
        .environments
        .list_workflows(ctx.tenant_id(), id, query.request())
        .await?;
    Ok(Json(page))
}
