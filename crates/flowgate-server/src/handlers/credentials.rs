// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Logical credential and mapping endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use flowgate_core::credentials::{CreateCredentialMapping, CreateLogicalCredential};
use flowgate_core::models::{CredentialMapping, LogicalCredential};
use serde::Deserialize;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MappingQuery {
    #[serde(alias = "environmentId")]
    pub environment_id: Option<Uuid>,
}

pub async fn create_logical(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Json(input): Json<CreateLogicalCredential>,
) -> ApiResult<(StatusCode, Json<LogicalCredential>)> {
    let credential = state.credentials.create_logical(&ctx.0, input).await?;
    Ok((StatusCode::CREATED, Json(credential)))
}

pub async fn list_logical(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
) -> ApiResult<Json<Vec<LogicalCredential>>> {
    Ok(Json(state.credentials.list_logical(ctx.tenant_id()).await?))
}

pub async fn delete_logical(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.credentials.delete_logical(&ctx.0, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn upsert_mapping(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Json(input): Json<CreateCredentialMapping>,
) -> ApiResult<Json<CredentialMapping>> {
    Ok(Json(state.credentials.upsert_mapping(&ctx.0, input).await?))
}

pub async fn list_mappings(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Query(query): Query<MappingQuery>,
) -> ApiResult<Json<Vec<CredentialMapping>>> {
    let mappings = state
        .credentials
        .list_mappings(ctx.tenant_id(), query.environment_id)
        .await?;
    Ok(Json(mappings))
}

pub async fn delete_mapping(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.credentials.delete_mapping(&ctx.0, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
