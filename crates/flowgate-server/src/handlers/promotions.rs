// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Promotion endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use flowgate_core::credentials::{PreflightReport, PreflightRequest};
use flowgate_core::models::Promotion;
use flowgate_core::pagination::Page;
use flowgate_core::promotion::{CreatePromotion, PromotionExecutionResult};
use uuid::Uuid;

use super::PageQuery;
use crate::context::RequestContext;
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn create_promotion(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Json(input): Json<CreatePromotion>,
) -> ApiResult<(StatusCode, Json<Promotion>)> {
    let promotion = state.promotions.create_promotion(&ctx.0, input).await?;
    Ok((StatusCode::CREATED, Json(promotion)))
}

pub async fn list_promotions(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<Promotion>>> {
    let page = state
        .promotions
        .list_promotions(ctx.tenant_id(), query.request())
        .await?;
    Ok(Json(page))
}

pub async fn get_promotion(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Promotion>> {
    Ok(Json(state.promotions.get_promotion(ctx.tenant_id(), id).await?))
}

/// Run a pending promotion and return its result.
pub async fn execute_promotion(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PromotionExecutionResult>> {
    Ok(Json(state.promotions.execute_promotion(&ctx.0, id).await?))
}

/// Credential check of the selected workflows against the target.
pub async fn preflight(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Json(request): Json<PreflightRequest>,
) -> ApiResult<Json<PreflightReport>> {
    Ok(Json(
        state
            .credentials
            .preflight(ctx.tenant_id(), request)
            .await?,
    ))
}
