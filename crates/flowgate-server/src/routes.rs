// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP routes.

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{self, admin, billing, credentials, environments, promotions, snapshots};
use crate::state::AppState;

/// Build the API router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        // Environments
        .route(
            "/api/v1/environments",
            post(environments::create_environment).get(environments::list_environments),
        )
        .route(
            "/api/v1/environments/{id}",
            get(environments::get_environment)
                .patch(environments::update_environment)
                .delete(environments::delete_environment),
        )
        .route(
            "/api/v1/environments/{id}/test-connection",
            post(environments::test_connection),
        )
        .route(
            "/api/v1/environments/{id}/sync",
            post(environments::sync_environment),
        )
        .route(
            "/api/v1/environments/{id}/workflows",
            get(environments::list_workflows),
        )
        // Snapshots
        .route(
            "/api/v1/environments/{id}/snapshots",
            get(snapshots::list_snapshots).post(snapshots::create_snapshot),
        )
        .route("/api/v1/snapshots/{id}", get(snapshots::get_snapshot))
        // Promotions
        .route(
            "/api/v1/promotions",
            post(promotions::create_promotion).get(promotions::list_promotions),
        )
        .route("/api/v1/promotions/preflight", post(promotions::preflight))
        .route("/api/v1/promotions/{id}", get(promotions::get_promotion))
        .route(
            "/api/v1/promotions/{id}/execute",
            post(promotions::execute_promotion),
        )
        // Credentials
        .route(
            "/api/v1/credentials/logical",
            post(credentials::create_logical).get(credentials::list_logical),
        )
        .route(
            "/api/v1/credentials/logical/{id}",
            delete(credentials::delete_logical),
        )
        .route(
            "/api/v1/credentials/mappings",
            post(credentials::upsert_mapping).get(credentials::list_mappings),
        )
        .route(
            "/api/v1/credentials/mappings/{id}",
            delete(credentials::delete_mapping),
        )
        // Billing
        .route("/api/v1/billing/webhook", post(billing::webhook))
        .route("/api/v1/billing/entitlements", get(billing::entitlements))
        // Observability & audit
        .route("/api/v1/observability/overview", get(admin::overview))
        .route("/api/v1/audit-logs", get(admin::list_audit_logs))
        // Admin
        .route("/api/v1/admin/retention/run", post(admin::run_retention))
        .route("/api/v1/admin/downgrade/check", post(admin::check_downgrade))
        .route("/api/v1/admin/grace-periods", get(admin::list_grace_periods))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
