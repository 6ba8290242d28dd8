// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Flowgate Server - HTTP API for workflow promotion
//!
//! Exposes environments, snapshots, promotions, credentials, billing, and
//! audit over `/api/v1`. Every tenant-scoped route reads the tenant and actor
//! from `X-Tenant-Id` / `X-User-Id` headers.
//!
//! Background work:
//! - Environment sync and post-promotion snapshots are spawned per request
//! - [`workers::RetentionWorker`] deletes data past each tenant's window
//! - [`workers::DowngradeWorker`] starts and enforces downgrade grace periods

/// Stripe webhook verification and subscription updates.
pub mod billing;

/// Server configuration.
pub mod config;

/// Tenant and actor extraction.
pub mod context;

/// HTTP error mapping.
pub mod error;

/// Request handlers.
pub mod handlers;

/// Router construction.
pub mod routes;

/// Shared handler state.
pub mod state;

/// Periodic workers.
pub mod workers;

pub use config::Config;
pub use routes::create_router;
pub use state::{AppState, StateSettings};
