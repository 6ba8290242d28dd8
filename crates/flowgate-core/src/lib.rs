// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Flowgate Core - Workflow Promotion Engine
//!
//! This crate moves n8n workflows between environments of a tenant
//! (dev → staging → production) with Git-backed snapshots and automatic
//! rollback.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        flowgate-server                           │
//! │              (HTTP API, billing webhook, workers)                │
//! └──────────────────────────────────────────────────────────────────┘
//!                                 │
//!                                 ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                   flowgate-core (this crate)                     │
//! │  PromotionService · SnapshotService · EnvironmentSyncService     │
//! │  CredentialService · RetentionService · DowngradeService         │
//! └──────────────────────────────────────────────────────────────────┘
//!        │                      │                       │
//!        ▼                      ▼                       ▼
//! ┌──────────────┐   ┌────────────────────┐   ┌───────────────────┐
//! │ Persistence  │   │  WorkflowProvider  │   │   SnapshotStore   │
//! │ (PostgreSQL) │   │   (n8n REST API)   │   │ (GitHub contents) │
//! └──────────────┘   └────────────────────┘   └───────────────────┘
//! ```
//!
//! Providers and snapshot stores are resolved per environment through an
//! [`registry::AdapterRegistry`]. HTTP implementations live in
//! `flowgate-connectors`; [`provider::MockProvider`] and
//! [`git_store::MockSnapshotStore`] back the tests.
//!
//! # Promotion
//!
//! | Step | Behavior |
//! |------|----------|
//! | Guard | One running promotion per (tenant, target environment) |
//! | Snapshot | Target captured in Git before the first write |
//! | Compare | Content hash equal in target ⇒ workflow skipped |
//! | Write | Create for new workflows, update for changed ones, create on 404 |
//! | Failure | Stop, then restore written workflows from the snapshot |
//!
//! # Modules
//!
//! - [`promotion`]: Promotion execution, rollback, and the per-target guard
//! - [`snapshots`]: Git snapshots of environments
//! - [`environments`]: Environment CRUD and connection tests
//! - [`sync`]: Workflow and execution cache refresh
//! - [`credentials`]: Logical credentials and promotion preflight
//! - [`retention`]: Plan-based cleanup of executions and audit logs
//! - [`downgrade`]: Grace periods and enforcement after plan downgrades
//! - [`persistence`]: Storage trait with PostgreSQL and in-memory backends

/// Audit trail with dual-actor attribution.
pub mod audit;

/// Logical credentials, mappings, and preflight checks.
pub mod credentials;

/// Downgrade grace periods and enforcement.
pub mod downgrade;

/// Environment management.
pub mod environments;

/// Error types shared by every service.
pub mod error;

/// Git snapshot store interface.
pub mod git_store;

/// Workflow content hashing.
pub mod hash;

/// Embedded SQL migrations.
pub mod migrations;

/// Persisted records.
pub mod models;

/// Execution overview per environment.
pub mod observability;

/// Page requests and response envelopes.
pub mod pagination;

/// Persistence trait and backends.
pub mod persistence;

/// Subscription plans and limits.
pub mod plans;

/// Promotion engine.
pub mod promotion;

/// Automation provider interface.
pub mod provider;

/// Per-environment adapter resolution.
pub mod registry;

/// Plan-based data retention.
pub mod retention;

/// Environment snapshots.
pub mod snapshots;

/// Environment cache sync.
pub mod sync;

/// Test fixtures.
pub mod testing;

pub use error::{Error, Result};
pub use hash::compute_workflow_hash;
pub use pagination::{Page, PageRequest};
pub use persistence::{MemoryPersistence, Persistence, PostgresPersistence};
pub use promotion::{PromotionExecutionResult, PromotionService, RollbackResult};
pub use registry::AdapterRegistry;
