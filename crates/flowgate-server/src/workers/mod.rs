// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Periodic background workers.

pub mod downgrade;
pub mod retention;

pub use downgrade::{DowngradeWorker, DowngradeWorkerConfig};
pub use retention::{RetentionWorker, RetentionWorkerConfig};
