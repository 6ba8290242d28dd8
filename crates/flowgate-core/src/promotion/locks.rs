// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process guard against concurrent promotions into the same environment.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use uuid::Uuid;

type LockKey = (String, Uuid);

/// Set of (tenant, target environment) pairs with a promotion in flight.
#[derive(Debug, Clone, Default)]
pub struct PromotionLocks {
    held: Arc<DashMap<LockKey, Uuid>>,
}

impl PromotionLocks {
    /// Create an empty lock set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the target for `promotion_id`.
    ///
    /// Returns `None` while another promotion holds the target.
    pub fn try_acquire(
        &self,
        tenant_id: &str,
        target_environment_id: Uuid,
        promotion_id: Uuid,
    ) -> Option<PromotionGuard> {
        let key = (tenant_id.to_string(), target_environment_id);
        match self.held.entry(key.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(promotion_id);
                Some(PromotionGuard {
                    held: self.held.clone(),
                    key,
                })
            }
        }
    }

    /// Promotion currently holding the target, if any.
    pub fn holder(&self, tenant_id: &str, target_environment_id: Uuid) -> Option<Uuid> {
        self.held
            .get(&(tenant_id.to_string(), target_environment_id))
            .map(|entry| *entry.value())
    }
}

/// Releases the target when dropped.
#[derive(Debug)]
pub struct PromotionGuard {
    held: Arc<DashMap<LockKey, Uuid>>,
    key: LockKey,
}

impl Drop for PromotionGuard {
    fn drop(&mut self) {
        self.held.remove(&self.key);
    }
}
