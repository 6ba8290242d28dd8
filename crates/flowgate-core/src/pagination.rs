// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pagination envelope shared by every list endpoint.

use serde::Serialize;

/// Default page size when the caller does not supply one.
pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// Largest page size a caller may request.
pub const MAX_PAGE_SIZE: i64 = 100;

/// Normalized page request. `page` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Requested page, at least 1.
    pub page: i64,
    /// Page size clamped to `[1, MAX_PAGE_SIZE]`.
    pub page_size: i64,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    /// Build a page request, clamping out-of-range values.
    pub fn new(page: Option<i64>, page_size: Option<i64>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            page_size: page_size
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// Row offset for SQL `OFFSET`. Saturates, so a page far past the end
    /// yields an empty page.
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.page_size)
    }

    /// Row limit for SQL `LIMIT`.
    pub fn limit(&self) -> i64 {
        self.page_size
    }
}

/// One page of results.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Total matching rows across all pages.
    pub total: i64,
    /// Current page (1-based).
    pub page: i64,
    /// Effective page size.
    pub page_size: i64,
    /// Number of pages; 0 when there are no rows.
    pub total_pages: i64,
    /// Whether a later page exists.
    pub has_more: bool,
}

impl<T> Page<T> {
    /// Build a page from the items and the total row count.
    pub fn new(items: Vec<T>, total: i64, request: PageRequest) -> Self {
        let total = total.max(0);
        let total_pages = (total + request.page_size - 1) / request.page_size;
        Self {
            items,
            total,
            page: request.page,
            page_size: request.page_size,
            total_pages,
            has_more: request.page < total_pages,
        }
    }

    /// Map the items while keeping the paging metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            page_size: self.page_size,
            total_pages: self.total_pages,
            has_more: self.has_more,
        }
    }
}
