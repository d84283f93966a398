//! Page windows and the two page-building modes.
//!
//! Exact mode pairs a window with a count query. Probe mode fetches one extra
//! row and reports only whether it existed.

use serde::{Deserialize, Serialize};

use crate::config::FilterConfig;
use crate::storage::{StoreError, Window};
use crate::types::Tag;

/// How a page reports what lies beyond it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageMode {
    /// Count matching rows and report `total`
    Exact,
    /// Fetch `limit + 1` rows and report `hasMore` only
    Probe,
}

impl PageMode {
    /// Default mode for a tag, picked by expected cardinality
    pub fn for_tag(tag: Tag) -> Self {
        match tag {
            Tag::Log | Tag::App | Tag::ConnectedSocket | Tag::RoomSubscription | Tag::AuthId => PageMode::Probe,
            _ => PageMode::Exact,
        }
    }
}

/// Validated 1-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page: u64,
    pub limit: u64,
}

impl PageWindow {
    /// Missing values fall back to page 1 and the configured default limit.
    /// Limits above the configured maximum are clamped.
    pub fn new(page: Option<u64>, limit: Option<u64>, config: &FilterConfig) -> Result<Self, StoreError> {
        let page = page.unwrap_or(1);
        if page < 1 {
            return Err(StoreError::field_validation("page", "page must be at least 1"));
        }

        let max_limit = u64::from(config.max_limit.max(1));
        let mut limit = limit.unwrap_or_else(|| u64::from(config.default_limit.max(1)));
        if limit < 1 {
            return Err(StoreError::field_validation("limit", "limit must be at least 1"));
        }
        if limit > max_limit {
            tracing::warn!("Requested limit {} exceeds maximum {}, clamping", limit, max_limit);
            limit = max_limit;
        }

        Ok(Self { page, limit })
    }

    pub fn offset(&self) -> u64 {
        (self.page - 1).saturating_mul(self.limit)
    }

    /// Backend window for exact mode
    pub fn window(&self) -> Window {
        Window::new(self.offset(), self.limit)
    }

    /// Backend window for probe mode: one row past the page
    pub fn probe_window(&self) -> Window {
        Window::new(self.offset(), self.limit + 1)
    }

    pub fn exact<T>(&self, items: Vec<T>, total: u64) -> Page<T> {
        Page {
            items,
            page: self.page,
            limit: self.limit,
            has_more: self.page.saturating_mul(self.limit) < total,
            total: Some(total),
        }
    }

    /// Build a page from rows fetched with [`probe_window`](Self::probe_window)
    pub fn probe<T>(&self, mut items: Vec<T>) -> Page<T> {
        let has_more = items.len() as u64 > self.limit;
        items.truncate(self.limit as usize);
        Page {
            items,
            page: self.page,
            limit: self.limit,
            has_more,
            total: None,
        }
    }
}

/// One page of results. `total` is present in exact mode only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u64,
    pub limit: u64,
    pub has_more: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            limit: self.limit,
            has_more: self.has_more,
            total: self.total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn config() -> FilterConfig {
        AppConfig::development().filter
    }

    #[test]
    fn defaults_and_offsets() {
        let window = PageWindow::new(None, None, &config()).unwrap();
        assert_eq!(window.page, 1);
        assert_eq!(window.limit, 50);
        assert_eq!(window.offset(), 0);

        let window = PageWindow::new(Some(3), Some(10), &config()).unwrap();
        assert_eq!(window.window(), Window::new(20, 10));
        assert_eq!(window.probe_window(), Window::new(20, 11));
    }

    #[test]
    fn rejects_zero_page_and_limit() {
        assert!(matches!(PageWindow::new(Some(0), None, &config()), Err(StoreError::Validation { .. })));
        assert!(matches!(PageWindow::new(None, Some(0), &config()), Err(StoreError::Validation { .. })));
    }

    #[test]
    fn clamps_limit_to_maximum() {
        let window = PageWindow::new(None, Some(1_000_000), &config()).unwrap();
        assert_eq!(window.limit, 1000);
    }

    #[test]
    fn exact_has_more_follows_total() {
        let window = PageWindow::new(Some(2), Some(2), &config()).unwrap();
        let page = window.exact(vec![3, 4], 5);
        assert!(page.has_more);
        assert_eq!(page.total, Some(5));

        let last = PageWindow::new(Some(3), Some(2), &config()).unwrap().exact(vec![5], 5);
        assert!(!last.has_more);
    }

    #[test]
    fn probe_drops_the_extra_row() {
        let window = PageWindow::new(Some(1), Some(2), &config()).unwrap();
        let page = window.probe(vec![1, 2, 3]);
        assert_eq!(page.items, vec![1, 2]);
        assert!(page.has_more);
        assert_eq!(page.total, None);

        let page = window.probe(vec![1, 2]);
        assert!(!page.has_more);
    }

    #[test]
    fn probe_pages_omit_total_on_the_wire() {
        let page = PageWindow::new(None, Some(1), &config()).unwrap().probe(vec!["a"]);
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json, serde_json::json!({"items": ["a"], "page": 1, "limit": 1, "hasMore": false}));
    }

    #[test]
    fn per_tag_modes() {
        assert_eq!(PageMode::for_tag(Tag::Log), PageMode::Probe);
        assert_eq!(PageMode::for_tag(Tag::AuthId), PageMode::Probe);
        assert_eq!(PageMode::for_tag(Tag::Member), PageMode::Exact);
        assert_eq!(PageMode::for_tag(Tag::Callback), PageMode::Exact);
    }
}
