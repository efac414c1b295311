use std::time::Duration;

use crate::provider::{ListRequest, DEFAULT_PAGE_SIZE};
use crate::ValidationError;

/// Lookback applied to tickets and alerts regardless of the last sync time.
pub const DEFAULT_TRAILING_WINDOW: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Knobs for one sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Ignore the connection's schedule.
    pub force: bool,
    /// Stop after the connection test.
    pub test_only: bool,
    pub page_size: usize,
    /// Leave records whose content hash matches the stored mapping untouched.
    pub skip_unchanged: bool,
    pub trailing_window: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            force: false,
            test_only: false,
            page_size: DEFAULT_PAGE_SIZE,
            skip_unchanged: false,
            trailing_window: DEFAULT_TRAILING_WINDOW,
        }
    }
}

impl SyncOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_skip_unchanged(mut self, skip_unchanged: bool) -> Self {
        self.skip_unchanged = skip_unchanged;
        self
    }

    pub fn with_test_only(mut self, test_only: bool) -> Self {
        self.test_only = test_only;
        self
    }

    pub fn with_trailing_window(mut self, trailing_window: Duration) -> Self {
        self.trailing_window = trailing_window;
        self
    }

    /// Base list request for this run; rejects out-of-range page sizes.
    pub fn list_request(&self) -> Result<ListRequest, ValidationError> {
        ListRequest::new(self.page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MAX_PAGE_SIZE;

    #[test]
    fn defaults_overwrite_and_look_back_thirty_days() {
        let options = SyncOptions::default();
        assert!(!options.force);
        assert!(!options.skip_unchanged);
        assert_eq!(options.trailing_window.as_secs(), 2_592_000);
        assert_eq!(options.list_request().expect("request").page_size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn page_size_is_bounded() {
        assert!(SyncOptions::default().with_page_size(0).list_request().is_err());
        assert!(SyncOptions::default()
            .with_page_size(MAX_PAGE_SIZE + 1)
            .list_request()
            .is_err());
    }
}
