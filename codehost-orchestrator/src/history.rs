//! Usage history: one session per stretch of time a workspace was running.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{OrchestratorError, Result};

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HistorySession {
    pub id: i64,
    pub workspace_id: i64,
    pub user_id: String,
    pub enter_at: DateTime<Utc>,
    /// `None` while the workspace is still running.
    pub exit_at: Option<DateTime<Utc>>,
}

impl HistorySession {
    pub fn is_open(&self) -> bool {
        self.exit_at.is_none()
    }
}

/// Validated 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn new(page: Option<u32>, page_size: Option<u32>) -> Result<Self> {
        let page = page.unwrap_or(1);
        let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page == 0 {
            return Err(OrchestratorError::Validation(
                "page starts at 1".to_string(),
            ));
        }
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(OrchestratorError::Validation(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        Ok(Self { page, page_size })
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Pagination {
    pub current_page: u32,
    pub page_size: u32,
    pub total_page: u64,
    pub total_record: u64,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

impl Pagination {
    pub fn new(request: PageRequest, total_record: u64) -> Self {
        let total_page = total_record.div_ceil(u64::from(request.page_size));
        Self {
            current_page: request.page,
            page_size: request.page_size,
            total_page,
            total_record,
            has_next_page: u64::from(request.page) < total_page,
            has_previous_page: request.page > 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HistoryPage {
    pub items: Vec<HistorySession>,
    pub pagination: Pagination,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_request_defaults_and_bounds() {
        let req = PageRequest::new(None, None).unwrap();
        assert_eq!(req, PageRequest { page: 1, page_size: 10 });
        assert_eq!(req.offset(), 0);
        assert_eq!(PageRequest::new(Some(3), Some(20)).unwrap().offset(), 40);

        assert!(PageRequest::new(Some(0), None).is_err());
        assert!(PageRequest::new(None, Some(0)).is_err());
        assert!(PageRequest::new(None, Some(101)).is_err());
    }

    #[test]
    fn test_pagination_flags() {
        let middle = Pagination::new(PageRequest::new(Some(2), Some(10)).unwrap(), 25);
        assert_eq!(middle.total_page, 3);
        assert!(middle.has_next_page);
        assert!(middle.has_previous_page);

        let last = Pagination::new(PageRequest::new(Some(3), Some(10)).unwrap(), 25);
        assert!(!last.has_next_page);

        let empty = Pagination::new(PageRequest::new(None, None).unwrap(), 0);
        assert_eq!(empty.total_page, 0);
        assert!(!empty.has_next_page);
        assert!(!empty.has_previous_page);
    }
}
