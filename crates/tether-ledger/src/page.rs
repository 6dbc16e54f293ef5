//! Pagination and ordering for ledger queries

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::model::RpcCall;

/// Column a query is ordered by
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortProperty {
    /// Admission time
    #[default]
    CreatedTime,
    /// Status, ties broken by admission time
    Status,
}

/// Ordering direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    /// Smallest first
    Asc,
    /// Largest first
    #[default]
    Desc,
}

/// Query ordering; newest first by default
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortOrder {
    /// Column
    pub property: SortProperty,
    /// Direction
    pub direction: SortDirection,
}

impl SortOrder {
    /// Order by `property` in `direction`
    pub fn new(property: SortProperty, direction: SortDirection) -> Self {
        Self {
            property,
            direction,
        }
    }

    /// Sort calls in place. Ties fall back to the call id so pages are stable.
    pub fn sort(&self, calls: &mut [RpcCall]) {
        calls.sort_by(|a, b| {
            let ordering = match self.property {
                SortProperty::CreatedTime => a.created_time.cmp(&b.created_time),
                SortProperty::Status => a
                    .status
                    .as_str()
                    .cmp(b.status.as_str())
                    .then(a.created_time.cmp(&b.created_time)),
            }
            .then_with(|| a.id.cmp(&b.id));
            match self.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            }
        });
    }
}

/// Requested page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageLink {
    /// Rows per page
    pub page_size: usize,
    /// Zero-based page index
    pub page: usize,
    /// Ordering
    #[serde(default)]
    pub sort_order: SortOrder,
}

impl PageLink {
    /// Page `page` of `page_size` rows, newest first
    pub fn new(page_size: usize, page: usize) -> Self {
        Self {
            page_size,
            page,
            sort_order: SortOrder::default(),
        }
    }

    /// Replace the ordering
    pub fn with_sort(mut self, sort_order: SortOrder) -> Self {
        self.sort_order = sort_order;
        self
    }

    /// Reject empty or oversized pages
    pub fn validate(&self, max_page_size: usize) -> Result<(), LedgerError> {
        if self.page_size == 0 {
            return Err(LedgerError::validation("page size must be positive"));
        }
        if self.page_size > max_page_size {
            return Err(LedgerError::validation(format!(
                "page size {} exceeds maximum {max_page_size}",
                self.page_size
            )));
        }
        Ok(())
    }
}

/// One page of results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageData<T> {
    /// Rows on this page
    pub data: Vec<T>,
    /// Number of pages at this page size
    pub total_pages: usize,
    /// Rows across all pages
    pub total_elements: usize,
    /// True when a later page exists
    pub has_next: bool,
}

impl<T> PageData<T> {
    /// Cut page `link.page` out of an already ordered result set
    pub fn from_ordered(all: Vec<T>, link: &PageLink) -> Self {
        let total_elements = all.len();
        let total_pages = total_elements.div_ceil(link.page_size.max(1));
        let start = link.page.saturating_mul(link.page_size).min(total_elements);
        let data: Vec<T> = all.into_iter().skip(start).take(link.page_size).collect();
        Self {
            has_next: link.page < total_pages.saturating_sub(1),
            data,
            total_pages,
            total_elements,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_split_ordered_rows() {
        let link = PageLink::new(2, 1);
        let page = PageData::from_ordered(vec![1, 2, 3, 4, 5], &link);
        assert_eq!(page.data, vec![3, 4]);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.total_elements, 5);
        assert!(page.has_next);
    }

    #[test]
    fn page_past_the_end_is_empty() {
        let page = PageData::from_ordered(vec![1, 2, 3], &PageLink::new(2, 5));
        assert!(page.data.is_empty());
        assert!(!page.has_next);
    }

    #[test]
    fn last_representable_page_index_is_empty() {
        let page = PageData::from_ordered(vec![1, 2, 3], &PageLink::new(2, usize::MAX));
        assert!(page.data.is_empty());
        assert_eq!(page.total_pages, 2);
        assert!(!page.has_next);
    }

    #[test]
    fn empty_and_oversized_pages_are_rejected() {
        assert!(PageLink::new(0, 0).validate(10).is_err());
        assert!(PageLink::new(11, 0).validate(10).is_err());
        assert!(PageLink::new(10, 0).validate(10).is_ok());
    }
}
