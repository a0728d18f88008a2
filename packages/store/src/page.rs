//! Offset pagination shared by list endpoints.

use serde::{Deserialize, Serialize};

pub const DEFAULT_PER_PAGE: i64 = 20;
pub const MAX_PER_PAGE: i64 = 100;

/// `?page=&per_page=` query parameters. Pages are 1-based.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageRequest {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl PageRequest {
    pub fn new(page: i64, per_page: i64) -> Self {
        Self {
            page: Some(page),
            per_page: Some(per_page),
        }
    }

    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn per_page(&self) -> i64 {
        self.per_page
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1).saturating_mul(self.per_page())
    }
}

/// One page of results with the total row count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, request: PageRequest, total: i64) -> Self {
        Self {
            items,
            page: request.page(),
            per_page: request.per_page(),
            total,
        }
    }

    pub fn has_more(&self) -> bool {
        self.page.saturating_mul(self.per_page) < self.total
    }
}

/// Slice an already-filtered, already-sorted list the way `OFFSET/LIMIT` would.
pub fn slice<T: Clone>(items: &[T], offset: i64, limit: i64) -> Vec<T> {
    let start = usize::try_from(offset.max(0)).unwrap_or(usize::MAX);
    let limit = usize::try_from(limit.max(0)).unwrap_or(0);
    items.iter().skip(start).take(limit).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_request_clamps() {
        let req = PageRequest::new(0, 1000);
        assert_eq!(req.page(), 1);
        assert_eq!(req.per_page(), MAX_PER_PAGE);
        assert_eq!(req.offset(), 0);

        let req = PageRequest::new(3, 10);
        assert_eq!(req.offset(), 20);
        assert_eq!(PageRequest::default().per_page(), DEFAULT_PER_PAGE);
    }

    #[test]
    fn test_offset_saturates_on_huge_page() {
        let req = PageRequest::new(i64::MAX, 100);
        assert_eq!(req.offset(), i64::MAX);
        let page = Page::new(Vec::<i32>::new(), req, 5);
        assert!(!page.has_more());
        assert!(slice(&[1, 2, 3], req.offset(), req.per_page()).is_empty());
    }

    #[test]
    fn test_has_more() {
        let page = Page::new(vec![1, 2], PageRequest::new(1, 2), 3);
        assert!(page.has_more());
        let page = Page::new(vec![3], PageRequest::new(2, 2), 3);
        assert!(!page.has_more());
    }

    #[test]
    fn test_slice() {
        let items = [1, 2, 3, 4, 5];
        assert_eq!(slice(&items, 1, 2), vec![2, 3]);
        assert_eq!(slice(&items, 10, 2), Vec::<i32>::new());
    }
}
