//! Offset pagination shared by every list endpoint.

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_LIMIT: i64 = 20;
pub const MAX_PAGE_LIMIT: i64 = 100;

#[derive(Deserialize, Default, Clone, Debug)]
pub struct PageQuery {
    #[serde(default)]
    pub offset: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub search: Option<String>,
}

impl PageQuery {
    /// Offset floored at 0; limit clamped to [1, 100], defaulting to 20.
    pub fn clamp(&self) -> (i64, i64) {
        let offset = self.offset.unwrap_or(0).max(0);
        let limit = self
            .limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT);
        (offset, limit)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: i64,
    pub limit: i64,
    pub offset: i64,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_offset: Option<i64>,
    /// Opaque continuation token for store-side chunked lists; absent
    /// when the collection was paginated in memory.
    #[serde(rename = "continue", skip_serializing_if = "Option::is_none")]
    pub continue_token: Option<String>,
}

impl<T> Page<T> {
    /// Cuts one page out of the full, stably-ordered collection.
    /// `totalCount` is the cardinality at query time; `hasMore` iff
    /// `offset + items.len() < totalCount`.
    pub fn paginate(all: Vec<T>, offset: i64, limit: i64) -> Self {
        let total_count = all.len() as i64;
        let items: Vec<T> = all
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        let has_more = offset + (items.len() as i64) < total_count;
        let next_offset = has_more.then_some(offset + items.len() as i64);
        Self {
            items,
            total_count,
            limit,
            offset,
            has_more,
            next_offset,
            continue_token: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_limit_and_offset() {
        let q = PageQuery {
            offset: Some(-5),
            limit: Some(1000),
            search: None,
        };
        assert_eq!(q.clamp(), (0, 100));
        let q = PageQuery {
            offset: None,
            limit: Some(0),
            search: None,
        };
        assert_eq!(q.clamp(), (0, 1));
        assert_eq!(PageQuery::default().clamp(), (0, DEFAULT_PAGE_LIMIT));
    }

    #[test]
    fn last_partial_page_of_53() {
        let all: Vec<i64> = (0..53).collect();
        let page = Page::paginate(all, 40, 20);
        assert_eq!(page.items.len(), 13);
        assert_eq!(page.total_count, 53);
        assert!(!page.has_more);
        assert_eq!(page.next_offset, None);
    }

    #[test]
    fn middle_page_advertises_next_offset() {
        let all: Vec<i64> = (0..53).collect();
        let page = Page::paginate(all, 20, 20);
        assert_eq!(page.items, (20..40).collect::<Vec<_>>());
        assert!(page.has_more);
        assert_eq!(page.next_offset, Some(40));
    }

    #[test]
    fn pages_partition_the_collection() {
        let all: Vec<i64> = (0..53).collect();
        let mut seen = Vec::new();
        let mut offset = 0;
        loop {
            let page = Page::paginate(all.clone(), offset, 20);
            seen.extend(page.items.iter().copied());
            match page.next_offset {
                Some(next) => offset = next,
                None => break,
            }
        }
        assert_eq!(seen, all);
    }

    #[test]
    fn offset_past_end_is_empty_not_an_error() {
        let page = Page::paginate((0..10).collect::<Vec<i64>>(), 100, 20);
        assert!(page.items.is_empty());
        assert_eq!(page.total_count, 10);
        assert!(!page.has_more);
    }

    #[test]
    fn empty_collection() {
        let page = Page::<i64>::paginate(Vec::new(), 0, 20);
        assert!(page.items.is_empty());
        assert_eq!(page.total_count, 0);
        assert!(!page.has_more);
        assert_eq!(page.next_offset, None);
    }
}
