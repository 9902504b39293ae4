//! Client-side paging for lists the backend returns whole, and the compact
//! pagination bar shared by every admin table.

use serde::Serialize;

/// Pages needed for `n` items; zero items need zero pages.
pub fn total_pages(n: usize, per_page: usize) -> usize {
    if per_page == 0 { return 0; }
    n.div_ceil(per_page)
}

/// The log table always shows at least one (possibly empty) page.
pub fn log_total_pages(n: usize, per_page: usize) -> usize {
    total_pages(n, per_page).max(1)
}

/// Generic admin lists clamp a page past the end to the last page. An empty list
/// stays on page 1. Callers reset to page 1 themselves when the search term changes.
pub fn effective_page(page: usize, total: usize) -> usize {
    if total == 0 { return 1; }
    page.clamp(1, total)
}

/// The log table snaps a page past the end (e.g. after a filter shrank the list)
/// back to the first.
pub fn log_effective_page(page: usize, total: usize) -> usize {
    if page == 0 || page > total { 1 } else { page }
}

pub fn page_slice<T>(items: &[T], page: usize, per_page: usize) -> &[T] {
    if per_page == 0 { return &[]; }
    let start = page.saturating_sub(1).saturating_mul(per_page).min(items.len());
    let end = start.saturating_add(per_page).min(items.len());
    &items[start..end]
}

/// 1-based "showing X to Y" bounds; `(0, 0)` for an empty list.
pub fn showing_range(n: usize, page: usize, per_page: usize) -> (usize, usize) {
    if n == 0 { return (0, 0); }
    let from = page.saturating_sub(1) * per_page + 1;
    (from.min(n), (page * per_page).min(n))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PageItem {
    Previous { target: Option<usize> },
    Page { number: usize, active: bool },
    Ellipsis,
    Next { target: Option<usize> },
}

impl PageItem {
    pub fn label(&self) -> String {
        match self {
            PageItem::Previous { .. } => "Previous".into(),
            PageItem::Page { number, .. } => number.to_string(),
            PageItem::Ellipsis => "...".into(),
            PageItem::Next { .. } => "Next".into(),
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, PageItem::Previous { target: None } | PageItem::Next { target: None } | PageItem::Ellipsis)
    }
}

/// First three pages, last three, and the neighbours of `active`, with ellipses
/// over the gaps. Empty when there is nothing to page through.
pub fn pagination_links(active: usize, total: usize) -> Vec<PageItem> {
    if total <= 1 {
        return Vec::new();
    }
    let mut pages: Vec<usize> = (1..=3)
        .chain(total.saturating_sub(2)..=total)
        .chain(active.saturating_sub(1)..=active + 1)
        .filter(|p| (1..=total).contains(p))
        .collect();
    pages.sort_unstable();
    pages.dedup();

    let mut items = vec![PageItem::Previous { target: (active > 1).then(|| active - 1) }];
    let mut last = 0;
    for p in pages {
        if last != 0 && p - last > 1 {
            items.push(PageItem::Ellipsis);
        }
        items.push(PageItem::Page { number: p, active: p == active });
        last = p;
    }
    items.push(PageItem::Next { target: (active < total).then(|| active + 1) });
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(items: &[PageItem]) -> Vec<String> { items.iter().map(|i| i.label()).collect() }

    #[test]
    fn page_counts() {
        assert_eq!(total_pages(0, 10), 0);
        assert_eq!(total_pages(10, 10), 1);
        assert_eq!(total_pages(11, 10), 2);
        assert_eq!(log_total_pages(0, 10), 1);
        assert_eq!(log_effective_page(4, 3), 1);
        assert_eq!(log_effective_page(3, 3), 3);
        assert_eq!(effective_page(5, 3), 3);
        assert_eq!(effective_page(2, 3), 2);
        assert_eq!(effective_page(0, 3), 1);
        assert_eq!(effective_page(4, 0), 1);
    }

    #[test]
    fn slices_and_ranges() {
        let v: Vec<u32> = (1..=25).collect();
        assert_eq!(page_slice(&v, 3, 10), &[21, 22, 23, 24, 25]);
        assert!(page_slice(&v, 4, 10).is_empty());
        assert_eq!(showing_range(25, 3, 10), (21, 25));
        assert_eq!(showing_range(0, 1, 10), (0, 0));
    }

    #[test]
    fn compact_bar_with_gaps() {
        let items = pagination_links(10, 20);
        assert_eq!(labels(&items), vec!["Previous", "1", "2", "3", "...", "9", "10", "11", "...", "18", "19", "20", "Next"]);
        assert!(items.contains(&PageItem::Page { number: 10, active: true }));
        assert_eq!(items[0], PageItem::Previous { target: Some(9) });
    }

    #[test]
    fn ends_disable_navigation() {
        let first = pagination_links(1, 5);
        assert_eq!(labels(&first), vec!["Previous", "1", "2", "3", "4", "5", "Next"]);
        assert!(first[0].is_disabled());
        let last = pagination_links(5, 5);
        assert!(last.last().unwrap().is_disabled());
        assert!(pagination_links(1, 1).is_empty());
        assert_eq!(labels(&pagination_links(1, 8)), vec!["Previous", "1", "2", "3", "...", "6", "7", "8", "Next"]);
    }
}
