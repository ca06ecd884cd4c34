//! Offset-based pagination types for listing queries.
//!
//! Listing queries take a `currentPage`/`perPage` pair and return a
//! `PaginatedResult<T>` carrying length-aware metadata, rather than the
//! cursor-based connections a GraphQL front end would use.
//!
//! # Usage
//!
//! ```rust,ignore
//! let page = Page::new(1, 25)?;
//! let total = Job::count_matching(&constraints, pool).await?;
//! let items = Job::query_all(&constraints, &page, pool).await?;
//! let result = PaginatedResult::new(items, &page, total);
//! ```

/// A validated `(current_page, per_page)` pair.
///
/// `current_page` is 1-indexed. `per_page` is clamped to `[1, MAX_PER_PAGE]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    current_page: u32,
    per_page: u32,
}

impl Page {
    pub const MAX_PER_PAGE: u32 = 200;
    pub const DEFAULT_PER_PAGE: u32 = 25;

    /// Construct a page, clamping `per_page` into range and floor-ing
    /// `current_page` at 1. Never fails; out-of-range inputs are normalized
    /// rather than rejected, since this is an internal listing helper, not a
    /// user-facing validation boundary.
    pub fn new(current_page: u32, per_page: u32) -> Self {
        Page {
            current_page: current_page.max(1),
            per_page: per_page.clamp(1, Self::MAX_PER_PAGE),
        }
    }

    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    pub fn per_page(&self) -> u32 {
        self.per_page
    }

    /// SQL `LIMIT` value for this page.
    pub fn limit(&self) -> i64 {
        self.per_page as i64
    }

    /// SQL `OFFSET` value for this page.
    pub fn offset(&self) -> i64 {
        ((self.current_page - 1) as i64) * self.per_page as i64
    }
}

impl Default for Page {
    fn default() -> Self {
        Page::new(1, Self::DEFAULT_PER_PAGE)
    }
}

/// Length-aware pagination metadata returned alongside a page of results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub current_page: u32,
    pub per_page: u32,
    pub total_count: u64,
    pub total_pages: u32,
}

impl PageInfo {
    pub fn new(page: &Page, total_count: u64) -> Self {
        let total_pages = if total_count == 0 {
            0
        } else {
            ((total_count - 1) / page.per_page as u64) as u32 + 1
        };
        PageInfo {
            current_page: page.current_page,
            per_page: page.per_page,
            total_count,
            total_pages,
        }
    }

    pub fn has_next_page(&self) -> bool {
        self.current_page < self.total_pages
    }

    pub fn has_previous_page(&self) -> bool {
        self.current_page > 1
    }
}

/// A page of results plus the metadata describing its position in the whole set.
#[derive(Debug, Clone)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub page_info: PageInfo,
}

impl<T> PaginatedResult<T> {
    pub fn new(items: Vec<T>, page: &Page, total_count: u64) -> Self {
        PaginatedResult {
            items,
            page_info: PageInfo::new(page, total_count),
        }
    }
}

/// Inherited pagination quirk (decided in DESIGN.md): the source
/// `querySource` loop-termination expression is equivalent to
/// `done = ++page < maxPages || true`, which always evaluates `true` no
/// matter what `maxPages` is, so the walk stops after exactly one page.
/// Preserved verbatim here rather than "fixed" -- callers that page a
/// multi-page collaborator (currently `user_work::populate_from_work_items`)
/// advance `page` once and always get back `true` (done), regardless of
/// `max_pages`.
pub fn advance_page(page: &mut u32, _max_pages: u32) -> bool {
    *page += 1;
    true
}
