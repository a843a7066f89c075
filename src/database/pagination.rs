use serde::{Deserialize, Serialize};

use crate::{error::TypeError, form::QueryForm, MAX_PAGE_SIZE};

/// `page` is 1-based, `limit` is the page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
}

impl Pagination {
    pub fn new(page: i64, limit: i64) -> Self {
        Self { page, limit }
    }

    pub fn from_query(query: &QueryForm, default_limit: i64) -> Result<Self, TypeError> {
        let page = query.get_number::<i64>("page")?.unwrap_or(1);
        let limit = query.get_number::<i64>("limit")?.unwrap_or(default_limit);

        if page < 1 {
            return Err(TypeError::new("page: Invalid page."));
        }
        if limit < 1 {
            return Err(TypeError::new("limit: Page size must be positive."));
        }

        let limit = limit.min(MAX_PAGE_SIZE);
        if (page - 1).checked_mul(limit).is_none() {
            return Err(TypeError::new("page: Invalid page."));
        }

        Ok(Self { page, limit })
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct PageContext<T> {
    pub count: i64,
    pub next: Option<i64>,
    pub previous: Option<i64>,
    pub results: Vec<T>,
}

impl<T> PageContext<T> {
    pub fn from_rows(rows: Vec<T>, total_rows: i64, pagination: Pagination) -> Self {
        let last_page = ((total_rows + pagination.limit - 1) / pagination.limit).max(1);

        let next = if pagination.page < last_page {
            Some(pagination.page + 1)
        } else {
            None
        };
        let previous = if pagination.page > 1 {
            Some((pagination.page - 1).min(last_page))
        } else {
            None
        };

        Self {
            count: total_rows,
            next,
            previous,
            results: rows,
        }
    }

    pub fn map<U, F>(self, f: F) -> PageContext<U>
    where
        F: FnMut(T) -> U,
    {
        PageContext {
            count: self.count,
            next: self.next,
            previous: self.previous,
            results: self.results.into_iter().map(f).collect(),
        }
    }

    pub fn no_rows() -> Self {
        Self {
            count: 0,
            next: None,
            previous: None,
            results: vec![],
        }
    }
}
