//! List filters and pagination
//!
//! Pagination is always sent explicitly; the service's own defaults are
//! never relied upon.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::SessionStatus;
use crate::error::{Error, Result};

/// Field the session list is ordered by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    CreatedAt,
    CompletedAt,
    Status,
}

impl SortField {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortField::CreatedAt => "created_at",
            SortField::CompletedAt => "completed_at",
            SortField::Status => "status",
        }
    }
}

impl std::str::FromStr for SortField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "created_at" | "created" => Ok(SortField::CreatedAt),
            "completed_at" | "completed" => Ok(SortField::CompletedAt),
            "status" => Ok(SortField::Status),
            other => Err(Error::validation("sort_by", format!("unknown sort field '{}'", other))),
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

impl std::str::FromStr for SortOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(Error::validation("sort_order", format!("unknown sort order '{}'", other))),
        }
    }
}

/// Page selection and ordering for `GET /sessions`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// 1-based page number
    pub page: u32,
    pub page_size: u32,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 100,
            sort_by: SortField::CreatedAt,
            sort_order: SortOrder::Desc,
        }
    }
}

impl Pagination {
    /// First page of `page_size`, newest first
    pub fn first(page_size: u32) -> Self {
        Self {
            page_size,
            ..Self::default()
        }
    }

    /// Zero-based offset of the first item on this page
    pub fn offset(&self) -> usize {
        (self.page.max(1) as usize - 1) * self.page_size as usize
    }

    /// Number of pages needed for `total` items
    pub fn total_pages(&self, total: u32) -> u32 {
        if self.page_size == 0 {
            return 0;
        }
        total.div_ceil(self.page_size)
    }
}

/// Optional narrowing of `GET /sessions`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFilters {
    #[serde(default)]
    pub status_filter: Vec<SessionStatus>,
    #[serde(default)]
    pub prospect_id: Option<String>,
    #[serde(default)]
    pub date_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub search_query: Option<String>,
}

impl SessionFilters {
    /// Whether no filter is set
    pub fn is_empty(&self) -> bool {
        self.status_filter.is_empty()
            && self.prospect_id.is_none()
            && self.date_from.is_none()
            && self.date_to.is_none()
            && self.search_query.as_deref().map_or(true, |q| q.trim().is_empty())
    }

    /// Local evaluation of the filters, used by the simulated service
    pub fn matches(&self, session: &super::Session) -> bool {
        if !self.status_filter.is_empty() && !self.status_filter.contains(&session.status) {
            return false;
        }
        if let Some(ref prospect) = self.prospect_id {
            let targeted = session.prospect_ids.iter().any(|p| p == prospect)
                || session.has_response_from(prospect);
            if !targeted {
                return false;
            }
        }
        if self.date_from.map_or(false, |from| session.created_at < from) {
            return false;
        }
        if self.date_to.map_or(false, |to| session.created_at > to) {
            return false;
        }
        if let Some(query) = self.search_query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            let query = query.to_lowercase();
            let hit = session.question.to_lowercase().contains(&query)
                || session
                    .responses
                    .iter()
                    .any(|r| r.answer.to_lowercase().contains(&query));
            if !hit {
                return false;
            }
        }
        true
    }
}

/// Encode filters and pagination as query pairs, in a stable order
pub fn list_query(filters: &SessionFilters, pagination: &Pagination) -> Vec<(&'static str, String)> {
    let mut pairs = vec![
        ("page", pagination.page.to_string()),
        ("page_size", pagination.page_size.to_string()),
        ("sort_by", pagination.sort_by.as_str().to_string()),
        ("sort_order", pagination.sort_order.as_str().to_string()),
    ];

    if !filters.status_filter.is_empty() {
        let statuses: Vec<&str> = filters.status_filter.iter().map(|s| s.as_str()).collect();
        pairs.push(("status_filter", statuses.join(",")));
    }
    if let Some(ref prospect) = filters.prospect_id {
        pairs.push(("prospect_id", prospect.clone()));
    }
    if let Some(from) = filters.date_from {
        pairs.push(("date_from", from.to_rfc3339()));
    }
    if let Some(to) = filters.date_to {
        pairs.push(("date_to", to.to_rfc3339()));
    }
    if let Some(query) = filters.search_query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        pairs.push(("search_query", query.to_string()));
    }

    pairs
}
