//! Splitting a key history into transfer pages
//!
//! # Boundary rule
//!
//! The key server's client historically computed the upper bound of every
//! page against `len - 1`, so the newest key is never part of any page
//! (and a one-key history produces an empty first page). That rule is kept
//! as [`PageBoundary::Compat`], the default, because sessions opened by
//! the server are sized to it. [`PageBoundary::Inclusive`] slices up to
//! `len` and is selectable through `keys.page_boundary`.

use super::errors::{GroupError, GroupResult};
use super::types::GroupKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

/// Upper bound rule for page slices
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageBoundary {
    /// Bound by `len - 1`: the newest key is excluded from every page
    #[default]
    Compat,
    /// Bound by `len`: every key lands in exactly one page
    Inclusive,
}

impl PageBoundary {
    /// Exclusive limit that page upper bounds are clamped to
    fn limit(self, len: usize) -> usize {
        match self {
            PageBoundary::Compat => len.saturating_sub(1),
            PageBoundary::Inclusive => len,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PageBoundary::Compat => "compat",
            PageBoundary::Inclusive => "inclusive",
        }
    }
}

impl FromStr for PageBoundary {
    type Err = GroupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "compat" => Ok(PageBoundary::Compat),
            "inclusive" => Ok(PageBoundary::Inclusive),
            other => Err(GroupError::Serialization(format!("unknown page boundary: {}", other))),
        }
    }
}

impl fmt::Display for PageBoundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One serialized page of a key history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPage {
    pub page_index: usize,
    /// JSON array of the keys in `range`
    pub payload: String,
    /// Another page follows this one
    pub has_more: bool,
    /// Indices of the history covered by this page
    pub range: Range<usize>,
}

impl KeyPage {
    pub fn key_count(&self) -> usize {
        self.range.len()
    }
}

/// Index range and continuation flag of a page, without serializing it.
///
/// Fails with `InvalidPageSize` for a zero page size, which would never
/// make progress.
pub fn page_range(
    len: usize,
    page_index: usize,
    page_size: usize,
    boundary: PageBoundary,
) -> GroupResult<(Range<usize>, bool)> {
    if page_size == 0 {
        return Err(GroupError::InvalidPageSize);
    }

    let limit = boundary.limit(len);
    let offset = page_index.saturating_mul(page_size);
    let end = offset.saturating_add(page_size).min(limit);
    let start = offset.min(end);

    Ok((start..end, end < limit))
}

/// Serialize page `page_index` of `keys`
pub fn page(keys: &[GroupKey], page_index: usize, page_size: usize, boundary: PageBoundary) -> GroupResult<KeyPage> {
    let (range, has_more) = page_range(keys.len(), page_index, page_size, boundary)?;
    let payload = serde_json::to_string(&keys[range.clone()])?;

    Ok(KeyPage { page_index, payload, has_more, range })
}

/// Parse a page payload back into keys
pub fn decode_page(payload: &str) -> GroupResult<Vec<GroupKey>> {
    Ok(serde_json::from_str(payload)?)
}

/// Number of pages `page`/`has_more` iteration produces for `len` keys
pub fn page_count(len: usize, page_size: usize, boundary: PageBoundary) -> GroupResult<usize> {
    let mut count = 1;
    while page_range(len, count - 1, page_size, boundary)?.1 {
        count += 1;
    }
    Ok(count)
}
