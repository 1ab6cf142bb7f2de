//! List / search / detail queries over a [`SchemaIndex`].
//!
//! Queries are pure functions over an immutable index. Filters are AND-combined; an empty filter
//! list means "no constraint".

use crate::error::{IndexError, NotFoundKind, Result};
use crate::index::SchemaIndex;
use crate::model::{EndpointRecord, HttpMethod, ModelRecord, ModelType};
use serde::Serialize;
use std::cmp::Reverse;
use std::str::FromStr;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 100;

/// Validated pagination arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: usize,
    page_size: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    /// `page` is 1-indexed; `page_size` defaults to [`DEFAULT_PAGE_SIZE`] and is clamped to
    /// `[1, max_page_size]`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Validation`] when `page < 1` or `page_size` is negative.
    pub fn new(page: Option<i64>, page_size: Option<i64>, max_page_size: usize) -> Result<Self> {
        let page = match page {
            None => 1,
            Some(p) if p >= 1 => usize::try_from(p)
                .map_err(|_| IndexError::Validation(format!("page {p} is out of range")))?,
            Some(p) => {
                return Err(IndexError::Validation(format!(
                    "page must be >= 1 (got {p})"
                )));
            }
        };
        let max_page_size = max_page_size.max(1);
        let page_size = match page_size {
            None => DEFAULT_PAGE_SIZE.min(max_page_size),
            Some(s) if s < 0 => {
                return Err(IndexError::Validation(format!(
                    "page_size must not be negative (got {s})"
                )));
            }
            Some(s) => usize::try_from(s)
                .unwrap_or(usize::MAX)
                .clamp(1, max_page_size),
        };
        Ok(Self { page, page_size })
    }

    #[must_use]
    pub fn page(&self) -> usize {
        self.page
    }

    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }
}

/// One page of results plus the totals it was cut from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult<T> {
    items: Vec<T>,
    page: usize,
    page_size: usize,
    total_items: usize,
    total_pages: usize,
    has_next: bool,
    has_previous: bool,
}

impl<T> PageResult<T> {
    /// Cut one page out of the full, ordered match list.
    pub fn paginate<I>(matches: I, request: PageRequest) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: ExactSizeIterator,
    {
        let iter = matches.into_iter();
        let total_items = iter.len();
        let PageRequest { page, page_size } = request;
        let total_pages = total_items.div_ceil(page_size);
        let skip = (page - 1).saturating_mul(page_size);
        let items: Vec<T> = iter.skip(skip).take(page_size).collect();
        Self {
            items,
            page,
            page_size,
            total_items,
            total_pages,
            has_next: page < total_pages,
            has_previous: page > 1,
        }
    }

    #[must_use]
    pub fn items(&self) -> &[T] {
        &self.items
    }

    #[must_use]
    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    #[must_use]
    pub fn page(&self) -> usize {
        self.page
    }

    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    #[must_use]
    pub fn total_items(&self) -> usize {
        self.total_items
    }

    #[must_use]
    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    #[must_use]
    pub fn has_next(&self) -> bool {
        self.has_next
    }

    #[must_use]
    pub fn has_previous(&self) -> bool {
        self.has_previous
    }

    /// Convert the items, keeping the page metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PageResult<U> {
        PageResult {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            page_size: self.page_size,
            total_items: self.total_items,
            total_pages: self.total_pages,
            has_next: self.has_next,
            has_previous: self.has_previous,
        }
    }
}

/// Parse a list of user-supplied names (`"get"`, `"object"`, ...) into typed values.
///
/// # Errors
///
/// Returns the first [`IndexError::Validation`] produced by `T::from_str`.
pub fn parse_list<T>(values: &[String]) -> Result<Vec<T>>
where
    T: FromStr<Err = IndexError>,
{
    values.iter().map(|v| v.parse()).collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointFilters {
    pub methods: Vec<HttpMethod>,
    pub tags_include: Vec<String>,
    pub tags_exclude: Vec<String>,
    pub deprecated: Option<bool>,
    pub requires_auth: Option<bool>,
}

impl EndpointFilters {
    #[must_use]
    pub fn matches(&self, ep: &EndpointRecord) -> bool {
        (self.methods.is_empty() || self.methods.contains(&ep.method))
            && (self.tags_include.is_empty()
                || ep.tags.iter().any(|t| self.tags_include.contains(t)))
            && !ep.tags.iter().any(|t| self.tags_exclude.contains(t))
            && self.deprecated.is_none_or(|d| ep.deprecated == d)
            && self.requires_auth.is_none_or(|a| ep.requires_auth == a)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelFilters {
    pub types: Vec<ModelType>,
    pub min_properties: Option<usize>,
    pub max_properties: Option<usize>,
    pub has_required_fields: Option<bool>,
    pub tags_include: Vec<String>,
    pub tags_exclude: Vec<String>,
}

impl ModelFilters {
    /// # Errors
    ///
    /// Returns [`IndexError::Validation`] when `min_properties > max_properties`.
    pub fn validate(&self) -> Result<()> {
        if let (Some(min), Some(max)) = (self.min_properties, self.max_properties)
            && min > max
        {
            return Err(IndexError::Validation(format!(
                "min_properties ({min}) must not exceed max_properties ({max})"
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn matches(&self, m: &ModelRecord) -> bool {
        (self.types.is_empty() || self.types.contains(&m.model_type))
            && self.min_properties.is_none_or(|min| m.property_count >= min)
            && self.max_properties.is_none_or(|max| m.property_count <= max)
            && self
                .has_required_fields
                .is_none_or(|r| (m.required_count > 0) == r)
            && (self.tags_include.is_empty()
                || m.tags.iter().any(|t| self.tags_include.contains(t)))
            && !m.tags.iter().any(|t| self.tags_exclude.contains(t))
    }
}

/// Endpoint field a search query matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SearchField {
    Path,
    OperationId,
    Summary,
    Description,
    Tags,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredEndpoint<'a> {
    pub endpoint: &'a EndpointRecord,
    /// Number of matched fields.
    pub score: usize,
    pub matched: Vec<SearchField>,
}

fn search_matches(ep: &EndpointRecord, needle: &str) -> Vec<SearchField> {
    let hit = |s: &str| s.to_lowercase().contains(needle);
    let mut matched = Vec::new();
    if hit(&ep.path) {
        matched.push(SearchField::Path);
    }
    if hit(&ep.operation_id) {
        matched.push(SearchField::OperationId);
    }
    if ep.summary.as_deref().is_some_and(hit) {
        matched.push(SearchField::Summary);
    }
    if ep.description.as_deref().is_some_and(hit) {
        matched.push(SearchField::Description);
    }
    if ep.tags.iter().any(|t| hit(t)) {
        matched.push(SearchField::Tags);
    }
    matched
}

/// Union of sorted position lists, sorted and de-duplicated.
fn union<'a>(lists: impl Iterator<Item = &'a Vec<usize>>) -> Vec<usize> {
    let mut out: Vec<usize> = lists.flatten().copied().collect();
    out.sort_unstable();
    out.dedup();
    out
}

fn intersect(mut acc: Vec<usize>, other: &[usize]) -> Vec<usize> {
    acc.retain(|i| other.binary_search(i).is_ok());
    acc
}

impl SchemaIndex {
    /// Positions that can possibly match, narrowed with the secondary indices.
    fn endpoint_candidates(&self, filters: &EndpointFilters) -> Vec<usize> {
        let mut narrowed: Option<Vec<usize>> = None;
        let mut narrow = |set: Vec<usize>| {
            narrowed = Some(match narrowed.take() {
                Some(acc) => intersect(acc, &set),
                None => set,
            });
        };
        if !filters.methods.is_empty() {
            narrow(union(
                filters
                    .methods
                    .iter()
                    .filter_map(|m| self.endpoints_by_method.get(m)),
            ));
        }
        if !filters.tags_include.is_empty() {
            narrow(union(
                filters
                    .tags_include
                    .iter()
                    .filter_map(|t| self.endpoints_by_tag.get(t)),
            ));
        }
        if filters.deprecated == Some(true) {
            narrow(self.deprecated_endpoints.clone());
        }
        narrowed.unwrap_or_else(|| (0..self.endpoints().len()).collect())
    }

    fn model_candidates(&self, filters: &ModelFilters) -> Vec<usize> {
        let mut narrowed: Option<Vec<usize>> = None;
        let mut narrow = |set: Vec<usize>| {
            narrowed = Some(match narrowed.take() {
                Some(acc) => intersect(acc, &set),
                None => set,
            });
        };
        if !filters.types.is_empty() {
            narrow(union(
                filters
                    .types
                    .iter()
                    .filter_map(|t| self.models_by_type.get(t)),
            ));
        }
        if !filters.tags_include.is_empty() {
            narrow(union(
                filters
                    .tags_include
                    .iter()
                    .filter_map(|t| self.models_by_tag.get(t)),
            ));
        }
        narrowed.unwrap_or_else(|| (0..self.models().len()).collect())
    }

    fn filtered_endpoints<'s>(
        &'s self,
        filters: &EndpointFilters,
    ) -> impl Iterator<Item = &'s EndpointRecord> {
        self.endpoint_candidates(filters)
            .into_iter()
            .map(|i| &self.endpoints()[i])
            .filter(move |ep| filters.matches(ep))
    }

    /// Endpoints matching `filters`, in declaration order.
    #[must_use]
    pub fn list_endpoints(
        &self,
        filters: &EndpointFilters,
        page: PageRequest,
    ) -> PageResult<&EndpointRecord> {
        let matches: Vec<&EndpointRecord> = self.filtered_endpoints(filters).collect();
        PageResult::paginate(matches, page)
    }

    /// Case-insensitive substring search over path, operationId, summary, description and tags.
    ///
    /// Results are ordered by score (matched field count) descending, ties in declaration order.
    /// An empty query matches every filtered endpoint with score 0.
    #[must_use]
    pub fn search_endpoints(
        &self,
        query: &str,
        filters: &EndpointFilters,
        page: PageRequest,
    ) -> PageResult<ScoredEndpoint<'_>> {
        let needle = query.trim().to_lowercase();
        let mut scored: Vec<ScoredEndpoint<'_>> = if needle.is_empty() {
            self.filtered_endpoints(filters)
                .map(|endpoint| ScoredEndpoint {
                    endpoint,
                    score: 0,
                    matched: Vec::new(),
                })
                .collect()
        } else {
            self.filtered_endpoints(filters)
                .filter_map(|endpoint| {
                    let matched = search_matches(endpoint, &needle);
                    (!matched.is_empty()).then(|| ScoredEndpoint {
                        endpoint,
                        score: matched.len(),
                        matched,
                    })
                })
                .collect()
        };
        scored.sort_by_key(|s| Reverse(s.score));
        PageResult::paginate(scored, page)
    }

    /// Models matching `filters`, in declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Validation`] when the filters are inconsistent.
    pub fn list_models(
        &self,
        filters: &ModelFilters,
        page: PageRequest,
    ) -> Result<PageResult<&ModelRecord>> {
        filters.validate()?;
        let matches: Vec<&ModelRecord> = self
            .model_candidates(filters)
            .into_iter()
            .map(|i| &self.models()[i])
            .filter(|m| filters.matches(m))
            .collect();
        Ok(PageResult::paginate(matches, page))
    }

    /// # Errors
    ///
    /// Returns [`IndexError::NotFound`] when no endpoint has exactly this path and method.
    pub fn get_endpoint_details(&self, path: &str, method: HttpMethod) -> Result<&EndpointRecord> {
        self.endpoint(path, method)
            .ok_or_else(|| IndexError::NotFound {
                kind: NotFoundKind::Endpoint,
                identifier: format!("{method} {path}"),
                api: Some(self.api_id().to_string()),
            })
    }

    /// # Errors
    ///
    /// Returns [`IndexError::NotFound`] when no model has exactly this name.
    pub fn get_model_schema(&self, name: &str) -> Result<&ModelRecord> {
        self.model(name).ok_or_else(|| IndexError::NotFound {
            kind: NotFoundKind::Model,
            identifier: name.to_string(),
            api: Some(self.api_id().to_string()),
        })
    }
}
