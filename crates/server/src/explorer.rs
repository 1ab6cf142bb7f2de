//! Tool operations: registration store + fetcher + schema cache + query engine.

use crate::error::Result;
use crate::fetch::DocumentFetcher;
use crate::registry::{ApiRegistration, RegistrationStore, is_direct_url};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use openapi_explorer_index::{
    BuildMode, EndpointFilters, EndpointRecord, HttpMethod, IndexError, ModelFilters, ModelRecord,
    ModelType, PageRequest, PageResult, PropertyRecord, SchemaCache, SchemaIndex, SearchField,
};
use serde::Serialize;
use std::sync::Arc;
use url::Url;

/// A registration as shown to clients (headers omitted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedApi {
    pub name: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl From<ApiRegistration> for SavedApi {
    fn from(r: ApiRegistration) -> Self {
        Self {
            name: r.name,
            url: r.url,
            description: r.description,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddedApi {
    pub api: SavedApi,
    pub replaced: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiInfo {
    pub api: String,
    pub source_url: String,
    pub title: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub openapi_version: String,
    pub base_url: String,
    pub servers: Vec<String>,
    pub tags: Vec<String>,
    pub endpoint_count: usize,
    pub model_count: usize,
    pub source_fingerprint: String,
    pub built_at: DateTime<Utc>,
}

/// Compact endpoint row used by list and search results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSummary {
    pub path: String,
    pub method: HttpMethod,
    pub operation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub tags: Vec<String>,
    pub deprecated: bool,
    pub requires_auth: bool,
}

impl From<&EndpointRecord> for EndpointSummary {
    fn from(ep: &EndpointRecord) -> Self {
        Self {
            path: ep.path.clone(),
            method: ep.method,
            operation_id: ep.operation_id.clone(),
            summary: ep.summary.clone(),
            tags: ep.tags.clone(),
            deprecated: ep.deprecated,
            requires_auth: ep.requires_auth,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    #[serde(flatten)]
    pub endpoint: EndpointSummary,
    pub score: usize,
    pub matched: Vec<SearchField>,
}

/// Model row used by `list_models`; `properties` is only filled with `include_details`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub model_type: ModelType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub property_count: usize,
    pub required_count: usize,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Vec<PropertyRecord>>,
}

impl ModelSummary {
    fn from_record(m: &ModelRecord, include_details: bool) -> Self {
        Self {
            name: m.name.clone(),
            model_type: m.model_type,
            description: m.description.clone(),
            property_count: m.property_count,
            required_count: m.required_count,
            tags: m.tags.clone(),
            properties: include_details.then(|| m.properties.clone()),
        }
    }
}

struct ResolvedApi {
    id: String,
    url: String,
    headers: IndexMap<String, String>,
}

/// Entry point for every tool operation.
///
/// Arguments are expected to be validated already ([`PageRequest`], filters); the index is only
/// touched once they are.
pub struct Explorer {
    registry: RegistrationStore,
    cache: SchemaCache,
    fetcher: Arc<dyn DocumentFetcher>,
    max_page_size: usize,
}

impl Explorer {
    #[must_use]
    pub fn new(
        registry: RegistrationStore,
        fetcher: Arc<dyn DocumentFetcher>,
        max_page_size: usize,
    ) -> Self {
        Self {
            registry,
            cache: SchemaCache::new(),
            fetcher,
            max_page_size: max_page_size.max(1),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &RegistrationStore {
        &self.registry
    }

    #[must_use]
    pub fn cache(&self) -> &SchemaCache {
        &self.cache
    }

    #[must_use]
    pub fn max_page_size(&self) -> usize {
        self.max_page_size
    }

    /// Register (or replace) an API. Replacing drops the cached index for that name.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ExplorerError::Registry`] for invalid input or a failed write.
    pub fn add_api(
        &self,
        name: &str,
        url: &str,
        description: Option<String>,
        headers: IndexMap<String, String>,
    ) -> Result<AddedApi> {
        let reg = ApiRegistration::new(name, url, description, headers)?;
        let previous = self.registry.put(reg.clone())?;
        self.cache.invalidate(&reg.name);
        Ok(AddedApi {
            api: reg.into(),
            replaced: previous.is_some(),
        })
    }

    #[must_use]
    pub fn list_saved_apis(&self) -> Vec<SavedApi> {
        self.registry.list().into_iter().map(SavedApi::from).collect()
    }

    /// Remove a registration and discard its cached index.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown name, or
    /// [`crate::error::ExplorerError::Registry`] if the write fails.
    pub fn remove_api(&self, name: &str) -> Result<SavedApi> {
        let name = name.trim();
        let removed = self
            .registry
            .delete(name)?
            .ok_or_else(|| IndexError::api_not_found(name))?;
        self.cache.invalidate(name);
        Ok(removed.into())
    }

    fn resolve_api(&self, api: &str) -> Result<ResolvedApi> {
        let api = api.trim();
        if let Some(reg) = self.registry.get(api) {
            return Ok(ResolvedApi {
                id: reg.name,
                url: reg.url,
                headers: reg.headers,
            });
        }
        if is_direct_url(api) {
            return Ok(ResolvedApi {
                id: api.to_string(),
                url: api.to_string(),
                headers: IndexMap::new(),
            });
        }
        Err(IndexError::api_not_found(api).into())
    }

    async fn load(&self, api: &str, refresh: bool) -> Result<(String, Arc<SchemaIndex>)> {
        let ResolvedApi { id, url, headers } = self.resolve_api(api)?;
        let mode = if refresh {
            BuildMode::Refresh
        } else {
            BuildMode::Cached
        };
        let fetcher = Arc::clone(&self.fetcher);
        let fetch_url = url.clone();
        let index = self
            .cache
            .get_or_build(&id, mode, move || async move {
                fetcher.fetch(&fetch_url, &headers).await
            })
            .await?;
        Ok((url, index))
    }

    /// Index for `api` (registered name or direct URL), building it if needed.
    ///
    /// # Errors
    ///
    /// Returns not-found for an unknown name, or the fetch / parse error of the build.
    pub async fn index(&self, api: &str, refresh: bool) -> Result<Arc<SchemaIndex>> {
        Ok(self.load(api, refresh).await?.1)
    }

    /// # Errors
    ///
    /// See [`Explorer::index`].
    pub async fn get_api_info(&self, api: &str, refresh: bool) -> Result<ApiInfo> {
        let (source_url, index) = self.load(api, refresh).await?;
        let summary = index.summary();
        Ok(ApiInfo {
            api: index.api_id().to_string(),
            base_url: base_url(&source_url, &summary.servers),
            source_url,
            title: summary.title.clone(),
            version: summary.version.clone(),
            description: summary.description.clone(),
            openapi_version: summary.openapi_version.clone(),
            servers: summary.servers.clone(),
            tags: summary.tags.clone(),
            endpoint_count: index.endpoints().len(),
            model_count: index.models().len(),
            source_fingerprint: index.source_fingerprint().to_string(),
            built_at: index.built_at(),
        })
    }

    /// # Errors
    ///
    /// See [`Explorer::index`].
    pub async fn list_endpoints(
        &self,
        api: &str,
        filters: &EndpointFilters,
        page: PageRequest,
        refresh: bool,
    ) -> Result<PageResult<EndpointSummary>> {
        let index = self.index(api, refresh).await?;
        Ok(index
            .list_endpoints(filters, page)
            .map(EndpointSummary::from))
    }

    /// # Errors
    ///
    /// See [`Explorer::index`].
    pub async fn search_endpoints(
        &self,
        api: &str,
        query: &str,
        filters: &EndpointFilters,
        page: PageRequest,
        refresh: bool,
    ) -> Result<PageResult<SearchHit>> {
        let index = self.index(api, refresh).await?;
        Ok(index
            .search_endpoints(query, filters, page)
            .map(|hit| SearchHit {
                endpoint: hit.endpoint.into(),
                score: hit.score,
                matched: hit.matched,
            }))
    }

    /// # Errors
    ///
    /// Returns not-found when the API has no endpoint with exactly this path and method.
    pub async fn get_endpoint_details(
        &self,
        api: &str,
        path: &str,
        method: HttpMethod,
        refresh: bool,
    ) -> Result<EndpointRecord> {
        let index = self.index(api, refresh).await?;
        Ok(index.get_endpoint_details(path, method)?.clone())
    }

    /// # Errors
    ///
    /// Returns a validation error for inconsistent filters (before any fetch), otherwise see
    /// [`Explorer::index`].
    pub async fn list_models(
        &self,
        api: &str,
        filters: &ModelFilters,
        page: PageRequest,
        include_details: bool,
        refresh: bool,
    ) -> Result<PageResult<ModelSummary>> {
        filters.validate()?;
        let index = self.index(api, refresh).await?;
        Ok(index
            .list_models(filters, page)?
            .map(|m| ModelSummary::from_record(m, include_details)))
    }

    /// # Errors
    ///
    /// Returns not-found when the API has no model with exactly this name.
    pub async fn get_model_schema(
        &self,
        api: &str,
        model_name: &str,
        refresh: bool,
    ) -> Result<ModelRecord> {
        let index = self.index(api, refresh).await?;
        Ok(index.get_model_schema(model_name)?.clone())
    }
}

/// Base URL for calls: the first server resolved against the document URL, or the document
/// URL without its well-known file name.
fn base_url(source_url: &str, servers: &[String]) -> String {
    if let Some(server) = servers.first() {
        return Url::parse(source_url)
            .and_then(|base| base.join(server))
            .map(|u| u.to_string().trim_end_matches('/').to_string())
            .unwrap_or_else(|_| server.clone());
    }
    ["/openapi.json", "/openapi.yaml", "/openapi.yml", "/swagger.json"]
        .iter()
        .find_map(|suffix| source_url.strip_suffix(suffix))
        .unwrap_or(source_url)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_prefers_first_server() {
        let servers = vec!["/v2".to_string(), "https://other.test".to_string()];
        assert_eq!(
            base_url("http://127.0.0.1:8080/openapi.json", &servers),
            "http://127.0.0.1:8080/v2"
        );
        assert_eq!(
            base_url(
                "https://docs.test/openapi.json",
                &["https://api.test/v1/".to_string()]
            ),
            "https://api.test/v1"
        );
    }

    #[test]
    fn base_url_falls_back_to_document_location() {
        assert_eq!(
            base_url("https://api.test/v3/openapi.json", &[]),
            "https://api.test/v3"
        );
        assert_eq!(
            base_url("https://api.test/spec", &[]),
            "https://api.test/spec"
        );
    }
}
