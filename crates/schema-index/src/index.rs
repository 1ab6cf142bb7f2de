//! Immutable per-API index over normalized records.

use crate::error::{IndexError, Result};
use crate::model::{ApiSummary, EndpointRecord, HttpMethod, ModelRecord, ModelType};
use crate::normalizer::{self, NormalizedDocument};
use chrono::{DateTime, Utc};
use sha2::{Digest as _, Sha256};
use std::collections::HashMap;

/// Raw document bytes as returned by a fetch collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedDocument {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl FetchedDocument {
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>, content_type: Option<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type,
        }
    }

    /// `sha256:<hex>` of the raw bytes.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.bytes)
    }
}

#[must_use]
pub fn fingerprint(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

/// Normalized, queryable view of one API's document.
///
/// Records are stored in declaration order; the secondary indices hold positions into those
/// vectors, sorted ascending.
#[derive(Debug)]
pub struct SchemaIndex {
    api_id: String,
    source_fingerprint: String,
    built_at: DateTime<Utc>,
    summary: ApiSummary,
    endpoints: Vec<EndpointRecord>,
    models: Vec<ModelRecord>,

    endpoint_lookup: HashMap<(String, HttpMethod), usize>,
    model_lookup: HashMap<String, usize>,
    pub(crate) endpoints_by_method: HashMap<HttpMethod, Vec<usize>>,
    pub(crate) endpoints_by_tag: HashMap<String, Vec<usize>>,
    pub(crate) deprecated_endpoints: Vec<usize>,
    pub(crate) models_by_type: HashMap<ModelType, Vec<usize>>,
    pub(crate) models_by_tag: HashMap<String, Vec<usize>>,
}

impl SchemaIndex {
    /// Parse, normalize and index a fetched document.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Parse`] or [`IndexError::UnsupportedVersion`] when the document
    /// cannot be normalized.
    pub fn build(api_id: impl Into<String>, document: &FetchedDocument) -> Result<Self> {
        let api_id = api_id.into();
        let normalized = normalizer::normalize(&document.bytes, document.content_type.as_deref())?;
        Self::from_normalized(api_id, document.fingerprint(), normalized)
    }

    /// Index already-normalized records.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Parse`] if two endpoints share `(path, method)` or two models share
    /// a name.
    pub fn from_normalized(
        api_id: String,
        source_fingerprint: String,
        normalized: NormalizedDocument,
    ) -> Result<Self> {
        let NormalizedDocument {
            summary,
            endpoints,
            models,
        } = normalized;

        let mut endpoint_lookup = HashMap::with_capacity(endpoints.len());
        let mut endpoints_by_method: HashMap<HttpMethod, Vec<usize>> = HashMap::new();
        let mut endpoints_by_tag: HashMap<String, Vec<usize>> = HashMap::new();
        let mut deprecated_endpoints = Vec::new();
        for (i, ep) in endpoints.iter().enumerate() {
            if endpoint_lookup
                .insert((ep.path.clone(), ep.method), i)
                .is_some()
            {
                return Err(IndexError::Parse(format!(
                    "duplicate endpoint {} {}",
                    ep.method, ep.path
                )));
            }
            endpoints_by_method.entry(ep.method).or_default().push(i);
            for tag in &ep.tags {
                endpoints_by_tag.entry(tag.clone()).or_default().push(i);
            }
            if ep.deprecated {
                deprecated_endpoints.push(i);
            }
        }

        let mut model_lookup = HashMap::with_capacity(models.len());
        let mut models_by_type: HashMap<ModelType, Vec<usize>> = HashMap::new();
        let mut models_by_tag: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, m) in models.iter().enumerate() {
            if model_lookup.insert(m.name.clone(), i).is_some() {
                return Err(IndexError::Parse(format!("duplicate model '{}'", m.name)));
            }
            models_by_type.entry(m.model_type).or_default().push(i);
            for tag in &m.tags {
                models_by_tag.entry(tag.clone()).or_default().push(i);
            }
        }

        let warning_count: usize = endpoints.iter().map(|e| e.warnings.len()).sum::<usize>()
            + models.iter().map(|m| m.warnings.len()).sum::<usize>();
        for w in endpoints
            .iter()
            .flat_map(|e| e.warnings.iter())
            .chain(models.iter().flat_map(|m| m.warnings.iter()))
        {
            tracing::warn!(
                api = %api_id,
                field = %w.field,
                reference = %w.reference,
                "Unresolved reference: {}",
                w.message
            );
        }
        tracing::info!(
            api = %api_id,
            fingerprint = %source_fingerprint,
            endpoints = endpoints.len(),
            models = models.len(),
            warnings = warning_count,
            "Built schema index"
        );

        Ok(Self {
            api_id,
            source_fingerprint,
            built_at: Utc::now(),
            summary,
            endpoints,
            models,
            endpoint_lookup,
            model_lookup,
            endpoints_by_method,
            endpoints_by_tag,
            deprecated_endpoints,
            models_by_type,
            models_by_tag,
        })
    }

    #[must_use]
    pub fn api_id(&self) -> &str {
        &self.api_id
    }

    #[must_use]
    pub fn source_fingerprint(&self) -> &str {
        &self.source_fingerprint
    }

    #[must_use]
    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    #[must_use]
    pub fn summary(&self) -> &ApiSummary {
        &self.summary
    }

    #[must_use]
    pub fn endpoints(&self) -> &[EndpointRecord] {
        &self.endpoints
    }

    #[must_use]
    pub fn models(&self) -> &[ModelRecord] {
        &self.models
    }

    #[must_use]
    pub fn endpoint(&self, path: &str, method: HttpMethod) -> Option<&EndpointRecord> {
        self.endpoint_lookup
            .get(&(path.to_string(), method))
            .map(|&i| &self.endpoints[i])
    }

    #[must_use]
    pub fn model(&self, name: &str) -> Option<&ModelRecord> {
        self.model_lookup.get(name).map(|&i| &self.models[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
openapi: 3.0.0
info: {title: Tiny, version: "1"}
paths:
  /a:
    get:
      tags: [x]
      responses: {}
    delete:
      deprecated: true
      responses: {}
components:
  schemas:
    A:
      type: object
"#;

    #[test]
    fn build_indexes_records_and_fingerprint() {
        let doc = FetchedDocument::new(DOC, None);
        let index = SchemaIndex::build("tiny", &doc).unwrap();
        assert_eq!(index.api_id(), "tiny");
        assert_eq!(index.source_fingerprint(), fingerprint(DOC.as_bytes()));
        assert!(index.source_fingerprint().starts_with("sha256:"));
        assert_eq!(index.endpoints().len(), 2);
        assert!(index.endpoint("/a", HttpMethod::Delete).unwrap().deprecated);
        assert!(index.endpoint("/a", HttpMethod::Post).is_none());
        assert_eq!(index.model("A").unwrap().model_type, ModelType::Object);
        assert_eq!(index.deprecated_endpoints, vec![1]);
        assert_eq!(index.endpoints_by_tag["x"], vec![0]);
        assert_eq!(index.summary().title, "Tiny");
    }

    #[test]
    fn fingerprint_is_stable() {
        assert_eq!(fingerprint(b"abc"), fingerprint(b"abc"));
        assert_ne!(fingerprint(b"abc"), fingerprint(b"abd"));
        assert_eq!(
            fingerprint(b""),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
