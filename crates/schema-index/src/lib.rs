//! Normalized, queryable index over `OpenAPI` 3 documents.
//!
//! A raw document (JSON or YAML) is normalized into flat [`EndpointRecord`]s and
//! [`ModelRecord`]s, indexed into an immutable [`SchemaIndex`], and cached per API in a
//! [`SchemaCache`] that coalesces concurrent builds.

pub mod cache;
pub mod error;
pub mod index;
pub mod model;
pub mod normalizer;
pub mod query;
pub mod resolver;

pub use cache::{BuildMode, CacheStats, SchemaCache};
pub use error::{FetchError, IndexError, NotFoundKind, Result};
pub use index::{FetchedDocument, SchemaIndex, fingerprint};
pub use model::{
    ApiSummary, EndpointRecord, HttpMethod, ModelRecord, ModelType, ParameterLocation,
    ParameterRecord, PayloadRecord, PropertyRecord, ResolutionWarning, TypeDescriptor,
};
pub use normalizer::{DocumentFormat, NormalizedDocument, normalize};
pub use query::{
    DEFAULT_PAGE_SIZE, EndpointFilters, MAX_PAGE_SIZE, ModelFilters, PageRequest, PageResult,
    ScoredEndpoint, SearchField, parse_list,
};
