//! MCP tool surface: definitions (input schemas + annotations) and `tools/call` dispatch.

use crate::error::ExplorerError;
use crate::explorer::Explorer;
use indexmap::IndexMap;
use openapi_explorer_index::{
    EndpointFilters, HttpMethod, IndexError, ModelFilters, PageRequest, parse_list,
};
use rmcp::model::{CallToolResult, Content, JsonObject, Tool, ToolAnnotations};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use thiserror::Error;

/// Protocol-level tool failure (as opposed to an `isError` tool result).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
}

#[derive(Clone, Copy)]
enum Kind {
    /// Reads a (possibly remote) document.
    Explore,
    /// Reads the local registration store only.
    Registry,
    /// Writes the registration store.
    Register,
    /// Deletes from the registration store.
    Unregister,
}

fn annotations(title: &str, kind: Kind) -> ToolAnnotations {
    let (read_only, destructive, open_world) = match kind {
        Kind::Explore => (true, false, true),
        Kind::Registry => (true, false, false),
        Kind::Register => (false, false, false),
        Kind::Unregister => (false, true, false),
    };
    ToolAnnotations {
        title: Some(title.to_string()),
        read_only_hint: Some(read_only),
        destructive_hint: Some(destructive),
        idempotent_hint: Some(true),
        open_world_hint: Some(open_world),
    }
}

fn tool(name: &str, title: &str, description: &str, kind: Kind, schema: Value) -> Tool {
    let schema_obj = match schema {
        Value::Object(m) => m,
        _ => JsonObject::new(),
    };
    let mut tool = Tool::new(name.to_string(), description.to_string(), Arc::new(schema_obj));
    tool.annotations = Some(annotations(title, kind));
    tool
}

/// Input schema for tools that take `api` + `refresh` plus the given extra properties.
fn api_schema(extra: Value, required: &[&str]) -> Value {
    let mut properties = json!({
        "api": {
            "type": "string",
            "description": "Registered API name, or a direct http(s) URL to an OpenAPI document"
        },
        "refresh": {
            "type": "boolean",
            "description": "Re-fetch the document instead of using the cached index",
            "default": false
        }
    });
    if let (Some(props), Value::Object(extra)) = (properties.as_object_mut(), extra) {
        props.extend(extra);
    }
    let mut req = vec!["api"];
    req.extend_from_slice(required);
    json!({
        "type": "object",
        "properties": properties,
        "required": req
    })
}

fn page_properties() -> Value {
    json!({
        "page": {
            "type": "integer",
            "minimum": 1,
            "default": 1,
            "description": "1-indexed page number"
        },
        "page_size": {
            "type": "integer",
            "minimum": 1,
            "description": "Items per page (default 50, clamped to the server maximum)"
        }
    })
}

fn endpoint_filters_schema() -> Value {
    json!({
        "type": "object",
        "description": "All given criteria must match",
        "properties": {
            "methods": {
                "type": "array",
                "items": {"type": "string"},
                "description": "HTTP methods, e.g. [\"GET\", \"POST\"]"
            },
            "tags_include": {
                "type": "array",
                "items": {"type": "string"},
                "description": "Endpoint must carry at least one of these tags"
            },
            "tags_exclude": {
                "type": "array",
                "items": {"type": "string"},
                "description": "Endpoint must carry none of these tags"
            },
            "deprecated": {"type": "boolean"},
            "requires_auth": {"type": "boolean"}
        }
    })
}

fn model_filters_schema() -> Value {
    json!({
        "type": "object",
        "description": "All given criteria must match",
        "properties": {
            "types": {
                "type": "array",
                "items": {
                    "type": "string",
                    "enum": ["object", "array", "string", "number", "integer", "boolean", "enum"]
                }
            },
            "min_properties": {"type": "integer", "minimum": 0},
            "max_properties": {"type": "integer", "minimum": 0},
            "has_required_fields": {"type": "boolean"},
            "tags_include": {"type": "array", "items": {"type": "string"}},
            "tags_exclude": {"type": "array", "items": {"type": "string"}}
        }
    })
}

fn merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a), Value::Object(b)) => {
            a.extend(b);
            Value::Object(a)
        }
        (a, _) => a,
    }
}

/// Every tool this server exposes, in a stable order.
#[must_use]
pub fn tool_definitions() -> Vec<Tool> {
    vec![
        tool(
            "add_api",
            "Add API",
            "Register an OpenAPI document URL under a short name. Re-adding a name replaces it.",
            Kind::Register,
            json!({
                "type": "object",
                "properties": {
                    "name": {
                        "type": "string",
                        "description": "Short identifier used as `api` in other tools"
                    },
                    "url": {
                        "type": "string",
                        "description": "http(s) URL of the OpenAPI 3.x document (JSON or YAML)"
                    },
                    "description": {"type": "string"},
                    "headers": {
                        "type": "object",
                        "additionalProperties": {"type": "string"},
                        "description": "Headers sent when fetching the document"
                    }
                },
                "required": ["name", "url"]
            }),
        ),
        tool(
            "list_saved_apis",
            "List saved APIs",
            "List registered APIs.",
            Kind::Registry,
            json!({"type": "object", "properties": {}}),
        ),
        tool(
            "remove_api",
            "Remove API",
            "Remove a registered API and discard its cached index.",
            Kind::Unregister,
            json!({
                "type": "object",
                "properties": {"name": {"type": "string"}},
                "required": ["name"]
            }),
        ),
        tool(
            "get_api_info",
            "Get API info",
            "Title, version, servers, tags and endpoint/model counts of an API.",
            Kind::Explore,
            api_schema(json!({}), &[]),
        ),
        tool(
            "list_endpoints",
            "List endpoints",
            "List endpoints in declaration order, one page at a time, with optional filters.",
            Kind::Explore,
            api_schema(
                merge(json!({"filters": endpoint_filters_schema()}), page_properties()),
                &[],
            ),
        ),
        tool(
            "search_endpoints",
            "Search endpoints",
            "Case-insensitive search over path, operationId, summary, description and tags. \
             Results are ranked by the number of matching fields.",
            Kind::Explore,
            api_schema(
                merge(
                    json!({
                        "query": {"type": "string"},
                        "filters": endpoint_filters_schema()
                    }),
                    page_properties(),
                ),
                &["query"],
            ),
        ),
        tool(
            "get_endpoint_details",
            "Get endpoint details",
            "Parameters, request body, responses and security of one endpoint.",
            Kind::Explore,
            api_schema(
                json!({
                    "path": {
                        "type": "string",
                        "description": "Path template exactly as declared, e.g. /users/{id}"
                    },
                    "method": {"type": "string", "description": "HTTP method, case-insensitive"}
                }),
                &["path", "method"],
            ),
        ),
        tool(
            "list_models",
            "List models",
            "List data models (components.schemas) in declaration order, one page at a time.",
            Kind::Explore,
            api_schema(
                merge(
                    json!({
                        "filters": model_filters_schema(),
                        "include_details": {
                            "type": "boolean",
                            "default": false,
                            "description": "Include each model's properties"
                        }
                    }),
                    page_properties(),
                ),
                &[],
            ),
        ),
        tool(
            "get_model_schema",
            "Get model schema",
            "Normalized properties and the raw schema of one model.",
            Kind::Explore,
            api_schema(json!({"model_name": {"type": "string"}}), &["model_name"]),
        ),
    ]
}

#[derive(Debug, Deserialize)]
struct AddApiArgs {
    name: String,
    url: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    headers: IndexMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct NameArgs {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiArgs {
    api: String,
    #[serde(default)]
    refresh: bool,
}

#[derive(Debug, Default, Deserialize)]
struct PageArgs {
    #[serde(default)]
    page: Option<i64>,
    #[serde(default)]
    page_size: Option<i64>,
}

impl PageArgs {
    fn request(&self, max_page_size: usize) -> Result<PageRequest, IndexError> {
        PageRequest::new(self.page, self.page_size, max_page_size)
    }
}

#[derive(Debug, Default, Deserialize)]
struct EndpointFilterArgs {
    #[serde(default)]
    methods: Vec<String>,
    #[serde(default)]
    tags_include: Vec<String>,
    #[serde(default)]
    tags_exclude: Vec<String>,
    #[serde(default)]
    deprecated: Option<bool>,
    #[serde(default, alias = "has_authentication")]
    requires_auth: Option<bool>,
}

impl EndpointFilterArgs {
    fn into_filters(self) -> Result<EndpointFilters, IndexError> {
        Ok(EndpointFilters {
            methods: parse_list(&self.methods)?,
            tags_include: self.tags_include,
            tags_exclude: self.tags_exclude,
            deprecated: self.deprecated,
            requires_auth: self.requires_auth,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct ModelFilterArgs {
    #[serde(default)]
    types: Vec<String>,
    #[serde(default)]
    min_properties: Option<usize>,
    #[serde(default)]
    max_properties: Option<usize>,
    #[serde(default)]
    has_required_fields: Option<bool>,
    #[serde(default)]
    tags_include: Vec<String>,
    #[serde(default)]
    tags_exclude: Vec<String>,
}

impl ModelFilterArgs {
    fn into_filters(self) -> Result<ModelFilters, IndexError> {
        let filters = ModelFilters {
            types: parse_list(&self.types)?,
            min_properties: self.min_properties,
            max_properties: self.max_properties,
            has_required_fields: self.has_required_fields,
            tags_include: self.tags_include,
            tags_exclude: self.tags_exclude,
        };
        filters.validate()?;
        Ok(filters)
    }
}

#[derive(Debug, Deserialize)]
struct ListEndpointsArgs {
    #[serde(flatten)]
    api: ApiArgs,
    #[serde(flatten)]
    page: PageArgs,
    #[serde(default)]
    filters: Option<EndpointFilterArgs>,
}

#[derive(Debug, Deserialize)]
struct SearchEndpointsArgs {
    #[serde(flatten)]
    api: ApiArgs,
    query: String,
    #[serde(flatten)]
    page: PageArgs,
    #[serde(default)]
    filters: Option<EndpointFilterArgs>,
}

#[derive(Debug, Deserialize)]
struct EndpointDetailsArgs {
    #[serde(flatten)]
    api: ApiArgs,
    path: String,
    method: String,
}

#[derive(Debug, Deserialize)]
struct ListModelsArgs {
    #[serde(flatten)]
    api: ApiArgs,
    #[serde(flatten)]
    page: PageArgs,
    #[serde(default)]
    filters: Option<ModelFilterArgs>,
    #[serde(default)]
    include_details: bool,
}

#[derive(Debug, Deserialize)]
struct ModelSchemaArgs {
    #[serde(flatten)]
    api: ApiArgs,
    model_name: String,
}

fn args<T: DeserializeOwned>(tool: &str, arguments: &JsonObject) -> Result<T, ExplorerError> {
    serde_json::from_value(Value::Object(arguments.clone())).map_err(|e| {
        IndexError::Validation(format!("invalid arguments for '{tool}': {e}")).into()
    })
}

fn to_structured<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| json!({ "error": e.to_string() }))
}

/// Execute one `tools/call`.
///
/// Operation failures (unknown API, bad arguments, fetch errors) are returned as tool results
/// with `isError: true`.
///
/// # Errors
///
/// Returns [`ToolError::UnknownTool`] if `name` is not one of [`tool_definitions`].
pub async fn call_tool(
    explorer: &Explorer,
    name: &str,
    arguments: Option<JsonObject>,
) -> Result<CallToolResult, ToolError> {
    let arguments = arguments.unwrap_or_default();
    tracing::debug!(tool = %name, "Tool call");

    let outcome = match name {
        "add_api" => add_api(explorer, &arguments),
        "list_saved_apis" => Ok(json!({ "apis": to_structured(&explorer.list_saved_apis()) })),
        "remove_api" => remove_api(explorer, &arguments),
        "get_api_info" => get_api_info(explorer, &arguments).await,
        "list_endpoints" => list_endpoints(explorer, &arguments).await,
        "search_endpoints" => search_endpoints(explorer, &arguments).await,
        "get_endpoint_details" => get_endpoint_details(explorer, &arguments).await,
        "list_models" => list_models(explorer, &arguments).await,
        "get_model_schema" => get_model_schema(explorer, &arguments).await,
        other => return Err(ToolError::UnknownTool(other.to_string())),
    };

    Ok(match outcome {
        Ok(structured) => {
            let text = serde_json::to_string_pretty(&structured)
                .unwrap_or_else(|_| structured.to_string());
            CallToolResult {
                content: vec![Content::text(text)],
                structured_content: Some(structured),
                is_error: Some(false),
                meta: None,
            }
        }
        Err(e) => {
            tracing::debug!(tool = %name, error = %e, "Tool call failed");
            CallToolResult::error(vec![Content::text(format!("Error: {e}"))])
        }
    })
}

fn add_api(explorer: &Explorer, arguments: &JsonObject) -> Result<Value, ExplorerError> {
    let a: AddApiArgs = args("add_api", arguments)?;
    let added = explorer.add_api(&a.name, &a.url, a.description, a.headers)?;
    Ok(to_structured(&added))
}

fn remove_api(explorer: &Explorer, arguments: &JsonObject) -> Result<Value, ExplorerError> {
    let a: NameArgs = args("remove_api", arguments)?;
    let removed = explorer.remove_api(&a.name)?;
    Ok(json!({ "removed": to_structured(&removed) }))
}

async fn get_api_info(explorer: &Explorer, arguments: &JsonObject) -> Result<Value, ExplorerError> {
    let a: ApiArgs = args("get_api_info", arguments)?;
    let info = explorer.get_api_info(&a.api, a.refresh).await?;
    Ok(to_structured(&info))
}

async fn list_endpoints(
    explorer: &Explorer,
    arguments: &JsonObject,
) -> Result<Value, ExplorerError> {
    let a: ListEndpointsArgs = args("list_endpoints", arguments)?;
    let page = a.page.request(explorer.max_page_size())?;
    let filters = a.filters.unwrap_or_default().into_filters()?;
    let result = explorer
        .list_endpoints(&a.api.api, &filters, page, a.api.refresh)
        .await?;
    Ok(to_structured(&result))
}

async fn search_endpoints(
    explorer: &Explorer,
    arguments: &JsonObject,
) -> Result<Value, ExplorerError> {
    let a: SearchEndpointsArgs = args("search_endpoints", arguments)?;
    let page = a.page.request(explorer.max_page_size())?;
    let filters = a.filters.unwrap_or_default().into_filters()?;
    let result = explorer
        .search_endpoints(&a.api.api, &a.query, &filters, page, a.api.refresh)
        .await?;
    Ok(to_structured(&result))
}

async fn get_endpoint_details(
    explorer: &Explorer,
    arguments: &JsonObject,
) -> Result<Value, ExplorerError> {
    let a: EndpointDetailsArgs = args("get_endpoint_details", arguments)?;
    let method: HttpMethod = a.method.parse()?;
    let endpoint = explorer
        .get_endpoint_details(&a.api.api, &a.path, method, a.api.refresh)
        .await?;
    Ok(to_structured(&endpoint))
}

async fn list_models(explorer: &Explorer, arguments: &JsonObject) -> Result<Value, ExplorerError> {
    let a: ListModelsArgs = args("list_models", arguments)?;
    let page = a.page.request(explorer.max_page_size())?;
    let filters = a.filters.unwrap_or_default().into_filters()?;
    let result = explorer
        .list_models(&a.api.api, &filters, page, a.include_details, a.api.refresh)
        .await?;
    Ok(to_structured(&result))
}

async fn get_model_schema(
    explorer: &Explorer,
    arguments: &JsonObject,
) -> Result<Value, ExplorerError> {
    let a: ModelSchemaArgs = args("get_model_schema", arguments)?;
    let model = explorer
        .get_model_schema(&a.api.api, &a.model_name, a.api.refresh)
        .await?;
    Ok(to_structured(&model))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definitions_are_unique_and_object_schemas() {
        let tools = tool_definitions();
        let mut names: Vec<&str> = tools.iter().map(|t| &*t.name).collect();
        assert_eq!(names.len(), 9);
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 9);
        for t in &tools {
            assert_eq!(t.input_schema.get("type"), Some(&json!("object")), "{}", t.name);
            assert!(t.annotations.is_some());
        }
    }

    #[test]
    fn exploration_tools_take_api_and_refresh() {
        for t in tool_definitions() {
            if matches!(&*t.name, "add_api" | "list_saved_apis" | "remove_api") {
                continue;
            }
            let props = t.input_schema.get("properties").unwrap();
            assert!(props.get("api").is_some(), "{}", t.name);
            assert!(props.get("refresh").is_some(), "{}", t.name);
            let required = t.input_schema.get("required").unwrap().as_array().unwrap();
            assert_eq!(required[0], "api");
        }
    }

    #[test]
    fn list_args_accept_flattened_paging_and_nested_filters() {
        let raw = json!({
            "api": "petstore",
            "page": 2,
            "page_size": 10,
            "filters": {"methods": ["get"], "has_authentication": true}
        });
        let Value::Object(obj) = raw else { unreachable!() };
        let a: ListEndpointsArgs = args("list_endpoints", &obj).unwrap();
        assert_eq!(a.api.api, "petstore");
        assert!(!a.api.refresh);
        let page = a.page.request(100).unwrap();
        assert_eq!((page.page(), page.page_size()), (2, 10));
        let filters = a.filters.unwrap().into_filters().unwrap();
        assert_eq!(filters.methods, vec![HttpMethod::Get]);
        assert_eq!(filters.requires_auth, Some(true));
    }

    #[test]
    fn bad_filter_values_are_validation_errors() {
        let bad_method = EndpointFilterArgs {
            methods: vec!["FETCH".to_string()],
            ..EndpointFilterArgs::default()
        };
        assert!(matches!(
            bad_method.into_filters(),
            Err(IndexError::Validation(_))
        ));

        let bad_range = ModelFilterArgs {
            min_properties: Some(4),
            max_properties: Some(1),
            ..ModelFilterArgs::default()
        };
        assert!(matches!(
            bad_range.into_filters(),
            Err(IndexError::Validation(_))
        ));
    }
}
