//! Canonical records produced by the normalizer.
//!
//! These are flat, document-independent shapes: an endpoint never points back into the source
//! document, and references to named schemas are kept as `ref` tokens instead of being expanded.

use crate::error::IndexError;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// HTTP methods an `OpenAPI` path item can declare operations for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 7] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Patch,
        HttpMethod::Delete,
        HttpMethod::Head,
        HttpMethod::Options,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HttpMethod::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                IndexError::Validation(format!(
                    "unknown HTTP method '{s}' \
                     (expected one of GET, POST, PUT, PATCH, DELETE, HEAD, OPTIONS)"
                ))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterLocation {
    Query,
    Path,
    Header,
    Cookie,
}

/// Coarse shape of a named model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    Object,
    Array,
    String,
    Number,
    Integer,
    Boolean,
    /// Scalar schema restricted to an explicit value list.
    Enum,
}

impl ModelType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ModelType::Object => "object",
            ModelType::Array => "array",
            ModelType::String => "string",
            ModelType::Number => "number",
            ModelType::Integer => "integer",
            ModelType::Boolean => "boolean",
            ModelType::Enum => "enum",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "object" => Ok(ModelType::Object),
            "array" => Ok(ModelType::Array),
            "string" => Ok(ModelType::String),
            "number" => Ok(ModelType::Number),
            "integer" => Ok(ModelType::Integer),
            "boolean" => Ok(ModelType::Boolean),
            "enum" => Ok(ModelType::Enum),
            _ => Err(IndexError::Validation(format!(
                "unknown model type '{s}' \
                 (expected one of object, array, string, number, integer, boolean, enum)"
            ))),
        }
    }
}

/// Structural description of a schema, with named models kept as reference tokens.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TypeDescriptor {
    Primitive {
        #[serde(rename = "type")]
        type_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        format: Option<String>,
    },
    Enum {
        values: Vec<Value>,
    },
    Array {
        items: Box<TypeDescriptor>,
    },
    Object {
        properties: Vec<PropertyRecord>,
        #[serde(
            rename = "additionalProperties",
            skip_serializing_if = "Option::is_none"
        )]
        additional_properties: Option<Box<TypeDescriptor>>,
    },
    /// Reference to a named model (`#/components/schemas/<name>`).
    Ref {
        name: String,
    },
    /// A reference back to a schema already being expanded on the current path.
    SelfRef {
        name: String,
    },
    OneOf {
        variants: Vec<TypeDescriptor>,
    },
    AnyOf {
        variants: Vec<TypeDescriptor>,
    },
    AllOf {
        variants: Vec<TypeDescriptor>,
    },
    Any,
    Unresolved {
        reference: String,
        reason: String,
    },
}

impl TypeDescriptor {
    #[must_use]
    pub fn primitive(type_name: &str, format: Option<String>) -> Self {
        TypeDescriptor::Primitive {
            type_name: type_name.to_string(),
            format,
        }
    }

    /// Collect the names of every named model this descriptor refers to, in first-seen order.
    pub fn collect_model_refs(&self, out: &mut Vec<String>) {
        match self {
            TypeDescriptor::Ref { name } | TypeDescriptor::SelfRef { name } => {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            TypeDescriptor::Array { items } => items.collect_model_refs(out),
            TypeDescriptor::Object {
                properties,
                additional_properties,
            } => {
                for p in properties {
                    p.descriptor.collect_model_refs(out);
                }
                if let Some(ap) = additional_properties {
                    ap.collect_model_refs(out);
                }
            }
            TypeDescriptor::OneOf { variants }
            | TypeDescriptor::AnyOf { variants }
            | TypeDescriptor::AllOf { variants } => {
                for v in variants {
                    v.collect_model_refs(out);
                }
            }
            TypeDescriptor::Primitive { .. }
            | TypeDescriptor::Enum { .. }
            | TypeDescriptor::Any
            | TypeDescriptor::Unresolved { .. } => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub descriptor: TypeDescriptor,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterRecord {
    pub name: String,
    pub location: ParameterLocation,
    pub required: bool,
    #[serde(rename = "type")]
    pub descriptor: TypeDescriptor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub deprecated: bool,
}

/// Request body or response payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Only meaningful for request bodies.
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<TypeDescriptor>,
}

/// A `$ref` that could not be followed while normalizing a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionWarning {
    /// Which field of the record is affected (e.g. `responses.200`).
    pub field: String,
    pub reference: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointRecord {
    pub path: String,
    pub method: HttpMethod,
    pub operation_id: String,
    /// `true` when the document did not declare an `operationId`.
    pub operation_id_synthesized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub parameters: Vec<ParameterRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<PayloadRecord>,
    pub responses: IndexMap<String, PayloadRecord>,
    pub deprecated: bool,
    pub requires_auth: bool,
    /// Security scheme names referenced by the effective security requirements.
    pub security: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ResolutionWarning>,
}

impl EndpointRecord {
    /// Named models referenced directly by parameters, request body or responses.
    #[must_use]
    pub fn referenced_models(&self) -> Vec<String> {
        let mut out = Vec::new();
        for p in &self.parameters {
            p.descriptor.collect_model_refs(&mut out);
        }
        let payloads = self.request_body.iter().chain(self.responses.values());
        for schema in payloads.filter_map(|p| p.schema.as_ref()) {
            schema.collect_model_refs(&mut out);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub model_type: ModelType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub properties: Vec<PropertyRecord>,
    pub required_count: usize,
    pub property_count: usize,
    pub tags: Vec<String>,
    /// The schema exactly as declared in the document.
    pub schema: Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ResolutionWarning>,
}

impl ModelRecord {
    /// Build a record, deriving the property counters from `properties`.
    #[must_use]
    pub fn new(
        name: String,
        model_type: ModelType,
        description: Option<String>,
        properties: Vec<PropertyRecord>,
        schema: Value,
        warnings: Vec<ResolutionWarning>,
    ) -> Self {
        let required_count = properties.iter().filter(|p| p.required).count();
        let property_count = properties.len();
        Self {
            name,
            model_type,
            description,
            properties,
            required_count,
            property_count,
            tags: Vec::new(),
            schema,
            warnings,
        }
    }

    /// Named models referenced from this model's properties.
    #[must_use]
    pub fn referenced_models(&self) -> Vec<String> {
        let mut out = Vec::new();
        for p in &self.properties {
            p.descriptor.collect_model_refs(&mut out);
        }
        out
    }
}

/// Document-level information (`info`, `servers`, `tags`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSummary {
    pub title: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub openapi_version: String,
    pub servers: Vec<String>,
    pub tags: Vec<String>,
}

/// Append `tag` unless already present, keeping first-seen order.
pub(crate) fn push_unique(tags: &mut Vec<String>, tag: &str) {
    if !tags.iter().any(|t| t == tag) {
        tags.push(tag.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn http_method_parses_case_insensitively() {
        assert_eq!("get".parse::<HttpMethod>().unwrap(), HttpMethod::Get);
        assert_eq!(" Patch ".parse::<HttpMethod>().unwrap(), HttpMethod::Patch);
        let err = "TRACE".parse::<HttpMethod>().unwrap_err();
        assert!(matches!(err, IndexError::Validation(_)));
    }

    #[test]
    fn model_type_rejects_unknown_names() {
        assert_eq!("ENUM".parse::<ModelType>().unwrap(), ModelType::Enum);
        assert!("map".parse::<ModelType>().is_err());
    }

    #[test]
    fn model_record_derives_counts() {
        let props = vec![
            PropertyRecord {
                name: "id".to_string(),
                descriptor: TypeDescriptor::primitive("integer", None),
                required: true,
                description: None,
            },
            PropertyRecord {
                name: "name".to_string(),
                descriptor: TypeDescriptor::primitive("string", None),
                required: false,
                description: None,
            },
        ];
        let m = ModelRecord::new(
            "Pet".to_string(),
            ModelType::Object,
            None,
            props,
            json!({}),
            Vec::new(),
        );
        assert_eq!(m.property_count, 2);
        assert_eq!(m.required_count, 1);
    }

    #[test]
    fn type_descriptor_serializes_with_kind_tag() {
        let d = TypeDescriptor::Array {
            items: Box::new(TypeDescriptor::Ref {
                name: "Pet".to_string(),
            }),
        };
        assert_eq!(
            serde_json::to_value(&d).unwrap(),
            json!({"kind": "array", "items": {"kind": "ref", "name": "Pet"}})
        );
    }

    #[test]
    fn collect_model_refs_dedups_in_order() {
        let d = TypeDescriptor::OneOf {
            variants: vec![
                TypeDescriptor::Ref {
                    name: "B".to_string(),
                },
                TypeDescriptor::Array {
                    items: Box::new(TypeDescriptor::Ref {
                        name: "A".to_string(),
                    }),
                },
                TypeDescriptor::Ref {
                    name: "B".to_string(),
                },
            ],
        };
        let mut out = Vec::new();
        d.collect_model_refs(&mut out);
        assert_eq!(out, vec!["B".to_string(), "A".to_string()]);
    }
}
