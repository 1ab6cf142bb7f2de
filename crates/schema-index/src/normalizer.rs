//! Raw `OpenAPI` document → flat endpoint / model records.
//!
//! The document is parsed once into a `serde_json::Value`, which is kept for `$ref` lookups and
//! for declaration order. Paths, operations, parameters and payloads are read straight from that
//! value. Only schemas go through typed `openapiv3` parsing, one schema at a time, so a schema the
//! typed model rejects degrades the field it belongs to and nothing else. `OpenAPI` 3.1 schema
//! forms that `openapiv3` does not model are rewritten into their 3.0 equivalents first.

use crate::error::{IndexError, Result};
use crate::model::{
    ApiSummary, EndpointRecord, HttpMethod, ModelRecord, ModelType, ParameterLocation,
    ParameterRecord, PayloadRecord, PropertyRecord, ResolutionWarning, TypeDescriptor, push_unique,
};
use crate::resolver::{RefResolver, component_schema_name, component_schema_pointer};
use indexmap::IndexMap;
use openapiv3::{
    AdditionalProperties, AnySchema, ReferenceOr, Schema, SchemaKind, Type, VariantOrUnknownOrEmpty,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};

/// Serialization format of a raw document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    /// JSON when the declared content type mentions `json` or the body starts with `{`;
    /// YAML otherwise.
    #[must_use]
    pub fn sniff(bytes: &[u8], content_type: Option<&str>) -> Self {
        if content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("json")) {
            return DocumentFormat::Json;
        }
        match strip_bom(bytes).iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'{') => DocumentFormat::Json,
            _ => DocumentFormat::Yaml,
        }
    }
}

/// Output of [`normalize`].
#[derive(Debug, Clone)]
pub struct NormalizedDocument {
    pub summary: ApiSummary,
    pub endpoints: Vec<EndpointRecord>,
    pub models: Vec<ModelRecord>,
}

/// Parse raw bytes into a JSON value.
///
/// # Errors
///
/// Returns [`IndexError::Parse`] when the bytes are not valid in the given format.
pub fn parse_document(bytes: &[u8], format: DocumentFormat) -> Result<Value> {
    let bytes = strip_bom(bytes);
    match format {
        DocumentFormat::Json => serde_json::from_slice(bytes)
            .map_err(|e| IndexError::Parse(format!("invalid JSON: {e}"))),
        DocumentFormat::Yaml => serde_yaml::from_slice::<Value>(bytes)
            .map_err(|e| IndexError::Parse(format!("invalid YAML: {e}"))),
    }
}

/// Normalize a raw document.
///
/// # Errors
///
/// Returns [`IndexError::Parse`] for malformed input and [`IndexError::UnsupportedVersion`] for
/// anything that is not an `OpenAPI` 3.x document. Unresolvable `$ref`s and schemas that cannot
/// be read never fail the call; they are recorded as warnings on the affected records.
pub fn normalize(bytes: &[u8], content_type: Option<&str>) -> Result<NormalizedDocument> {
    let format = DocumentFormat::sniff(bytes, content_type);
    let root = parse_document(bytes, format)?;
    normalize_value(&root)
}

/// Normalize an already-parsed document.
///
/// # Errors
///
/// See [`normalize`].
pub fn normalize_value(root: &Value) -> Result<NormalizedDocument> {
    let openapi_version = check_version(root)?;

    let mut normalizer = Normalizer::new(RefResolver::new(root));
    let endpoints = normalizer.endpoints();
    let mut models = normalizer.models();
    assign_model_tags(&endpoints, &mut models);

    let info = root.get("info");
    Ok(NormalizedDocument {
        summary: ApiSummary {
            title: info.and_then(|i| text(i, "title")).unwrap_or_default(),
            version: info.and_then(|i| text(i, "version")).unwrap_or_default(),
            description: info.and_then(|i| text(i, "description")),
            openapi_version,
            servers: names_of(root.get("servers"), "url"),
            tags: names_of(root.get("tags"), "name"),
        },
        endpoints,
        models,
    })
}

fn check_version(root: &Value) -> Result<String> {
    let obj = root
        .as_object()
        .ok_or_else(|| IndexError::Parse("document root is not a mapping".to_string()))?;
    if let Some(v) = obj.get("swagger") {
        return Err(IndexError::UnsupportedVersion(version_text(v)));
    }
    match obj.get("openapi") {
        Some(Value::String(s)) if s.trim().split('.').next() == Some("3") => {
            Ok(s.trim().to_string())
        }
        Some(v) => Err(IndexError::UnsupportedVersion(version_text(v))),
        None => Err(IndexError::UnsupportedVersion(
            "<missing 'openapi' field>".to_string(),
        )),
    }
}

fn version_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes)
}

fn text(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn flag(value: &Value, key: &str) -> bool {
    value.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn array<'v>(value: &'v Value, key: &str) -> &'v [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map_or(&[][..], Vec::as_slice)
}

/// `key` of every object in a list such as `servers` or `tags`.
fn names_of(list: Option<&Value>, key: &str) -> Vec<String> {
    list.and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|entry| text(entry, key))
        .collect()
}

/// Parse one schema (or `$ref` to one) into the typed model.
fn parse_schema(raw: &Value) -> Result<ReferenceOr<Schema>> {
    let mut value = raw.clone();
    downgrade_schema(&mut value);
    serde_json::from_value(value).map_err(|e| IndexError::Parse(format!("invalid schema: {e}")))
}

/// Rewrite `OpenAPI` 3.1 (JSON Schema 2020-12) forms into the 3.0 shapes `openapiv3` reads.
///
/// - `type: [T, "null"]` becomes `type: T` with `nullable: true`; the first non-null member wins.
/// - numeric `exclusiveMinimum` / `exclusiveMaximum` become `minimum` / `maximum` plus the
///   boolean flag.
fn downgrade_schema(value: &mut Value) {
    match value {
        Value::Object(map) => {
            downgrade_type_list(map);
            downgrade_exclusive_bound(map, "exclusiveMinimum", "minimum");
            downgrade_exclusive_bound(map, "exclusiveMaximum", "maximum");
            for child in map.values_mut() {
                downgrade_schema(child);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(downgrade_schema),
        _ => {}
    }
}

fn downgrade_type_list(map: &mut Map<String, Value>) {
    let Some(Value::Array(types)) = map.get("type") else {
        return;
    };
    let nullable = types.iter().any(|t| t.as_str() == Some("null"));
    let first = types
        .iter()
        .filter_map(Value::as_str)
        .find(|t| *t != "null")
        .map(str::to_string);
    match first {
        Some(t) => {
            map.insert("type".to_string(), Value::String(t));
        }
        None => {
            map.remove("type");
        }
    }
    if nullable {
        map.insert("nullable".to_string(), Value::Bool(true));
    }
}

fn downgrade_exclusive_bound(map: &mut Map<String, Value>, exclusive: &str, inclusive: &str) {
    let Some(bound) = map.get(exclusive).filter(|v| v.is_number()).cloned() else {
        return;
    };
    map.insert(inclusive.to_string(), bound);
    map.insert(exclusive.to_string(), Value::Bool(true));
}

struct Normalizer<'a> {
    resolver: RefResolver<'a>,
    /// Pointers currently being expanded on this path.
    stack: Vec<String>,
    /// Warnings for the record being built.
    warnings: Vec<ResolutionWarning>,
}

impl<'a> Normalizer<'a> {
    fn new(resolver: RefResolver<'a>) -> Self {
        Self {
            resolver,
            stack: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn note(&mut self, field: &str, reference: String, message: String) {
        self.warnings.push(ResolutionWarning {
            field: field.to_string(),
            reference,
            message,
        });
    }

    fn warn(&mut self, field: &str, err: &IndexError) {
        match err {
            IndexError::UnresolvedReference { reference, reason } => {
                self.note(field, reference.clone(), reason.clone());
            }
            other => self.note(field, String::new(), other.to_string()),
        }
    }

    fn unresolved(&mut self, field: &str, err: &IndexError) -> TypeDescriptor {
        self.warn(field, err);
        match err {
            IndexError::UnresolvedReference { reference, reason } => TypeDescriptor::Unresolved {
                reference: reference.clone(),
                reason: reason.clone(),
            },
            other => TypeDescriptor::Unresolved {
                reference: String::new(),
                reason: other.to_string(),
            },
        }
    }

    // ---- endpoints ----

    fn endpoints(&mut self) -> Vec<EndpointRecord> {
        let root = self.resolver.root();
        let mut out = Vec::new();
        let mut used_ids: HashSet<String> = HashSet::new();
        let Some(paths) = root.get("paths").and_then(Value::as_object) else {
            return out;
        };

        for (path, raw_item) in paths {
            let item = match self.resolver.follow(raw_item) {
                Ok((item, _)) => item,
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "Skipping unresolvable path item");
                    continue;
                }
            };
            let path_params = array(item, "parameters");
            for (key, op) in item.as_object().into_iter().flatten() {
                let Some(method) = method_for_key(key) else {
                    continue;
                };
                if !op.is_object() {
                    tracing::warn!(path = %path, method = %method, "Skipping malformed operation");
                    continue;
                }
                out.push(self.endpoint(path, method, path_params, op, &mut used_ids));
            }
        }
        out
    }

    fn endpoint(
        &mut self,
        path: &str,
        method: HttpMethod,
        path_params: &'a [Value],
        op: &'a Value,
        used_ids: &mut HashSet<String>,
    ) -> EndpointRecord {
        let declared = op
            .get("operationId")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty());
        let base_id =
            declared.map_or_else(|| synthesize_operation_id(method, path), str::to_string);
        let operation_id = reserve_unique_id(used_ids, &base_id);
        if operation_id != base_id {
            tracing::debug!(
                "operationId '{}' already used; {} {} gets '{}'",
                base_id,
                method,
                path,
                operation_id
            );
        }

        let parameters = self.parameters(path_params, array(op, "parameters"));
        let request_body = op.get("requestBody").map(|b| self.request_body(b));
        let responses = op
            .get("responses")
            .map(|r| self.responses(r))
            .unwrap_or_default();

        let requirements = op
            .get("security")
            .or_else(|| self.resolver.root().get("security"))
            .and_then(Value::as_array);
        // Requirements are alternatives; an empty one allows anonymous access.
        let requires_auth = requirements.is_some_and(|reqs| {
            !reqs.is_empty()
                && reqs
                    .iter()
                    .all(|r| r.as_object().is_some_and(|o| !o.is_empty()))
        });
        let mut security = Vec::new();
        let schemes = requirements
            .into_iter()
            .flatten()
            .filter_map(Value::as_object)
            .flat_map(|r| r.keys());
        for name in schemes {
            push_unique(&mut security, name);
        }

        let mut tags = Vec::new();
        for tag in array(op, "tags").iter().filter_map(Value::as_str) {
            push_unique(&mut tags, tag);
        }

        EndpointRecord {
            path: path.to_string(),
            method,
            operation_id,
            operation_id_synthesized: declared.is_none(),
            summary: text(op, "summary"),
            description: text(op, "description"),
            tags,
            parameters,
            request_body,
            responses,
            deprecated: flag(op, "deprecated"),
            requires_auth,
            security,
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    /// Operation-level parameters override path-level ones with the same name and location,
    /// keeping the path-level position.
    fn parameters(
        &mut self,
        path_level: &'a [Value],
        operation_level: &'a [Value],
    ) -> Vec<ParameterRecord> {
        let mut merged: Vec<ParameterRecord> = Vec::new();
        let mut index: HashMap<(ParameterLocation, String), usize> = HashMap::new();

        for p in path_level.iter().chain(operation_level) {
            let Some(record) = self.parameter(p) else {
                continue;
            };
            let key = (record.location, record.name.clone());
            if let Some(i) = index.get(&key).copied() {
                merged[i] = record;
            } else {
                index.insert(key, merged.len());
                merged.push(record);
            }
        }
        merged
    }

    fn parameter(&mut self, p: &'a Value) -> Option<ParameterRecord> {
        let param = match self.resolver.follow(p) {
            Ok((param, _)) => param,
            Err(e) => {
                self.warn("parameters", &e);
                return None;
            }
        };
        let Some(name) = param.get("name").and_then(Value::as_str) else {
            self.note("parameters", String::new(), "parameter without a name".to_string());
            return None;
        };
        let location = match param.get("in").and_then(Value::as_str) {
            Some("query") => ParameterLocation::Query,
            Some("path") => ParameterLocation::Path,
            Some("header") => ParameterLocation::Header,
            Some("cookie") => ParameterLocation::Cookie,
            other => {
                let message = format!("parameter '{name}' has unknown location {other:?}");
                self.note("parameters", String::new(), message);
                return None;
            }
        };

        let field = format!("parameters.{name}");
        let schema = param.get("schema").or_else(|| {
            param
                .get("content")
                .and_then(Value::as_object)
                .and_then(|content| content.values().find_map(|m| m.get("schema")))
        });
        let descriptor = schema.map_or(TypeDescriptor::Any, |s| self.describe_value(s, &field));

        Some(ParameterRecord {
            name: name.to_string(),
            location,
            required: flag(param, "required") || location == ParameterLocation::Path,
            descriptor,
            description: text(param, "description"),
            deprecated: flag(param, "deprecated"),
        })
    }

    fn request_body(&mut self, b: &'a Value) -> PayloadRecord {
        const FIELD: &str = "requestBody";
        match self.resolver.follow(b) {
            Ok((body, _)) => {
                let (content_type, schema) = self.payload_schema(body.get("content"), FIELD);
                PayloadRecord {
                    description: text(body, "description"),
                    required: flag(body, "required"),
                    content_type,
                    schema,
                }
            }
            Err(e) => PayloadRecord {
                description: None,
                required: false,
                content_type: None,
                schema: Some(self.unresolved(FIELD, &e)),
            },
        }
    }

    fn responses(&mut self, responses: &'a Value) -> IndexMap<String, PayloadRecord> {
        let mut out = IndexMap::new();
        for (code, r) in responses.as_object().into_iter().flatten() {
            if code.starts_with("x-") {
                continue;
            }
            // `4xx` and `4XX` are the same range.
            let key = if code.eq_ignore_ascii_case("default") {
                "default".to_string()
            } else {
                code.to_ascii_uppercase()
            };
            let record = self.response(r, &format!("responses.{key}"));
            out.insert(key, record);
        }
        out
    }

    fn response(&mut self, r: &'a Value, field: &str) -> PayloadRecord {
        match self.resolver.follow(r) {
            Ok((resp, _)) => {
                let (content_type, schema) = self.payload_schema(resp.get("content"), field);
                PayloadRecord {
                    description: text(resp, "description").filter(|d| !d.is_empty()),
                    required: false,
                    content_type,
                    schema,
                }
            }
            Err(e) => PayloadRecord {
                description: None,
                required: false,
                content_type: None,
                schema: Some(self.unresolved(field, &e)),
            },
        }
    }

    fn payload_schema(
        &mut self,
        content: Option<&'a Value>,
        field: &str,
    ) -> (Option<String>, Option<TypeDescriptor>) {
        let Some((content_type, media)) = content.and_then(Value::as_object).and_then(pick_media)
        else {
            return (None, None);
        };
        let schema = media.get("schema").map(|s| self.describe_value(s, field));
        (Some(content_type.clone()), schema)
    }

    // ---- type descriptors ----

    fn describe(&mut self, r: &ReferenceOr<Schema>, field: &str) -> TypeDescriptor {
        match r {
            ReferenceOr::Reference { reference } => self.describe_reference(reference, field),
            ReferenceOr::Item(s) => self.describe_schema(s, field),
        }
    }

    /// Describe a raw schema node; a node the typed model rejects becomes `Unresolved`.
    fn describe_value(&mut self, raw: &Value, field: &str) -> TypeDescriptor {
        match parse_schema(raw) {
            Ok(schema) => self.describe(&schema, field),
            Err(e) => self.unresolved(field, &e),
        }
    }

    fn describe_boxed(&mut self, r: &ReferenceOr<Box<Schema>>, field: &str) -> TypeDescriptor {
        match r {
            ReferenceOr::Reference { reference } => self.describe_reference(reference, field),
            ReferenceOr::Item(s) => self.describe_schema(s, field),
        }
    }

    fn describe_reference(&mut self, reference: &str, field: &str) -> TypeDescriptor {
        let on_path = self.stack.iter().any(|p| p == reference);

        if let Some(name) = component_schema_name(reference) {
            if on_path {
                return TypeDescriptor::SelfRef { name };
            }
            return match self.resolver.lookup(reference) {
                Ok(_) => TypeDescriptor::Ref { name },
                Err(e) => self.unresolved(field, &e),
            };
        }

        if on_path {
            return TypeDescriptor::SelfRef {
                name: reference.to_string(),
            };
        }
        let target = self
            .resolver
            .lookup(reference)
            .and_then(|v| schema_target(reference, v));
        match target {
            Ok(target) => {
                self.stack.push(reference.to_string());
                let d = self.describe(&target, field);
                self.stack.pop();
                d
            }
            Err(e) => self.unresolved(field, &e),
        }
    }

    fn describe_schema(&mut self, schema: &Schema, field: &str) -> TypeDescriptor {
        match &schema.schema_kind {
            SchemaKind::Type(Type::String(s)) => {
                if s.enumeration.is_empty() {
                    TypeDescriptor::primitive("string", format_name(&s.format))
                } else {
                    TypeDescriptor::Enum {
                        values: s
                            .enumeration
                            .iter()
                            .map(|v| v.clone().map_or(Value::Null, Value::String))
                            .collect(),
                    }
                }
            }
            SchemaKind::Type(Type::Number(n)) => {
                if n.enumeration.is_empty() {
                    TypeDescriptor::primitive("number", format_name(&n.format))
                } else {
                    TypeDescriptor::Enum {
                        values: n
                            .enumeration
                            .iter()
                            .map(|v| v.map_or(Value::Null, Value::from))
                            .collect(),
                    }
                }
            }
            SchemaKind::Type(Type::Integer(i)) => {
                if i.enumeration.is_empty() {
                    TypeDescriptor::primitive("integer", format_name(&i.format))
                } else {
                    TypeDescriptor::Enum {
                        values: i
                            .enumeration
                            .iter()
                            .map(|v| v.map_or(Value::Null, Value::from))
                            .collect(),
                    }
                }
            }
            SchemaKind::Type(Type::Boolean(_)) => TypeDescriptor::primitive("boolean", None),
            SchemaKind::Type(Type::Array(a)) => TypeDescriptor::Array {
                items: Box::new(
                    a.items
                        .as_ref()
                        .map_or(TypeDescriptor::Any, |i| self.describe_boxed(i, field)),
                ),
            },
            SchemaKind::Type(Type::Object(o)) => TypeDescriptor::Object {
                properties: self.property_records(&o.properties, &o.required, field),
                additional_properties: self
                    .additional_properties(o.additional_properties.as_ref(), field),
            },
            SchemaKind::OneOf { one_of } => TypeDescriptor::OneOf {
                variants: self.describe_all(one_of, field),
            },
            SchemaKind::AnyOf { any_of } => TypeDescriptor::AnyOf {
                variants: self.describe_all(any_of, field),
            },
            SchemaKind::AllOf { all_of } => TypeDescriptor::AllOf {
                variants: self.describe_all(all_of, field),
            },
            SchemaKind::Not { .. } => TypeDescriptor::Any,
            SchemaKind::Any(a) => self.describe_any(a, field),
        }
    }

    fn describe_any(&mut self, a: &AnySchema, field: &str) -> TypeDescriptor {
        if !a.enumeration.is_empty() {
            return TypeDescriptor::Enum {
                values: a.enumeration.clone(),
            };
        }
        let object_like = !a.properties.is_empty() || a.additional_properties.is_some();
        match a.typ.as_deref() {
            Some(t @ ("string" | "number" | "integer" | "boolean")) => {
                TypeDescriptor::primitive(t, a.format.clone())
            }
            Some("array") => TypeDescriptor::Array {
                items: Box::new(
                    a.items
                        .as_ref()
                        .map_or(TypeDescriptor::Any, |i| self.describe_boxed(i, field)),
                ),
            },
            Some("object") => self.describe_any_object(a, field),
            _ if object_like => self.describe_any_object(a, field),
            _ if !a.all_of.is_empty() => TypeDescriptor::AllOf {
                variants: self.describe_all(&a.all_of, field),
            },
            _ if !a.one_of.is_empty() => TypeDescriptor::OneOf {
                variants: self.describe_all(&a.one_of, field),
            },
            _ if !a.any_of.is_empty() => TypeDescriptor::AnyOf {
                variants: self.describe_all(&a.any_of, field),
            },
            _ if a.items.is_some() => TypeDescriptor::Array {
                items: Box::new(
                    a.items
                        .as_ref()
                        .map_or(TypeDescriptor::Any, |i| self.describe_boxed(i, field)),
                ),
            },
            _ => TypeDescriptor::Any,
        }
    }

    fn describe_any_object(&mut self, a: &AnySchema, field: &str) -> TypeDescriptor {
        TypeDescriptor::Object {
            properties: self.property_records(&a.properties, &a.required, field),
            additional_properties: self
                .additional_properties(a.additional_properties.as_ref(), field),
        }
    }

    fn describe_all(
        &mut self,
        members: &[ReferenceOr<Schema>],
        field: &str,
    ) -> Vec<TypeDescriptor> {
        members.iter().map(|m| self.describe(m, field)).collect()
    }

    fn additional_properties(
        &mut self,
        additional: Option<&AdditionalProperties>,
        field: &str,
    ) -> Option<Box<TypeDescriptor>> {
        match additional? {
            AdditionalProperties::Any(true) => Some(Box::new(TypeDescriptor::Any)),
            AdditionalProperties::Any(false) => None,
            AdditionalProperties::Schema(s) => Some(Box::new(self.describe(s.as_ref(), field))),
        }
    }

    fn property_records(
        &mut self,
        properties: &IndexMap<String, ReferenceOr<Box<Schema>>>,
        required: &[String],
        field: &str,
    ) -> Vec<PropertyRecord> {
        properties
            .iter()
            .map(|(name, prop)| {
                let description = match prop {
                    ReferenceOr::Item(s) => s.schema_data.description.clone(),
                    ReferenceOr::Reference { .. } => None,
                };
                PropertyRecord {
                    name: name.clone(),
                    descriptor: self.describe_boxed(prop, &format!("{field}.{name}")),
                    required: required.contains(name),
                    description,
                }
            })
            .collect()
    }

    // ---- models ----

    fn models(&mut self) -> Vec<ModelRecord> {
        let root = self.resolver.root();
        let Some(schemas) = root
            .get("components")
            .and_then(|c| c.get("schemas"))
            .and_then(Value::as_object)
        else {
            return Vec::new();
        };
        schemas
            .iter()
            .map(|(name, raw)| self.model(name, raw))
            .collect()
    }

    fn model(&mut self, name: &str, raw: &'a Value) -> ModelRecord {
        self.stack.clear();
        self.stack.push(component_schema_pointer(name));

        let target = self.resolver.follow(raw).and_then(|(target, last)| {
            let parsed = match &last {
                Some(reference) => schema_target(reference, target)?,
                None => parse_schema(target)?,
            };
            match parsed {
                ReferenceOr::Item(schema) => Ok((schema, last)),
                ReferenceOr::Reference { reference } => Err(IndexError::UnresolvedReference {
                    reason: "target is still a reference".to_string(),
                    reference,
                }),
            }
        });
        let (model_type, description, properties) = match target {
            Ok((schema, last)) => {
                self.stack.extend(last);
                self.model_shape(&schema, name)
            }
            Err(e) => {
                self.warn(name, &e);
                (ModelType::Object, None, Vec::new())
            }
        };
        self.stack.clear();

        ModelRecord::new(
            name.to_string(),
            model_type,
            description,
            properties,
            raw.clone(),
            std::mem::take(&mut self.warnings),
        )
    }

    fn model_shape(
        &mut self,
        schema: &Schema,
        field: &str,
    ) -> (ModelType, Option<String>, Vec<PropertyRecord>) {
        let description = schema.schema_data.description.clone();
        let (model_type, properties) = match &schema.schema_kind {
            SchemaKind::Type(Type::String(s)) => (
                enum_or(s.enumeration.is_empty(), ModelType::String),
                Vec::new(),
            ),
            SchemaKind::Type(Type::Number(n)) => (
                enum_or(n.enumeration.is_empty(), ModelType::Number),
                Vec::new(),
            ),
            SchemaKind::Type(Type::Integer(i)) => (
                enum_or(i.enumeration.is_empty(), ModelType::Integer),
                Vec::new(),
            ),
            SchemaKind::Type(Type::Boolean(_)) => (ModelType::Boolean, Vec::new()),
            SchemaKind::Type(Type::Array(_)) => (ModelType::Array, Vec::new()),
            SchemaKind::Type(Type::Object(o)) => (
                ModelType::Object,
                self.property_records(&o.properties, &o.required, field),
            ),
            SchemaKind::AllOf { all_of } => (ModelType::Object, self.merge_all_of(all_of, field)),
            SchemaKind::OneOf { .. } | SchemaKind::AnyOf { .. } | SchemaKind::Not { .. } => {
                (ModelType::Object, Vec::new())
            }
            SchemaKind::Any(a) => self.any_model_shape(a, field),
        };
        (model_type, description, properties)
    }

    fn any_model_shape(&mut self, a: &AnySchema, field: &str) -> (ModelType, Vec<PropertyRecord>) {
        let scalar = match a.typ.as_deref() {
            Some("string") => Some(ModelType::String),
            Some("number") => Some(ModelType::Number),
            Some("integer") => Some(ModelType::Integer),
            Some("boolean") => Some(ModelType::Boolean),
            Some("array") => Some(ModelType::Array),
            _ => None,
        };
        match scalar {
            Some(ModelType::String | ModelType::Number | ModelType::Integer)
                if !a.enumeration.is_empty() =>
            {
                (ModelType::Enum, Vec::new())
            }
            Some(t) => (t, Vec::new()),
            None if a.typ.is_none() && !a.enumeration.is_empty() => (ModelType::Enum, Vec::new()),
            None => {
                let mut merged = IndexMap::new();
                let mut required = a.required.clone();
                for member in &a.all_of {
                    self.collect_member_properties(member, field, &mut merged, &mut required);
                }
                for record in self.property_records(&a.properties, &a.required, field) {
                    merge_property(&mut merged, record);
                }
                (ModelType::Object, finish_merge(merged, &required))
            }
        }
    }

    /// Merged properties of the `allOf` members, following each reference once per path.
    fn merge_all_of(
        &mut self,
        members: &[ReferenceOr<Schema>],
        field: &str,
    ) -> Vec<PropertyRecord> {
        let mut merged = IndexMap::new();
        let mut required = Vec::new();
        for member in members {
            self.collect_member_properties(member, field, &mut merged, &mut required);
        }
        finish_merge(merged, &required)
    }

    fn collect_member_properties(
        &mut self,
        member: &ReferenceOr<Schema>,
        field: &str,
        merged: &mut IndexMap<String, PropertyRecord>,
        required: &mut Vec<String>,
    ) {
        match member {
            ReferenceOr::Reference { reference } => {
                if self.stack.iter().any(|p| p == reference) {
                    return;
                }
                let target = self
                    .resolver
                    .lookup(reference)
                    .and_then(|v| schema_target(reference, v));
                match target {
                    Ok(target) => {
                        self.stack.push(reference.clone());
                        self.collect_member_properties(&target, field, merged, required);
                        self.stack.pop();
                    }
                    Err(e) => self.warn(field, &e),
                }
            }
            ReferenceOr::Item(schema) => match &schema.schema_kind {
                SchemaKind::Type(Type::Object(o)) => {
                    required.extend(o.required.iter().cloned());
                    for record in self.property_records(&o.properties, &o.required, field) {
                        merge_property(merged, record);
                    }
                }
                SchemaKind::AllOf { all_of } => {
                    for m in all_of {
                        self.collect_member_properties(m, field, merged, required);
                    }
                }
                SchemaKind::Any(a) => {
                    required.extend(a.required.iter().cloned());
                    for m in &a.all_of {
                        self.collect_member_properties(m, field, merged, required);
                    }
                    for record in self.property_records(&a.properties, &a.required, field) {
                        merge_property(merged, record);
                    }
                }
                _ => {}
            },
        }
    }
}

fn enum_or(no_values: bool, scalar: ModelType) -> ModelType {
    if no_values { scalar } else { ModelType::Enum }
}

fn merge_property(merged: &mut IndexMap<String, PropertyRecord>, record: PropertyRecord) {
    match merged.get_mut(&record.name) {
        Some(existing) => {
            let required = existing.required || record.required;
            *existing = record;
            existing.required = required;
        }
        None => {
            merged.insert(record.name.clone(), record);
        }
    }
}

fn finish_merge(
    merged: IndexMap<String, PropertyRecord>,
    required: &[String],
) -> Vec<PropertyRecord> {
    merged
        .into_values()
        .map(|mut p| {
            p.required |= required.contains(&p.name);
            p
        })
        .collect()
}

fn format_name<T: Serialize>(format: &VariantOrUnknownOrEmpty<T>) -> Option<String> {
    match format {
        VariantOrUnknownOrEmpty::Item(v) => serde_json::to_value(v)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string)),
        VariantOrUnknownOrEmpty::Unknown(s) => Some(s.clone()),
        VariantOrUnknownOrEmpty::Empty => None,
    }
}

/// Typed schema behind a reference target, or an unresolved-reference error naming it.
fn schema_target(reference: &str, target: &Value) -> Result<ReferenceOr<Schema>> {
    parse_schema(target).map_err(|e| IndexError::UnresolvedReference {
        reference: reference.to_string(),
        reason: format!("target is not a schema: {e}"),
    })
}

/// Prefer `application/json`, then any JSON media type with a schema, then anything with a
/// schema, then the first declared entry.
fn pick_media(content: &Map<String, Value>) -> Option<(&String, &Value)> {
    let has_schema = |m: &Value| m.get("schema").is_some();
    content
        .iter()
        .find(|(ct, _)| ct.as_str() == "application/json")
        .or_else(|| {
            content
                .iter()
                .find(|(ct, m)| ct.contains("json") && has_schema(m))
        })
        .or_else(|| content.iter().find(|(_, m)| has_schema(m)))
        .or_else(|| content.iter().next())
}

fn method_for_key(key: &str) -> Option<HttpMethod> {
    match key {
        "get" => Some(HttpMethod::Get),
        "post" => Some(HttpMethod::Post),
        "put" => Some(HttpMethod::Put),
        "patch" => Some(HttpMethod::Patch),
        "delete" => Some(HttpMethod::Delete),
        "head" => Some(HttpMethod::Head),
        "options" => Some(HttpMethod::Options),
        _ => None,
    }
}

/// `GET /users/{id}` → `GET_users-id`; `/` → `GET_root`.
pub(crate) fn synthesize_operation_id(method: HttpMethod, path: &str) -> String {
    let mut slug = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            '{' | '}' => {}
            c if c.is_ascii_alphanumeric() || c == '_' || c == '.' => slug.push(c),
            _ => {
                if !slug.is_empty() && !slug.ends_with('-') {
                    slug.push('-');
                }
            }
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        format!("{method}_root")
    } else {
        format!("{method}_{slug}")
    }
}

fn reserve_unique_id(used: &mut HashSet<String>, base: &str) -> String {
    if used.insert(base.to_string()) {
        return base.to_string();
    }
    let mut counter = 2;
    loop {
        let candidate = format!("{base}_{counter}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        counter += 1;
    }
}

/// Every `#/components/schemas/<name>` referenced anywhere inside `value`.
fn raw_model_refs(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                if k == "$ref" {
                    if let Some(name) = v.as_str().and_then(component_schema_name) {
                        push_unique(out, &name);
                    }
                } else {
                    raw_model_refs(v, out);
                }
            }
        }
        Value::Array(items) => {
            for v in items {
                raw_model_refs(v, out);
            }
        }
        _ => {}
    }
}

/// Models inherit the tags of every operation that reaches them, directly or through other
/// models.
fn assign_model_tags(endpoints: &[EndpointRecord], models: &mut [ModelRecord]) {
    let position: HashMap<String, usize> = models
        .iter()
        .enumerate()
        .map(|(i, m)| (m.name.clone(), i))
        .collect();
    let edges: Vec<Vec<usize>> = models
        .iter()
        .map(|m| {
            let mut names = Vec::new();
            raw_model_refs(&m.schema, &mut names);
            names.iter().filter_map(|n| position.get(n).copied()).collect()
        })
        .collect();

    let mut tags: Vec<Vec<String>> = vec![Vec::new(); models.len()];
    for ep in endpoints.iter().filter(|e| !e.tags.is_empty()) {
        let mut seen = vec![false; models.len()];
        let mut queue: VecDeque<usize> = ep
            .referenced_models()
            .iter()
            .filter_map(|n| position.get(n).copied())
            .collect();
        while let Some(i) = queue.pop_front() {
            if std::mem::replace(&mut seen[i], true) {
                continue;
            }
            for tag in &ep.tags {
                push_unique(&mut tags[i], tag);
            }
            queue.extend(edges[i].iter().copied().filter(|&j| !seen[j]));
        }
    }
    for (model, t) in models.iter_mut().zip(tags) {
        model.tags = t;
    }
}
