//! # Tool Schema and Parameter Extraction
//!
//! `SchemaDef` is a small algebraic type describing a tool's expected
//! arguments; it compiles to a JSON-Schema fragment for transmission to the
//! provider. The extractor walks a dotted path through a `serde_json::Value`
//! and reports one of five structured failure kinds rather than a single
//! opaque error string, so both a human reading logs and a model reading
//! the tool error back can tell exactly what went wrong.

use serde_json::{Map, Value};

/// Describes the shape a tool expects its arguments (or a sub-value of
/// them) to take.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaDef {
    Str,
    Int,
    Num,
    Bool,
    Arr(Box<SchemaDef>),
    Obj(Vec<(String, SchemaDef, bool)>),
    Nullable(Box<SchemaDef>),
}

impl SchemaDef {
    /// Compiles this definition to a JSON-Schema fragment suitable for
    /// embedding in a tool-definition object sent to the provider.
    pub fn to_json_schema(&self) -> Value {
        match self {
            SchemaDef::Str => serde_json::json!({ "type": "string" }),
            SchemaDef::Int => serde_json::json!({ "type": "integer" }),
            SchemaDef::Num => serde_json::json!({ "type": "number" }),
            SchemaDef::Bool => serde_json::json!({ "type": "boolean" }),
            SchemaDef::Arr(of) => serde_json::json!({
                "type": "array",
                "items": of.to_json_schema(),
            }),
            SchemaDef::Obj(props) => {
                let mut properties = Map::new();
                let mut required = Vec::new();
                for (name, def, is_required) in props {
                    properties.insert(name.clone(), def.to_json_schema());
                    if *is_required {
                        required.push(Value::String(name.clone()));
                    }
                }
                serde_json::json!({
                    "type": "object",
                    "properties": Value::Object(properties),
                    "required": Value::Array(required),
                })
            }
            SchemaDef::Nullable(inner) => {
                let mut schema = inner.to_json_schema();
                if let Value::Object(ref mut map) = schema {
                    map.insert("nullable".into(), Value::Bool(true));
                }
                schema
            }
        }
    }

    fn expected_label(&self) -> &'static str {
        match self {
            SchemaDef::Str => "string",
            SchemaDef::Int => "integer",
            SchemaDef::Num => "number",
            SchemaDef::Bool => "boolean",
            SchemaDef::Arr(_) => "array",
            SchemaDef::Obj(_) => "object",
            SchemaDef::Nullable(inner) => inner.expected_label(),
        }
    }
}

/// One structured parameter-validation failure.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolParameterError {
    MissingParameter { path: String, expected: String, available_keys: Vec<String> },
    NullParameter { path: String, expected: String },
    TypeMismatch { path: String, expected: String, actual: String },
    InvalidNesting { path: String, parent_path: String, parent_type: String },
    MultipleErrors(Vec<ToolParameterError>),
}

impl ToolParameterError {
    /// Flattens nested `MultipleErrors` into a single list, the form used
    /// when serializing a tool-call failure per the wire contract in
    /// [`crate::tools`].
    pub fn flatten(self) -> Vec<ToolParameterError> {
        match self {
            ToolParameterError::MultipleErrors(errors) => {
                errors.into_iter().flat_map(ToolParameterError::flatten).collect()
            }
            other => vec![other],
        }
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn matches_type(v: &Value, schema: &SchemaDef) -> bool {
    match schema {
        SchemaDef::Str => v.is_string(),
        SchemaDef::Int => v.is_i64() || v.is_u64(),
        SchemaDef::Num => v.is_number(),
        SchemaDef::Bool => v.is_boolean(),
        SchemaDef::Arr(_) => v.is_array(),
        SchemaDef::Obj(_) => v.is_object(),
        SchemaDef::Nullable(inner) => v.is_null() || matches_type(v, inner),
    }
}

/// Navigates `root` by a `.`-separated `path`, returning the leaf value if
/// it is present, non-null, and type-matches `expected`.
pub fn extract_path(root: &Value, path: &str, expected: &SchemaDef) -> Result<Value, ToolParameterError> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = root;
    let mut parent_path_segments: Vec<&str> = Vec::new();

    for (i, segment) in segments.iter().enumerate() {
        let is_last = i == segments.len() - 1;
        let parent_path = parent_path_segments.join(".");

        let obj = match current.as_object() {
            Some(obj) => obj,
            None => {
                return Err(ToolParameterError::InvalidNesting {
                    path: path.to_string(),
                    parent_path,
                    parent_type: type_name(current).to_string(),
                });
            }
        };

        match obj.get(*segment) {
            Some(value) => {
                if is_last {
                    if value.is_null() {
                        return Err(ToolParameterError::NullParameter {
                            path: path.to_string(),
                            expected: expected.expected_label().to_string(),
                        });
                    }
                    if !matches_type(value, expected) {
                        return Err(ToolParameterError::TypeMismatch {
                            path: path.to_string(),
                            expected: expected.expected_label().to_string(),
                            actual: type_name(value).to_string(),
                        });
                    }
                    return Ok(value.clone());
                }
                current = value;
                parent_path_segments.push(segment);
            }
            None => {
                if is_last {
                    let mut available_keys: Vec<String> = obj.keys().cloned().collect();
                    available_keys.sort();
                    return Err(ToolParameterError::MissingParameter {
                        path: path.to_string(),
                        expected: expected.expected_label().to_string(),
                        available_keys,
                    });
                }
                return Err(ToolParameterError::MissingParameter {
                    path: parent_path_with(&parent_path_segments, segment),
                    expected: "object".to_string(),
                    available_keys: {
                        let mut keys: Vec<String> = obj.keys().cloned().collect();
                        keys.sort();
                        keys
                    },
                });
            }
        }
    }

    unreachable!("path always has at least one segment")
}

fn parent_path_with(segments: &[&str], tail: &str) -> String {
    let mut joined = segments.join(".");
    if !joined.is_empty() {
        joined.push('.');
    }
    joined.push_str(tail);
    joined
}

/// Like [`extract_path`] but treats both a missing leaf and an explicit
/// `null` as `Ok(None)`; only a type mismatch is surfaced as an error.
pub fn extract_optional_path(
    root: &Value,
    path: &str,
    expected: &SchemaDef,
) -> Result<Option<Value>, ToolParameterError> {
    match extract_path(root, path, expected) {
        Ok(v) => Ok(Some(v)),
        Err(ToolParameterError::MissingParameter { .. }) => Ok(None),
        Err(ToolParameterError::NullParameter { .. }) => Ok(None),
        Err(other) => Err(other),
    }
}
