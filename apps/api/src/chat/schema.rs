//! Target record schema — a config-supplied, versioned document describing
//! the final project+talents record, plus the drift-tolerant normalizer.
//!
//! The document is JSON-Schema-like and is parsed into a data-driven
//! descriptor tree (name, type tag, required flag, nested descriptors). A
//! small structural validator walks the tree and reports field-level drift
//! as advisory violations; only the top-level project/talents rules are
//! fatal.

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// Default schema document shipped with the repo (talents-array variant).
pub const DEFAULT_SCHEMA_JSON: &str = include_str!("../../schema/project_schema.json");

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema document is not valid JSON: {0}")]
    Document(#[from] serde_json::Error),

    #[error("record has no top-level 'project' object")]
    MissingProject,

    #[error("record has no talent postings after normalization")]
    MissingTalents,
}

/// The two record shapes observed across deployments: a required singular
/// `talent` object, or a required `talents` array (minItems 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaVariant {
    SingleTalent,
    TalentArray,
}

/// Type tag for a descriptor node.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Object(Vec<FieldSpec>),
    Array(Box<FieldType>),
    String,
    Number,
    Boolean,
    Enum(Vec<String>),
    /// No usable type information in the document.
    Any,
}

/// One field descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub ty: FieldType,
    pub required: bool,
    pub nullable: bool,
}

/// A non-fatal structural mismatch between a record and the schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

/// A loaded schema document: the raw JSON (embedded verbatim into the repair
/// prompt), the detected variant, and the descriptor tree for validation.
#[derive(Debug, Clone)]
pub struct SchemaDocument {
    raw: Value,
    version: u32,
    variant: SchemaVariant,
    root: Vec<FieldSpec>,
}

impl SchemaDocument {
    pub fn parse(document: &str) -> Result<Self, SchemaError> {
        let raw: Value = serde_json::from_str(document)?;

        let version = raw
            .get("version")
            .and_then(Value::as_u64)
            .unwrap_or(1) as u32;

        let required = required_names(&raw);
        let variant = if required.iter().any(|n| n == "talents") {
            SchemaVariant::TalentArray
        } else {
            SchemaVariant::SingleTalent
        };

        // The validator always sees the normalized plural shape: a
        // singular-talent document is checked as a one-element array.
        let mut root = parse_object_specs(&raw);
        if variant == SchemaVariant::SingleTalent {
            for spec in &mut root {
                if spec.name == "talent" {
                    spec.name = "talents".to_string();
                    spec.ty = FieldType::Array(Box::new(spec.ty.clone()));
                }
            }
        }

        Ok(Self {
            raw,
            version,
            variant,
            root,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn variant(&self) -> SchemaVariant {
        self.variant
    }

    /// Pretty-printed document for embedding into the repair prompt.
    pub fn pretty(&self) -> String {
        serde_json::to_string_pretty(&self.raw).unwrap_or_else(|_| self.raw.to_string())
    }

    /// Normalizes a parsed record against this schema.
    ///
    /// Rules, applied in order:
    /// - no top-level `project` object → `MissingProject`
    /// - singular `talent` with no `talents` → wrapped into a one-element
    ///   `talents` array, `talent` dropped
    /// - non-array `talents` → wrapped into a one-element array
    /// - `talents` still empty or absent → `MissingTalents`
    ///
    /// Field-level drift below the top level is logged, not fatal.
    pub fn normalize(&self, record: Value) -> Result<Value, SchemaError> {
        let Value::Object(mut map) = record else {
            return Err(SchemaError::MissingProject);
        };

        match map.get("project") {
            Some(Value::Object(_)) => {}
            _ => return Err(SchemaError::MissingProject),
        }

        if !map.contains_key("talents") {
            if let Some(talent) = map.remove("talent") {
                map.insert("talents".to_string(), Value::Array(vec![talent]));
            }
        }

        if let Some(talents) = map.get_mut("talents") {
            if !talents.is_array() {
                let single = talents.take();
                *talents = Value::Array(vec![single]);
            }
        }

        match map.get("talents").and_then(Value::as_array) {
            Some(arr) if !arr.is_empty() => {}
            _ => return Err(SchemaError::MissingTalents),
        }

        let normalized = Value::Object(map);
        for violation in self.check(&normalized) {
            warn!(path = %violation.path, "schema drift: {}", violation.message);
        }

        Ok(normalized)
    }

    /// Walks the descriptor tree and collects structural mismatches.
    pub fn check(&self, record: &Value) -> Vec<Violation> {
        let mut violations = Vec::new();
        check_object(&self.root, record, "$", &mut violations);
        violations
    }
}

fn required_names(node: &Value) -> Vec<String> {
    node.get("required")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_object_specs(node: &Value) -> Vec<FieldSpec> {
    let required = required_names(node);
    let Some(properties) = node.get("properties").and_then(Value::as_object) else {
        return Vec::new();
    };

    properties
        .iter()
        .map(|(name, prop)| FieldSpec {
            name: name.clone(),
            ty: parse_type(prop),
            required: required.iter().any(|r| r == name),
            nullable: prop.get("nullable").and_then(Value::as_bool).unwrap_or(false),
        })
        .collect()
}

fn parse_type(prop: &Value) -> FieldType {
    match prop.get("type").and_then(Value::as_str) {
        Some("object") => FieldType::Object(parse_object_specs(prop)),
        Some("array") => FieldType::Array(Box::new(
            prop.get("items").map(parse_type).unwrap_or(FieldType::Any),
        )),
        Some("string") => match prop.get("enum").and_then(Value::as_array) {
            Some(values) => FieldType::Enum(
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect(),
            ),
            None => FieldType::String,
        },
        Some("number") | Some("integer") => FieldType::Number,
        Some("boolean") => FieldType::Boolean,
        _ => FieldType::Any,
    }
}

fn check_object(specs: &[FieldSpec], value: &Value, path: &str, out: &mut Vec<Violation>) {
    let Some(map) = value.as_object() else {
        out.push(Violation {
            path: path.to_string(),
            message: "expected an object".to_string(),
        });
        return;
    };

    for spec in specs {
        let field_path = format!("{path}.{}", spec.name);
        match map.get(&spec.name) {
            None if spec.required => out.push(Violation {
                path: field_path,
                message: "required field is missing".to_string(),
            }),
            None => {}
            Some(field) => check_type(spec, field, &field_path, out),
        }
    }
}

fn check_type(spec: &FieldSpec, value: &Value, path: &str, out: &mut Vec<Violation>) {
    if value.is_null() {
        if !spec.nullable {
            out.push(Violation {
                path: path.to_string(),
                message: "null in a non-nullable field".to_string(),
            });
        }
        return;
    }

    match &spec.ty {
        FieldType::Object(nested) => check_object(nested, value, path, out),
        FieldType::Array(item_ty) => match value.as_array() {
            Some(items) => {
                let item_spec = FieldSpec {
                    name: String::new(),
                    ty: (**item_ty).clone(),
                    required: false,
                    nullable: false,
                };
                for (i, item) in items.iter().enumerate() {
                    check_type(&item_spec, item, &format!("{path}[{i}]"), out);
                }
            }
            None => out.push(Violation {
                path: path.to_string(),
                message: "expected an array".to_string(),
            }),
        },
        FieldType::String => {
            if !value.is_string() {
                out.push(Violation {
                    path: path.to_string(),
                    message: "expected a string".to_string(),
                });
            }
        }
        FieldType::Number => {
            if !value.is_number() {
                out.push(Violation {
                    path: path.to_string(),
                    message: "expected a number".to_string(),
                });
            }
        }
        FieldType::Boolean => {
            if !value.is_boolean() {
                out.push(Violation {
                    path: path.to_string(),
                    message: "expected a boolean".to_string(),
                });
            }
        }
        FieldType::Enum(allowed) => match value.as_str() {
            Some(s) if allowed.iter().any(|a| a == s) => {}
            _ => out.push(Violation {
                path: path.to_string(),
                message: format!("expected one of {allowed:?}"),
            }),
        },
        FieldType::Any => {}
    }
}
