//! Declarative parameter schemas and the validator compiler.
//!
//! Bundles describe their action parameters with a small declarative tree.
//! At tool-set build time each schema is compiled once into a typed
//! validator that is cached alongside the tool set, so per-call validation
//! is a plain tree walk with no JSON-schema interpretation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Property types supported by action parameter schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// One node of a declarative parameter schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSchema {
    #[serde(rename = "type")]
    pub kind: ParamType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Child properties for `Object` nodes. Ordered for stable output.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, ParamSchema>,
    /// Names of required child properties for `Object` nodes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    /// Element schema for `Array` nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ParamSchema>>,
}

impl ParamSchema {
    pub fn new(kind: ParamType) -> Self {
        Self {
            kind,
            description: None,
            properties: BTreeMap::new(),
            required: Vec::new(),
            items: None,
        }
    }

    /// Empty object schema, the usual root for an action's parameters.
    pub fn object() -> Self {
        Self::new(ParamType::Object)
    }

    pub fn string(description: impl Into<String>) -> Self {
        Self::new(ParamType::String).with_description(description)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_property(
        mut self,
        name: impl Into<String>,
        schema: ParamSchema,
        required: bool,
    ) -> Self {
        let name = name.into();
        if required {
            self.required.push(name.clone());
        }
        self.properties.insert(name, schema);
        self
    }

    pub fn with_items(mut self, items: ParamSchema) -> Self {
        self.items = Some(Box::new(items));
        self
    }

    /// Render as a JSON Schema fragment for model-facing tool definitions.
    pub fn to_json_schema(&self) -> Value {
        let mut out = serde_json::Map::new();
        out.insert("type".into(), Value::String(self.kind.as_str().into()));
        if let Some(ref description) = self.description {
            out.insert("description".into(), Value::String(description.clone()));
        }
        if self.kind == ParamType::Object {
            let props: serde_json::Map<String, Value> = self
                .properties
                .iter()
                .map(|(name, schema)| (name.clone(), schema.to_json_schema()))
                .collect();
            out.insert("properties".into(), Value::Object(props));
            if !self.required.is_empty() {
                out.insert(
                    "required".into(),
                    Value::Array(
                        self.required
                            .iter()
                            .map(|r| Value::String(r.clone()))
                            .collect(),
                    ),
                );
            }
        }
        if let Some(ref items) = self.items {
            out.insert("items".into(), items.to_json_schema());
        }
        Value::Object(out)
    }

    /// Compile into a typed validator tree.
    pub fn compile(&self) -> CompiledValidator {
        CompiledValidator {
            kind: self.kind,
            properties: self
                .properties
                .iter()
                .map(|(name, schema)| (name.clone(), schema.compile()))
                .collect(),
            required: self.required.clone(),
            items: self.items.as_ref().map(|i| Box::new(i.compile())),
        }
    }
}

/// A validation problem at a specific path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Pre-compiled validator tree for one action's parameters.
#[derive(Debug, Clone)]
pub struct CompiledValidator {
    kind: ParamType,
    properties: BTreeMap<String, CompiledValidator>,
    required: Vec<String>,
    items: Option<Box<CompiledValidator>>,
}

impl CompiledValidator {
    /// Validate a value against this schema. Unknown properties pass
    /// through (models may send extras; actions ignore them).
    pub fn validate(&self, value: &Value) -> Result<(), Vec<ValidationIssue>> {
        let mut issues = Vec::new();
        self.check(value, "$", &mut issues);
        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }

    fn check(&self, value: &Value, path: &str, issues: &mut Vec<ValidationIssue>) {
        let matches = match self.kind {
            ParamType::String => value.is_string(),
            ParamType::Number => value.is_number(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
        };
        if !matches {
            issues.push(ValidationIssue {
                path: path.to_string(),
                message: format!("expected {}", self.kind.as_str()),
            });
            return;
        }

        if let Value::Object(map) = value {
            for name in &self.required {
                if !map.contains_key(name) {
                    issues.push(ValidationIssue {
                        path: format!("{}.{}", path, name),
                        message: "missing required property".to_string(),
                    });
                }
            }
            for (name, child) in &self.properties {
                if let Some(prop) = map.get(name) {
                    child.check(prop, &format!("{}.{}", path, name), issues);
                }
            }
        }

        if let (Value::Array(elements), Some(item_schema)) = (value, &self.items) {
            for (index, element) in elements.iter().enumerate() {
                item_schema.check(element, &format!("{}[{}]", path, index), issues);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ticket_schema() -> ParamSchema {
        ParamSchema::object()
            .with_property("status", ParamSchema::string("Ticket status filter"), true)
            .with_property(
                "limit",
                ParamSchema::new(ParamType::Integer).with_description("Max results"),
                false,
            )
            .with_property(
                "labels",
                ParamSchema::new(ParamType::Array).with_items(ParamSchema::string("A label")),
                false,
            )
    }

    #[test]
    fn valid_arguments_pass() {
        let validator = ticket_schema().compile();
        let args = json!({"status": "open", "limit": 5, "labels": ["bug"]});
        assert!(validator.validate(&args).is_ok());
    }

    #[test]
    fn missing_required_property_reported() {
        let validator = ticket_schema().compile();
        let issues = validator.validate(&json!({"limit": 5})).unwrap_err();
        assert!(issues.iter().any(|i| i.path == "$.status"));
    }

    #[test]
    fn wrong_type_reported_with_path() {
        let validator = ticket_schema().compile();
        let issues = validator
            .validate(&json!({"status": "open", "labels": [1, 2]}))
            .unwrap_err();
        assert!(issues.iter().any(|i| i.path == "$.labels[0]"));
    }

    #[test]
    fn integer_rejects_float() {
        let validator = ticket_schema().compile();
        let issues = validator
            .validate(&json!({"status": "open", "limit": 1.5}))
            .unwrap_err();
        assert_eq!(issues[0].path, "$.limit");
    }

    #[test]
    fn unknown_properties_pass_through() {
        let validator = ticket_schema().compile();
        let args = json!({"status": "open", "unexpected": true});
        assert!(validator.validate(&args).is_ok());
    }

    #[test]
    fn nested_objects_validate_recursively() {
        let schema = ParamSchema::object().with_property(
            "filter",
            ParamSchema::object().with_property("field", ParamSchema::string("Field name"), true),
            true,
        );
        let validator = schema.compile();
        let issues = validator
            .validate(&json!({"filter": {"field": 3}}))
            .unwrap_err();
        assert_eq!(issues[0].path, "$.filter.field");
    }

    #[test]
    fn json_schema_rendering_includes_required() {
        let rendered = ticket_schema().to_json_schema();
        assert_eq!(rendered["type"], "object");
        assert_eq!(rendered["required"][0], "status");
        assert_eq!(rendered["properties"]["status"]["type"], "string");
        assert_eq!(rendered["properties"]["labels"]["items"]["type"], "string");
    }
}
