use std::collections::BTreeMap;

use serde::{Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParameterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ParameterSpec {
    #[serde(rename = "type")]
    pub kind: ParameterType,
    pub description: String,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<String>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ArgumentViolation {
    #[error("arguments must be a JSON object, got {found}")]
    NotAnObject { found: &'static str },
    #[error("missing required parameter `{name}`")]
    MissingRequired { name: String },
    #[error("parameter `{name}` must be of type {expected}, got {found}")]
    TypeMismatch { name: String, expected: &'static str, found: &'static str },
    #[error("parameter `{name}` must be one of [{allowed}]")]
    NotAllowed { name: String, allowed: String },
    #[error("unexpected parameter `{name}`")]
    UnexpectedParameter { name: String },
}

/// Object schema for a function's arguments, serialized in the
/// `{type: "object", properties, required}` shape that LLM tool APIs expect.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ParameterSchema {
    #[serde(rename = "type")]
    schema_type: &'static str,
    properties: BTreeMap<String, ParameterSpec>,
    required: Vec<String>,
    #[serde(
        rename = "additionalProperties",
        skip_serializing_if = "is_open",
        serialize_with = "serialize_closed"
    )]
    closed: bool,
}

fn is_open(closed: &bool) -> bool {
    !*closed
}

fn serialize_closed<S>(_closed: &bool, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_bool(false)
}

impl Default for ParameterSchema {
    fn default() -> Self {
        Self::object()
    }
}

impl ParameterSchema {
    pub fn object() -> Self {
        Self {
            schema_type: "object",
            properties: BTreeMap::new(),
            required: Vec::new(),
            closed: false,
        }
    }

    pub fn required(
        self,
        name: impl Into<String>,
        kind: ParameterType,
        description: impl Into<String>,
    ) -> Self {
        self.with_parameter(name.into(), kind, description.into(), None, true)
    }

    pub fn optional(
        self,
        name: impl Into<String>,
        kind: ParameterType,
        description: impl Into<String>,
    ) -> Self {
        self.with_parameter(name.into(), kind, description.into(), None, false)
    }

    pub fn required_enum<I, S>(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        allowed: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let allowed = allowed.into_iter().map(Into::into).collect();
        self.with_parameter(
            name.into(),
            ParameterType::String,
            description.into(),
            Some(allowed),
            true,
        )
    }

    /// Reject argument keys that are not declared in `properties`.
    pub fn closed(mut self) -> Self {
        self.closed = true;
        self
    }

    fn with_parameter(
        mut self,
        name: String,
        kind: ParameterType,
        description: String,
        allowed_values: Option<Vec<String>>,
        required: bool,
    ) -> Self {
        if required && !self.required.contains(&name) {
            self.required.push(name.clone());
        }
        self.properties.insert(name, ParameterSpec { kind, description, allowed_values });
        self
    }

    pub fn properties(&self) -> &BTreeMap<String, ParameterSpec> {
        &self.properties
    }

    pub fn required_names(&self) -> &[String] {
        &self.required
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Collects every violation instead of stopping at the first one so the
    /// model gets a complete correction hint in a single round trip.
    pub fn validate(&self, arguments: &Value) -> Result<(), Vec<ArgumentViolation>> {
        let Some(object) = arguments.as_object() else {
            return Err(vec![ArgumentViolation::NotAnObject { found: json_type_name(arguments) }]);
        };

        let mut violations = Vec::new();

        for name in &self.required {
            let present = object.get(name).map(|value| !value.is_null()).unwrap_or(false);
            if !present {
                violations.push(ArgumentViolation::MissingRequired { name: name.clone() });
            }
        }

        for (name, value) in object {
            let Some(spec) = self.properties.get(name) else {
                if self.closed {
                    violations.push(ArgumentViolation::UnexpectedParameter { name: name.clone() });
                }
                continue;
            };

            if value.is_null() {
                continue;
            }

            if !spec.kind.accepts(value) {
                violations.push(ArgumentViolation::TypeMismatch {
                    name: name.clone(),
                    expected: spec.kind.as_str(),
                    found: json_type_name(value),
                });
                continue;
            }

            if let (Some(allowed), Some(text)) = (&spec.allowed_values, value.as_str()) {
                if !allowed.iter().any(|candidate| candidate == text) {
                    violations.push(ArgumentViolation::NotAllowed {
                        name: name.clone(),
                        allowed: allowed.join(", "),
                    });
                }
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    pub parameters: ParameterSchema,
}

impl FunctionSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ParameterSchema,
    ) -> Self {
        Self { name: name.into(), description: description.into(), parameters }
    }

    /// Wire form handed verbatim to the LLM client.
    pub fn to_wire(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "parameters": self.parameters,
        })
    }
}
