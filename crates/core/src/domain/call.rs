use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::FunctionError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId(pub String);

impl CallId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CallId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallRequest {
    pub call_id: CallId,
    pub function_name: String,
    pub arguments: Value,
}

impl FunctionCallRequest {
    pub fn new(
        call_id: impl Into<CallId>,
        function_name: impl Into<String>,
        arguments: Value,
    ) -> Self {
        Self { call_id: call_id.into(), function_name: function_name.into(), arguments }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionErrorKind {
    UnknownFunction,
    InvalidArguments,
    DomainExecution,
    DuplicateCall,
}

impl FunctionErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownFunction => "unknown_function",
            Self::InvalidArguments => "invalid_arguments",
            Self::DomainExecution => "domain_execution",
            Self::DuplicateCall => "duplicate_call",
        }
    }
}

/// Outcome of one call, appended to history as-is. `content` is what the
/// model sees: the module's payload on success, an error envelope otherwise.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCallResult {
    pub call_id: CallId,
    pub function_name: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FunctionErrorKind>,
}

impl FunctionCallResult {
    pub fn success(request: &FunctionCallRequest, content: String) -> Self {
        Self {
            call_id: request.call_id.clone(),
            function_name: request.function_name.clone(),
            content,
            error: None,
        }
    }

    pub fn failure(request: &FunctionCallRequest, error: &FunctionError) -> Self {
        let kind = error.kind();
        let content = json!({
            "error": {
                "kind": kind.as_str(),
                "message": error.to_string(),
            }
        })
        .to_string();

        Self {
            call_id: request.call_id.clone(),
            function_name: request.function_name.clone(),
            content,
            error: Some(kind),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
