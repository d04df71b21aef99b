use serde::{Deserialize, Serialize};

use crate::domain::call::{FunctionCallRequest, FunctionCallResult};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Turn {
    User {
        text: String,
    },
    Assistant {
        text: String,
    },
    FunctionCalls {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        calls: Vec<FunctionCallRequest>,
    },
    FunctionResult {
        result: FunctionCallResult,
    },
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self::User { text: text.into() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::Assistant { text: text.into() }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Self::User { .. } => "user",
            Self::Assistant { .. } | Self::FunctionCalls { .. } => "assistant",
            Self::FunctionResult { .. } => "tool",
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::domain::call::{FunctionCallRequest, FunctionCallResult};

    use super::Turn;

    #[test]
    fn turns_serialize_with_role_tag() {
        let request =
            FunctionCallRequest::new("call-1", "query_packages", json!({"query": "fiber"}));
        let turns = vec![
            Turn::user("what fiber plans do you have?"),
            Turn::FunctionCalls { text: None, calls: vec![request.clone()] },
            Turn::FunctionResult {
                result: FunctionCallResult::success(&request, "[]".to_owned()),
            },
        ];

        let value = serde_json::to_value(&turns).expect("turns serialize");
        assert_eq!(value[0]["role"], "user");
        assert_eq!(value[1]["role"], "function_calls");
        assert!(value[1].get("text").is_none());
        assert_eq!(value[2]["result"]["call_id"], "call-1");
        assert_eq!(turns[2].role(), "tool");
    }
}
