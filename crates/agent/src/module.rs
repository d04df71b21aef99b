use async_trait::async_trait;
use concierge_core::{FunctionError, FunctionSpec, ModuleDescriptor};
use serde_json::{Map, Value};

/// A business-domain handler. Everything the model may call lives behind
/// `execute_function`; the descriptor is fixed at construction.
#[async_trait]
pub trait Module: Send + Sync {
    fn descriptor(&self) -> &ModuleDescriptor;

    /// Runs one already-validated call. Unknown names must map to
    /// `FunctionError::UnknownFunction`, business-rule failures to
    /// `FunctionError::DomainExecution`.
    async fn execute_function(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<String, FunctionError>;

    fn name(&self) -> &str {
        self.descriptor().name()
    }

    fn description(&self) -> &str {
        self.descriptor().description()
    }

    fn system_prompt(&self) -> &str {
        self.descriptor().system_prompt()
    }

    fn functions(&self) -> &[FunctionSpec] {
        self.descriptor().functions()
    }
}

/// Reads a string argument that schema validation already guaranteed.
pub fn string_argument<'a>(
    arguments: &'a Map<String, Value>,
    name: &str,
) -> Result<&'a str, FunctionError> {
    arguments
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| FunctionError::domain(format!("argument `{name}` must be a string")))
}
