use concierge_agent::ModuleContext;
use concierge_core::{FunctionError, FunctionSpec, ParameterSchema};
use serde::Serialize;

pub const CREATOR_INFO_FUNCTION: &str = "get_creator_info";

/// Functions every built-in module exposes after its own.
pub fn common_functions() -> Vec<FunctionSpec> {
    vec![FunctionSpec::new(
        CREATOR_INFO_FUNCTION,
        "Return who built and operates this assistant. Use it when the caller asks about the \
         creator or designer of the system.",
        ParameterSchema::object().closed(),
    )]
}

pub fn with_common_functions(mut functions: Vec<FunctionSpec>) -> Vec<FunctionSpec> {
    functions.extend(common_functions());
    functions
}

#[derive(Debug, Serialize)]
struct CreatorInfo<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    contact: Option<&'a str>,
    role: &'static str,
}

/// Handles a shared function. `None` means `name` is not a shared function
/// and the module should look at its own table.
pub fn execute_common(
    name: &str,
    context: &ModuleContext,
) -> Option<Result<String, FunctionError>> {
    match name {
        CREATOR_INFO_FUNCTION => Some(creator_info(context)),
        _ => None,
    }
}

fn creator_info(context: &ModuleContext) -> Result<String, FunctionError> {
    let name = context
        .creator_name
        .as_deref()
        .ok_or_else(|| FunctionError::domain("creator information is not configured"))?;

    to_content(&CreatorInfo {
        name,
        contact: context.creator_contact.as_deref(),
        role: "creator and designer of this system",
    })
}

pub(crate) fn to_content<T: Serialize>(value: &T) -> Result<String, FunctionError> {
    serde_json::to_string(value)
        .map_err(|error| FunctionError::domain(format!("could not encode result: {error}")))
}

/// Lowercased words of at least three characters, used for keyword lookups.
pub(crate) fn keywords(query: &str) -> Vec<String> {
    query
        .split(|ch: char| !ch.is_alphanumeric() && ch != '-' && ch != ':')
        .map(str::to_lowercase)
        .filter(|word| word.chars().count() >= 3)
        .collect()
}
