use concierge_core::config::{AppConfig, LoadOptions, ModuleSelector};
use concierge_core::FunctionSpec;
use concierge_modules::{builtin_registry, module_context};
use serde_json::{json, Value};

use super::CommandResult;

const COMMAND: &str = "modules";

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(COMMAND, "config_validation", error.to_string(), 2);
        }
    };

    let registry = match builtin_registry(module_context(&config.assistant)) {
        Ok(registry) => registry,
        Err(error) => {
            return CommandResult::failure(COMMAND, "module_registry", error.to_string(), 3);
        }
    };

    let active = config.assistant.module_selector().active_module_name();
    let modules: Vec<Value> = registry
        .descriptors()
        .into_iter()
        .map(|descriptor| {
            let functions: Vec<Value> =
                descriptor.functions().iter().map(FunctionSpec::to_wire).collect();
            json!({
                "name": descriptor.name(),
                "description": descriptor.description(),
                "active": descriptor.name() == active,
                "functions": functions,
            })
        })
        .collect();

    CommandResult::success(COMMAND, json!({ "active_module": active, "modules": modules }))
}
