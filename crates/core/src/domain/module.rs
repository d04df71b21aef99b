use std::collections::BTreeSet;

use serde::Serialize;

use crate::domain::function::FunctionSpec;
use crate::errors::DescriptorError;

/// Identity, prompt and callable surface of a module. Built once and never
/// mutated, so a descriptor that exists has unique function names.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ModuleDescriptor {
    name: String,
    description: String,
    system_prompt: String,
    functions: Vec<FunctionSpec>,
}

impl ModuleDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        system_prompt: impl Into<String>,
        functions: Vec<FunctionSpec>,
    ) -> Result<Self, DescriptorError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DescriptorError::EmptyModuleName);
        }

        let mut seen = BTreeSet::new();
        for function in &functions {
            if function.name.trim().is_empty() {
                return Err(DescriptorError::EmptyFunctionName { module: name });
            }
            if !seen.insert(function.name.as_str()) {
                return Err(DescriptorError::DuplicateFunction {
                    module: name,
                    function: function.name.clone(),
                });
            }
        }

        Ok(Self {
            name,
            description: description.into(),
            system_prompt: system_prompt.into(),
            functions,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn functions(&self) -> &[FunctionSpec] {
        &self.functions
    }

    pub fn function(&self, name: &str) -> Option<&FunctionSpec> {
        self.functions.iter().find(|function| function.name == name)
    }

    pub fn function_names(&self) -> Vec<&str> {
        self.functions.iter().map(|function| function.name.as_str()).collect()
    }
}
