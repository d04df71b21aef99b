use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use concierge_core::config::ModuleSelector;
use concierge_core::{ModuleDescriptor, RegistryError};
use tracing::{debug, info};

use crate::module::Module;

/// Values every module factory may read while building its module.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModuleContext {
    pub creator_name: Option<String>,
    pub creator_contact: Option<String>,
}

pub type ModuleFactory = Arc<dyn Fn(&ModuleContext) -> Arc<dyn Module> + Send + Sync>;

/// Startup table of module factories. Populated once, then shared read-only
/// by every session.
pub struct ModuleRegistry {
    context: ModuleContext,
    factories: BTreeMap<String, ModuleFactory>,
    descriptors: BTreeMap<String, ModuleDescriptor>,
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("context", &self.context)
            .field("modules", &self.names())
            .finish()
    }
}

impl ModuleRegistry {
    pub fn new(context: ModuleContext) -> Self {
        Self { context, factories: BTreeMap::new(), descriptors: BTreeMap::new() }
    }

    pub fn context(&self) -> &ModuleContext {
        &self.context
    }

    /// Registers a factory under `name`. The factory is invoked once here so a
    /// module whose name disagrees with its registration is rejected at
    /// startup rather than at first use.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> Result<(), RegistryError>
    where
        F: Fn(&ModuleContext) -> Arc<dyn Module> + Send + Sync + 'static,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(RegistryError::Config("module names must not be empty".to_string()));
        }
        if self.factories.contains_key(&name) {
            return Err(RegistryError::DuplicateModule(name));
        }

        let instance = factory(&self.context);
        if instance.name() != name {
            return Err(RegistryError::NameMismatch {
                registered_as: name,
                actual: instance.name().to_string(),
            });
        }

        debug!(
            event_name = "registry.module_registered",
            module = %name,
            functions = instance.functions().len(),
            "module registered"
        );
        self.descriptors.insert(name.clone(), instance.descriptor().clone());
        self.factories.insert(name, Arc::new(factory));
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Module>, RegistryError> {
        let factory = self.factories.get(name).ok_or_else(|| RegistryError::ModuleNotFound {
            name: name.to_string(),
            available: self.names(),
        })?;
        Ok(factory(&self.context))
    }

    /// Resolves the module a new session binds to. The selector is consulted
    /// exactly once per call.
    pub fn resolve_active<S>(&self, selector: &S) -> Result<Arc<dyn Module>, RegistryError>
    where
        S: ModuleSelector + ?Sized,
    {
        let name = selector.active_module_name();
        if !self.factories.contains_key(&name) {
            return Err(RegistryError::Config(format!(
                "active module `{name}` is not registered (available: {})",
                self.names().join(", ")
            )));
        }

        let module = self.resolve(&name)?;
        info!(
            event_name = "registry.active_module_resolved",
            module = %name,
            "active module resolved"
        );
        Ok(module)
    }

    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn descriptors(&self) -> Vec<&ModuleDescriptor> {
        self.descriptors.values().collect()
    }

    pub fn descriptor(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.descriptors.get(name)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use concierge_core::config::StaticModuleSelector;
    use concierge_core::{
        FunctionError, FunctionSpec, ModuleDescriptor, ParameterSchema, ParameterType,
        RegistryError,
    };
    use serde_json::{Map, Value};

    use super::{ModuleContext, ModuleRegistry};
    use crate::module::Module;

    struct EchoModule {
        descriptor: ModuleDescriptor,
    }

    impl EchoModule {
        fn named(name: &str) -> Arc<dyn Module> {
            let descriptor = ModuleDescriptor::new(
                name,
                "echo desk",
                "Repeat what you are told.",
                vec![FunctionSpec::new(
                    "echo",
                    "Echo the text back",
                    ParameterSchema::object().required("text", ParameterType::String, "Text"),
                )],
            )
            .expect("descriptor builds");
            Arc::new(Self { descriptor })
        }
    }

    #[async_trait]
    impl Module for EchoModule {
        fn descriptor(&self) -> &ModuleDescriptor {
            &self.descriptor
        }

        async fn execute_function(
            &self,
            name: &str,
            arguments: &Map<String, Value>,
        ) -> Result<String, FunctionError> {
            match name {
                "echo" => Ok(arguments.get("text").cloned().unwrap_or(Value::Null).to_string()),
                other => Err(FunctionError::unknown(other)),
            }
        }
    }

    fn registry() -> ModuleRegistry {
        let mut registry = ModuleRegistry::new(ModuleContext::default());
        registry.register("hotel", |_: &ModuleContext| EchoModule::named("hotel")).expect("hotel");
        registry
            .register("hospital", |_: &ModuleContext| EchoModule::named("hospital"))
            .expect("hospital");
        registry
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = registry();
        let error = registry
            .register("hotel", |_: &ModuleContext| EchoModule::named("hotel"))
            .expect_err("duplicate should fail");

        assert_eq!(error, RegistryError::DuplicateModule("hotel".to_string()));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn factory_name_must_match_registration() {
        let mut registry = ModuleRegistry::new(ModuleContext::default());
        let error = registry
            .register("bank", |_: &ModuleContext| EchoModule::named("hotel"))
            .expect_err("mismatch should fail");

        assert!(matches!(error, RegistryError::NameMismatch { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn resolve_unknown_module_lists_available_names() {
        let error = registry().resolve("bank").err().expect("bank is not registered");

        assert_eq!(
            error,
            RegistryError::ModuleNotFound {
                name: "bank".to_string(),
                available: vec!["hospital".to_string(), "hotel".to_string()],
            }
        );
    }

    #[test]
    fn resolve_active_uses_selector_and_reports_config_errors() {
        let registry = registry();

        let module = registry
            .resolve_active(&StaticModuleSelector("hotel".to_string()))
            .expect("hotel resolves");
        assert_eq!(module.name(), "hotel");

        let error = registry
            .resolve_active(&StaticModuleSelector("bank".to_string()))
            .err()
            .expect("bank is not registered");
        assert!(matches!(error, RegistryError::Config(ref message) if message.contains("bank")));
    }

    #[test]
    fn names_and_descriptors_are_sorted() {
        let registry = registry();

        assert_eq!(registry.names(), vec!["hospital".to_string(), "hotel".to_string()]);
        let names: Vec<&str> =
            registry.descriptors().iter().map(|descriptor| descriptor.name()).collect();
        assert_eq!(names, vec!["hospital", "hotel"]);
        assert!(registry.descriptor("hotel").is_some());
    }
}
