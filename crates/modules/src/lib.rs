//! Built-in business modules: hospital appointments, hotel reservations and
//! internet package sales. Each one exposes its own functions plus the shared
//! `get_creator_info`.

use std::sync::Arc;

use concierge_agent::{Module, ModuleContext, ModuleRegistry};
use concierge_core::config::AssistantConfig;
use concierge_core::RegistryError;

pub mod common;
pub mod hospital;
pub mod hotel;
pub mod internet_sales;

pub use hospital::{AppointmentBook, HospitalModule};
pub use hotel::{HotelLedger, HotelModule};
pub use internet_sales::InternetSalesModule;

pub fn module_context(assistant: &AssistantConfig) -> ModuleContext {
    ModuleContext {
        creator_name: assistant.creator_name.clone(),
        creator_contact: assistant.creator_contact.clone(),
    }
}

/// Registry with every built-in module. Stateful modules share one store
/// across all the sessions they are built for.
pub fn builtin_registry(context: ModuleContext) -> Result<ModuleRegistry, RegistryError> {
    let mut registry = ModuleRegistry::new(context);

    let hospital = hospital::descriptor()?;
    let book = Arc::new(AppointmentBook::sample());
    registry.register(hospital::NAME, move |context: &ModuleContext| -> Arc<dyn Module> {
        Arc::new(HospitalModule::new(hospital.clone(), context.clone(), Arc::clone(&book)))
    })?;

    let hotel = hotel::descriptor()?;
    let ledger = Arc::new(HotelLedger::sample());
    registry.register(hotel::NAME, move |context: &ModuleContext| -> Arc<dyn Module> {
        Arc::new(HotelModule::new(hotel.clone(), context.clone(), Arc::clone(&ledger)))
    })?;

    let internet = internet_sales::descriptor()?;
    registry.register(internet_sales::NAME, move |context: &ModuleContext| -> Arc<dyn Module> {
        Arc::new(InternetSalesModule::new(
            internet.clone(),
            context.clone(),
            internet_sales::catalog(),
        ))
    })?;

    Ok(registry)
}
