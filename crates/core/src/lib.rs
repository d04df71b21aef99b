//! Shared vocabulary for the concierge assistant: module descriptors and
//! their function schemas, call requests and results, conversation turns,
//! the session lifecycle, audit events and application configuration.

pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod lifecycle;

pub use audit::{
    AuditContext, AuditEvent, AuditSink, InMemoryAuditSink, NoopAuditSink, TracingAuditSink,
};
pub use domain::call::{CallId, FunctionCallRequest, FunctionCallResult, FunctionErrorKind};
pub use domain::conversation::{SessionId, Turn};
pub use domain::function::{ArgumentViolation, FunctionSpec, ParameterSchema, ParameterType};
pub use domain::module::ModuleDescriptor;
pub use errors::{DescriptorError, FunctionError, RegistryError};
pub use lifecycle::{FailureReason, SessionEvent, SessionLifecycle, SessionState};
