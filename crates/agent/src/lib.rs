//! Turn-loop runtime for the concierge assistant.
//!
//! The crate connects an LLM to one business module per session:
//! - `module` defines the capability contract every domain module implements
//! - `registry` holds module factories and resolves the session's active module
//! - `dispatch` validates function-call requests and executes them
//! - `llm` / `openrouter` talk to the model
//! - `runtime` drives a session's turns, `session` owns all live sessions
//!
//! # Loop
//!
//! 1. Append the user message and ask the model, passing the module's system
//!    prompt, the history and the function schemas.
//! 2. A text reply ends the turn.
//! 3. Function calls are dispatched, their results appended in call order,
//!    and the model is asked again, up to the configured iteration bound.
//!
//! The model never executes anything itself. Every call goes through
//! `DispatchEngine`, which rejects unknown functions and malformed arguments
//! before the module sees them.

pub mod dispatch;
pub mod llm;
pub mod module;
pub mod openrouter;
pub mod registry;
pub mod runtime;
pub mod session;

pub use dispatch::DispatchEngine;
pub use llm::{LlmClient, LlmError, LlmReply, LlmRequest, RetryPolicy, ScriptedLlmClient};
pub use module::Module;
pub use openrouter::OpenRouterClient;
pub use registry::{ModuleContext, ModuleFactory, ModuleRegistry};
pub use runtime::{AssistantReply, ConversationOrchestrator, FailureReport, OrchestratorSettings};
pub use session::{SessionManager, TurnError};
