pub mod engine;
pub mod states;

pub use engine::{LifecycleError, SessionLifecycle};
pub use states::{FailureReason, SessionEvent, SessionState, TransitionOutcome};
