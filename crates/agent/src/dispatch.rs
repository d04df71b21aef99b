use std::collections::HashSet;
use std::sync::Arc;

use concierge_core::audit::{AuditCategory, AuditOutcome};
use concierge_core::{
    AuditContext, AuditEvent, AuditSink, FunctionCallRequest, FunctionCallResult, FunctionError,
    NoopAuditSink,
};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::module::Module;

const DEFAULT_CONCURRENCY: usize = 4;

/// Validates and executes function-call requests against one module.
///
/// Every request yields exactly one [`FunctionCallResult`] with the same
/// `call_id`. Lookup and argument failures never reach the module; module
/// errors are folded into error content. Nothing here returns `Err`.
#[derive(Clone)]
pub struct DispatchEngine {
    module: Arc<dyn Module>,
    concurrency: usize,
    audit_sink: Arc<dyn AuditSink>,
}

impl DispatchEngine {
    pub fn new(module: Arc<dyn Module>) -> Self {
        Self { module, concurrency: DEFAULT_CONCURRENCY, audit_sink: Arc::new(NoopAuditSink) }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_audit_sink(mut self, audit_sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = audit_sink;
        self
    }

    pub fn module(&self) -> &Arc<dyn Module> {
        &self.module
    }

    pub async fn dispatch(
        &self,
        request: &FunctionCallRequest,
        audit: &AuditContext,
    ) -> FunctionCallResult {
        let arguments = match self.validate(request) {
            Ok(arguments) => arguments,
            Err(error) => return self.reject(request, error, audit),
        };

        match self.module.execute_function(&request.function_name, arguments).await {
            Ok(content) => {
                debug!(
                    event_name = "dispatch.executed",
                    correlation_id = %audit.correlation_id,
                    module = %self.module.name(),
                    function = %request.function_name,
                    call_id = %request.call_id.as_str(),
                    "function executed"
                );
                self.emit(request, "dispatch.executed", AuditOutcome::Success, None, audit);
                FunctionCallResult::success(request, content)
            }
            Err(error) => {
                warn!(
                    event_name = "dispatch.failed",
                    correlation_id = %audit.correlation_id,
                    module = %self.module.name(),
                    function = %request.function_name,
                    call_id = %request.call_id.as_str(),
                    error = %error,
                    "function returned an error"
                );
                self.emit(request, "dispatch.failed", AuditOutcome::Failed, Some(&error), audit);
                FunctionCallResult::failure(request, &error)
            }
        }
    }

    /// Runs one LLM response's calls. Independent requests fan out with
    /// bounded concurrency; results come back in request order. A `call_id`
    /// repeated within the batch is answered with `DuplicateCall` and not
    /// executed again.
    pub async fn dispatch_batch(
        &self,
        requests: &[FunctionCallRequest],
        audit: &AuditContext,
    ) -> Vec<FunctionCallResult> {
        let mut seen = HashSet::with_capacity(requests.len());
        let pending: Vec<BoxFuture<'_, FunctionCallResult>> = requests
            .iter()
            .map(|request| {
                if seen.insert(&request.call_id) {
                    self.dispatch(request, audit).boxed()
                } else {
                    let error = FunctionError::DuplicateCall { call_id: request.call_id.clone() };
                    async move { self.reject(request, error, audit) }.boxed()
                }
            })
            .collect();

        stream::iter(pending).buffered(self.concurrency).collect().await
    }

    fn validate<'a>(
        &self,
        request: &'a FunctionCallRequest,
    ) -> Result<&'a Map<String, Value>, FunctionError> {
        let spec = self
            .module
            .descriptor()
            .function(&request.function_name)
            .ok_or_else(|| FunctionError::unknown(request.function_name.clone()))?;

        spec.parameters.validate(&request.arguments).map_err(|violations| {
            FunctionError::InvalidArguments { function: spec.name.clone(), violations }
        })?;

        request.arguments.as_object().ok_or_else(|| FunctionError::InvalidArguments {
            function: spec.name.clone(),
            violations: Vec::new(),
        })
    }

    fn reject(
        &self,
        request: &FunctionCallRequest,
        error: FunctionError,
        audit: &AuditContext,
    ) -> FunctionCallResult {
        warn!(
            event_name = "dispatch.rejected",
            correlation_id = %audit.correlation_id,
            module = %self.module.name(),
            function = %request.function_name,
            call_id = %request.call_id.as_str(),
            kind = error.kind().as_str(),
            error = %error,
            "function call rejected before execution"
        );
        self.emit(request, "dispatch.rejected", AuditOutcome::Rejected, Some(&error), audit);
        FunctionCallResult::failure(request, &error)
    }

    fn emit(
        &self,
        request: &FunctionCallRequest,
        event_type: &str,
        outcome: AuditOutcome,
        error: Option<&FunctionError>,
        audit: &AuditContext,
    ) {
        let mut event = AuditEvent::new(
            audit.session_id.clone(),
            Some(self.module.name().to_string()),
            audit.correlation_id.clone(),
            event_type,
            AuditCategory::Dispatch,
            audit.actor.clone(),
            outcome,
        )
        .with_metadata("function", request.function_name.clone())
        .with_metadata("call_id", request.call_id.as_str());

        if let Some(error) = error {
            event = event.with_metadata("error_kind", error.kind().as_str());
        }

        self.audit_sink.emit(event);
    }
}
