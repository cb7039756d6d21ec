//! Operation hooks
//!
//! Every wrapped CRUD call runs its "before" hooks in registration order,
//! then the store call, then its "after" hooks with either the result or
//! the error. Hooks of one call share a fresh [`MutationContext`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bson::{Bson, Document};
use tracing::{debug, info};
use uuid::Uuid;

use super::errors::{ModelError, ModelResult};

/// Future returned by a hook
pub type HookFuture<'a> = Pin<Box<dyn Future<Output = ModelResult<()>> + Send + 'a>>;

/// Per-call scratch space shared by the hooks of one call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationContext {
    values: Document,
}

impl MutationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Bson>) {
        self.values.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&Bson> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get_str(key).ok()
    }

    pub fn remove(&mut self, key: &str) -> Option<Bson> {
        self.values.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_document(&self) -> &Document {
        &self.values
    }
}

/// The envelope a hook receives.
///
/// `result` and `error` are both `None` for "before" hooks; exactly one of
/// them is set for "after" hooks.
pub struct HookCall<'a> {
    pub collection_name: &'a str,
    pub method_name: &'static str,
    pub arguments: &'a [Bson],
    pub context: &'a mut MutationContext,
    pub result: Option<&'a Bson>,
    pub error: Option<&'a ModelError>,
}

impl HookCall<'_> {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Runs before the store call. An error aborts the call before the store
/// is touched.
pub trait BeforeHook: Send + Sync {
    fn before<'a>(&'a self, call: HookCall<'a>) -> HookFuture<'a>;
}

/// Runs after the store call with its outcome
pub trait AfterHook: Send + Sync {
    fn after<'a>(&'a self, call: HookCall<'a>) -> HookFuture<'a>;
}

/// Synchronous hook from a closure; usable as either kind
pub struct FnHook<F>(F);

/// Wraps a closure as a hook
pub fn hook_fn<F>(f: F) -> FnHook<F>
where
    F: Fn(HookCall<'_>) -> ModelResult<()> + Send + Sync,
{
    FnHook(f)
}

impl<F> BeforeHook for FnHook<F>
where
    F: Fn(HookCall<'_>) -> ModelResult<()> + Send + Sync,
{
    fn before<'a>(&'a self, call: HookCall<'a>) -> HookFuture<'a> {
        Box::pin(std::future::ready((self.0)(call)))
    }
}

impl<F> AfterHook for FnHook<F>
where
    F: Fn(HookCall<'_>) -> ModelResult<()> + Send + Sync,
{
    fn after<'a>(&'a self, call: HookCall<'a>) -> HookFuture<'a> {
        Box::pin(std::future::ready((self.0)(call)))
    }
}

/// Ordered hook lists of one model
#[derive(Clone, Default)]
pub struct ModelHooks {
    pub before: Vec<Arc<dyn BeforeHook>>,
    pub after: Vec<Arc<dyn AfterHook>>,
}

impl ModelHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_before(mut self, hook: impl BeforeHook + 'static) -> Self {
        self.before.push(Arc::new(hook));
        self
    }

    pub fn with_after(mut self, hook: impl AfterHook + 'static) -> Self {
        self.after.push(Arc::new(hook));
        self
    }

    /// Registers one value as both a before and an after hook
    pub fn with_both<H>(mut self, hook: H) -> Self
    where
        H: BeforeHook + AfterHook + 'static,
    {
        let hook = Arc::new(hook);
        self.before.push(hook.clone());
        self.after.push(hook);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty()
    }
}

impl fmt::Debug for ModelHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHooks")
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .finish()
    }
}

/// Context key holding the trace id
pub const TRACE_ID: &str = "traceId";
/// Context key holding the call start time
pub const STARTED_AT: &str = "startedAt";

/// Built-in tracing hook.
///
/// "before" stores a trace id and start time in the context; "after"
/// emits one `info` event per call with the elapsed time and outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceHook;

impl BeforeHook for TraceHook {
    fn before<'a>(&'a self, call: HookCall<'a>) -> HookFuture<'a> {
        let trace_id = Uuid::new_v4().to_string();
        debug!(
            collection = call.collection_name,
            method = call.method_name,
            trace_id = %trace_id,
            "operation started"
        );
        call.context.insert(TRACE_ID, trace_id);
        call.context.insert(STARTED_AT, bson::DateTime::now());
        Box::pin(std::future::ready(Ok(())))
    }
}

impl AfterHook for TraceHook {
    fn after<'a>(&'a self, call: HookCall<'a>) -> HookFuture<'a> {
        let elapsed_ms = match call.context.get(STARTED_AT) {
            Some(Bson::DateTime(started)) => {
                bson::DateTime::now().timestamp_millis() - started.timestamp_millis()
            }
            _ => 0,
        };
        let trace_id = call.context.get_str(TRACE_ID).unwrap_or("-");
        match call.error {
            Some(error) => info!(
                collection = call.collection_name,
                method = call.method_name,
                trace_id,
                elapsed_ms,
                outcome = "error",
                error = %error,
                "operation finished"
            ),
            None => info!(
                collection = call.collection_name,
                method = call.method_name,
                trace_id,
                elapsed_ms,
                outcome = "ok",
                "operation finished"
            ),
        }
        Box::pin(std::future::ready(Ok(())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call<'a>(context: &'a mut MutationContext, arguments: &'a [Bson]) -> HookCall<'a> {
        HookCall {
            collection_name: "users",
            method_name: "find",
            arguments,
            context,
            result: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_trace_hook_fills_context() {
        let mut context = MutationContext::new();
        TraceHook.before(call(&mut context, &[])).await.unwrap();
        assert!(context.contains_key(TRACE_ID));
        assert!(matches!(context.get(STARTED_AT), Some(Bson::DateTime(_))));

        TraceHook.after(call(&mut context, &[])).await.unwrap();
        assert_eq!(context.len(), 2);
    }

    #[tokio::test]
    async fn test_fn_hook_sees_envelope() {
        let hook = hook_fn(|call: HookCall<'_>| {
            assert_eq!(call.collection_name, "users");
            assert_eq!(call.arguments.len(), 1);
            call.context.insert("seen", true);
            Ok(())
        });
        let mut context = MutationContext::new();
        let arguments = [Bson::from(1)];
        BeforeHook::before(&hook, call(&mut context, &arguments))
            .await
            .unwrap();
        assert_eq!(context.get("seen"), Some(&Bson::Boolean(true)));
    }

    #[tokio::test]
    async fn test_fn_hook_error_propagates() {
        let hook = hook_fn(|_call: HookCall<'_>| Err(ModelError::hook("denied")));
        let mut context = MutationContext::new();
        let err = AfterHook::after(&hook, call(&mut context, &[]))
            .await
            .unwrap_err();
        assert_eq!(err, ModelError::Hook("denied".into()));
    }

    #[test]
    fn test_hooks_debug_shows_counts() {
        let hooks = ModelHooks::new().with_both(TraceHook);
        assert_eq!(format!("{:?}", hooks), "ModelHooks { before: 1, after: 1 }");
    }
}
