//! Composable interceptors wrapping every model call and tool call.
//!
//! # Architecture
//!
//! ```text
//! request  -> M1.process_request -> M2.process_request -> M3.process_request -> <call>
//! response <- M1.process_response <- M2.process_response <- M3.process_response <-
//! error    -> nearest outer M.process_error that recovers, else propagates
//! ```
//!
//! Requests flow outer → inner; responses flow inner → outer (mirror order). A
//! middleware can set [`MiddlewareContext::result`] in `process_request` to
//! short-circuit: inner middlewares and the underlying operation are skipped, but
//! every middleware that already saw the request still runs its `process_response` in
//! mirror order. Every hook has a no-op default, so a middleware only overrides what
//! it cares about.

mod builtin;

pub use builtin::{
    ContextCompactionMiddleware, LoggingMiddleware, PIIRedactionMiddleware, RateLimitMiddleware,
    SecurityMiddleware, TokenTrackingMiddleware,
};

use crate::context::AgentContext;
use crate::error::MiddlewareError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;

/// Which underlying call a [`MiddlewareContext`] wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ModelCall,
    ToolCall,
}

/// The mutable input/output carried through one pass of the chain.
///
/// Concretely either a model request (serialized messages + tool defs) or a tool
/// call's parameter map; both are represented as [`serde_json::Value`] so a single
/// `MiddlewareContext` type serves both operations.
pub type MiddlewareData = serde_json::Value;

/// A read-only view of the agent driving this call, passed to middlewares instead of a
/// back-reference to the agent itself — this avoids a cyclic `Agent <-> Middleware`
/// reference by passing identity fields rather than `&Agent`.
#[derive(Debug, Clone)]
pub struct AgentView {
    pub agent_id: String,
    pub agent_name: String,
}

/// Context object threaded through one middleware chain invocation.
pub struct MiddlewareContext<'a> {
    pub operation: Operation,
    pub agent: AgentView,
    pub agent_context: &'a AgentContext,
    pub data: MiddlewareData,
    /// When set by a middleware's `process_request`, short-circuits the chain: inner
    /// middlewares and the underlying call are skipped.
    pub result: Option<MiddlewareData>,
    /// Scratch space for a middleware to stash per-call state (e.g. a start `Instant`
    /// serialized as nanos) between `process_request` and `process_response`.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl<'a> MiddlewareContext<'a> {
    pub fn new(
        operation: Operation,
        agent: AgentView,
        agent_context: &'a AgentContext,
        data: MiddlewareData,
    ) -> Self {
        Self {
            operation,
            agent,
            agent_context,
            data,
            result: None,
            metadata: HashMap::new(),
        }
    }
}

/// One interceptor in the chain. Every hook has a no-op default so a middleware only
/// implements what it needs.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Human-readable name, used in logs and in [`MiddlewareError`].
    fn name(&self) -> &str;

    /// Inspect/mutate the request. Returning `Err` aborts the call outright (no
    /// `process_error` recovery is attempted for request-phase errors — recovery is
    /// for the underlying operation's own failures).
    async fn process_request<'a>(
        &self,
        ctx: &mut MiddlewareContext<'a>,
    ) -> Result<(), MiddlewareError> {
        let _ = ctx;
        Ok(())
    }

    /// Inspect/mutate the response.
    async fn process_response<'a>(
        &self,
        ctx: &MiddlewareContext<'a>,
        result: MiddlewareData,
    ) -> MiddlewareData {
        let _ = ctx;
        result
    }

    /// Attempt to recover from an error raised by the underlying operation or an
    /// inner middleware. Returning `Some` recovers with that value; `None` re-raises.
    async fn process_error<'a>(
        &self,
        ctx: &MiddlewareContext<'a>,
        error: &(dyn Error + Send + Sync),
    ) -> Option<MiddlewareData> {
        let _ = (ctx, error);
        None
    }
}

/// An ordered stack of middlewares wrapping a single underlying async operation.
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl Default for MiddlewareChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self {
            middlewares: Vec::new(),
        }
    }

    /// Append a middleware. Call order is outer-to-inner request order (the order
    /// passed to `with` / `push`).
    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    pub fn with(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.push(middleware);
        self
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Run `underlying` through the chain: `process_request` outer→inner, then either
    /// the short-circuited result or `underlying`, then `process_response` inner→outer.
    /// `process_error` is attempted, nearest-outer-first, from wherever the failure
    /// originated.
    pub async fn run<F, Fut>(
        &self,
        mut ctx: MiddlewareContext<'_>,
        underlying: F,
    ) -> Result<MiddlewareData, Box<dyn Error + Send + Sync>>
    where
        F: FnOnce(MiddlewareData) -> Fut,
        Fut: std::future::Future<Output = Result<MiddlewareData, Box<dyn Error + Send + Sync>>>,
    {
        let mut short_circuit_at: Option<usize> = None;

        for (idx, mw) in self.middlewares.iter().enumerate() {
            if let Err(e) = mw.process_request(&mut ctx).await {
                return self.recover_or_raise(&ctx, idx, Box::new(e)).await;
            }
            if ctx.result.is_some() {
                short_circuit_at = Some(idx);
                break;
            }
        }

        let mut value = if let Some(result) = ctx.result.take() {
            result
        } else {
            match underlying(ctx.data.clone()).await {
                Ok(v) => v,
                Err(e) => return self.recover_or_raise(&ctx, self.middlewares.len(), e).await,
            }
        };

        let ran_up_to = short_circuit_at.unwrap_or(self.middlewares.len());
        for mw in self.middlewares[..ran_up_to].iter().rev() {
            value = mw.process_response(&ctx, value).await;
        }

        Ok(value)
    }

    /// Walk outward from `failed_at` (exclusive of middlewares that never saw the
    /// request) looking for the first `process_error` that recovers.
    async fn recover_or_raise(
        &self,
        ctx: &MiddlewareContext<'_>,
        failed_at: usize,
        error: Box<dyn Error + Send + Sync>,
    ) -> Result<MiddlewareData, Box<dyn Error + Send + Sync>> {
        for mw in self.middlewares[..failed_at.min(self.middlewares.len())]
            .iter()
            .rev()
        {
            if let Some(recovered) = mw.process_error(ctx, error.as_ref()).await {
                return Ok(recovered);
            }
        }
        Err(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        short_circuit: bool,
    }

    #[async_trait]
    impl Middleware for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        async fn process_request<'a>(
            &self,
            ctx: &mut MiddlewareContext<'a>,
        ) -> Result<(), MiddlewareError> {
            self.log.lock().unwrap().push(format!("{}.req", self.name));
            if self.short_circuit {
                ctx.result = Some(serde_json::json!("short-circuited"));
            }
            Ok(())
        }

        async fn process_response<'a>(
            &self,
            _ctx: &MiddlewareContext<'a>,
            result: MiddlewareData,
        ) -> MiddlewareData {
            self.log.lock().unwrap().push(format!("{}.res", self.name));
            result
        }
    }

    fn view() -> AgentView {
        AgentView {
            agent_id: "a1".into(),
            agent_name: "Agent".into(),
        }
    }

    #[tokio::test]
    async fn mirror_order_across_three_middlewares() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = MiddlewareChain::new()
            .with(Arc::new(Recorder {
                name: "M1",
                log: log.clone(),
                short_circuit: false,
            }))
            .with(Arc::new(Recorder {
                name: "M2",
                log: log.clone(),
                short_circuit: false,
            }))
            .with(Arc::new(Recorder {
                name: "M3",
                log: log.clone(),
                short_circuit: false,
            }));

        let agent_ctx = AgentContext::new();
        let ctx = MiddlewareContext::new(
            Operation::ModelCall,
            view(),
            &agent_ctx,
            serde_json::json!({}),
        );
        let called = Arc::new(AtomicUsize::new(0));
        let called2 = called.clone();
        chain
            .run(ctx, |data| async move {
                called2.fetch_add(1, Ordering::SeqCst);
                Ok(data)
            })
            .await
            .unwrap();

        assert_eq!(called.load(Ordering::SeqCst), 1);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["M1.req", "M2.req", "M3.req", "M3.res", "M2.res", "M1.res"]
        );
    }

    #[tokio::test]
    async fn short_circuit_skips_inner_and_underlying_but_runs_outer_response() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = MiddlewareChain::new()
            .with(Arc::new(Recorder {
                name: "M1",
                log: log.clone(),
                short_circuit: false,
            }))
            .with(Arc::new(Recorder {
                name: "M2",
                log: log.clone(),
                short_circuit: true,
            }))
            .with(Arc::new(Recorder {
                name: "M3",
                log: log.clone(),
                short_circuit: false,
            }));

        let agent_ctx = AgentContext::new();
        let ctx = MiddlewareContext::new(
            Operation::ModelCall,
            view(),
            &agent_ctx,
            serde_json::json!({}),
        );
        let called = Arc::new(AtomicUsize::new(0));
        let called2 = called.clone();
        let result = chain
            .run(ctx, |data| async move {
                called2.fetch_add(1, Ordering::SeqCst);
                Ok(data)
            })
            .await
            .unwrap();

        assert_eq!(called.load(Ordering::SeqCst), 0, "underlying must not fire");
        assert_eq!(result, serde_json::json!("short-circuited"));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["M1.req", "M2.req", "M2.res", "M1.res"],
            "M3 must not run at all"
        );
    }
}
