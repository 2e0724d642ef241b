use crate::{request::Request, response::Response};
use anyhow::Result;
use std::sync::Arc;

/// Pre-route middleware. Returning `Ok(Some(response))` short-circuits the
/// chain: the handler is skipped and the response proceeds to the
/// post-route phase.
pub type PreMiddleware = Arc<dyn Fn(&mut Request) -> Result<Option<Response>> + Send + Sync>;

/// Post-route middleware. Observes the normalized response and may mutate
/// it in place.
pub type PostMiddleware = Arc<dyn Fn(&mut Request, &mut Response) -> Result<()> + Send + Sync>;

/// The phase a middleware entry participates in. A middleware wanted in
/// both phases is registered once per phase and runs once per phase.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    PreRoute,
    PostRoute,
}

/// A registered global middleware.
pub struct MiddlewareEntry<F> {
    func: F,
    priority: i32,
    seq: u64,
    phase: Phase,
    name: Option<String>,
}

/// Global middleware, kept sorted by `(priority, registration order)`.
/// Lower priorities run earlier; ties break by registration order so
/// execution is fully deterministic.
#[derive(Default)]
pub struct MiddlewareRegistry {
    pre: Vec<MiddlewareEntry<PreMiddleware>>,
    post: Vec<MiddlewareEntry<PostMiddleware>>,
    next_seq: u64,
}

// === impl MiddlewareEntry ===

impl<F> MiddlewareEntry<F> {
    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn func(&self) -> &F {
        &self.func
    }
}

// === impl MiddlewareRegistry ===

impl MiddlewareRegistry {
    pub fn register_pre(&mut self, func: PreMiddleware, priority: i32, name: Option<String>) {
        let seq = self.next_seq();
        self.pre.push(MiddlewareEntry {
            func,
            priority,
            seq,
            phase: Phase::PreRoute,
            name,
        });
        self.pre.sort_by_key(|entry| (entry.priority, entry.seq));
    }

    pub fn register_post(&mut self, func: PostMiddleware, priority: i32, name: Option<String>) {
        let seq = self.next_seq();
        self.post.push(MiddlewareEntry {
            func,
            priority,
            seq,
            phase: Phase::PostRoute,
            name,
        });
        self.post.sort_by_key(|entry| (entry.priority, entry.seq));
    }

    /// The global pre-route chain, in execution order. The effective pre
    /// chain for a route is this followed by the route's own middleware.
    pub fn pre(&self) -> &[MiddlewareEntry<PreMiddleware>] {
        &self.pre
    }

    /// The global post-route chain, in execution order. Per-route
    /// middleware does not participate in the post phase.
    pub fn post(&self) -> &[MiddlewareEntry<PostMiddleware>] {
        &self.post
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}
