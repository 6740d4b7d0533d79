//! Completion hooks and the retry pipeline.
//!
//! A client carries an ordered chain of completion hooks. After every
//! attempt the chain is invoked with the attempt's outcome, the response,
//! and the retry count, and reduced with boolean AND, stopping at the first
//! hook that returns `false`. All-true forwards the outcome to the
//! response's public completion; any-false resets the response and re-issues
//! the request through the same pool.
//!
//! Retries are unbounded at this layer; hooks implement their own caps and
//! backoff:
//!
//! ```rust,ignore
//! client.on_completion(|outcome, _response, retry| {
//!     // Re-issue 503s at most twice.
//!     !(outcome.value() == Some(&503) && retry < 2)
//! });
//! ```

use std::sync::{Arc, RwLock};

use crate::{promise::Settled, response::Response};

/// A completion hook. Returning `false` asks the client to retry.
pub type CompletionHook = dyn Fn(&Settled<u16>, &Response, u32) -> bool + Send + Sync;

/// The ordered hook chain with its all-of-bool reduction.
#[derive(Clone, Default)]
pub(crate) struct CompletionChain {
    hooks: Arc<RwLock<Vec<Arc<CompletionHook>>>>,
}

impl CompletionChain {
    pub(crate) fn add<F>(&self, hook: F)
    where
        F: Fn(&Settled<u16>, &Response, u32) -> bool + Send + Sync + 'static,
    {
        self.hooks.write().unwrap().push(Arc::new(hook));
    }

    /// Run hooks in registration order; stop at the first `false`.
    /// Hooks run outside the chain's lock so they may register more hooks.
    pub(crate) fn all(&self, outcome: &Settled<u16>, response: &Response, retry: u32) -> bool {
        let hooks = self.hooks.read().unwrap().clone();
        hooks.iter().all(|hook| hook(outcome, response, retry))
    }
}
