//! Single-assignment result handles.
//!
//! A [`Promise`] is settled at most once, with a value, a failure, or a
//! cancellation, and fans the outcome out to any number of continuations.
//! Continuations attached after settlement run immediately; continuations
//! attached before run in attachment order when the promise settles. The
//! promise is also a [`Future`], so callers can simply `.await` it.

use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll, Waker},
};

use crate::{Error, Result};

type Callback<T> = Box<dyn FnOnce(&Settled<T>) + Send>;

/// The terminal state of a [`Promise`].
pub enum Settled<T> {
    /// The promise resolved with a value.
    Done(T),
    /// The promise failed.
    Failed(Error),
    /// The promise was cancelled by the caller.
    Canceled,
}

impl<T: Clone> Settled<T> {
    pub(crate) fn duplicate(&self) -> Settled<T> {
        match self {
            Settled::Done(v) => Settled::Done(v.clone()),
            Settled::Failed(e) => Settled::Failed(e.duplicate()),
            Settled::Canceled => Settled::Canceled,
        }
    }
}

impl<T> Settled<T> {
    /// Returns the resolved value, if any.
    pub fn value(&self) -> Option<&T> {
        match self {
            Settled::Done(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the failure, if any.
    pub fn error(&self) -> Option<&Error> {
        match self {
            Settled::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Returns true if the promise resolved with a value.
    pub fn is_done(&self) -> bool {
        matches!(self, Settled::Done(_))
    }

    /// Returns true if the promise failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Settled::Failed(_))
    }

    /// Returns true if the promise was cancelled.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Settled::Canceled)
    }
}

impl<T: fmt::Debug> fmt::Debug for Settled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Settled::Done(v) => f.debug_tuple("Done").field(v).finish(),
            Settled::Failed(e) => f.debug_tuple("Failed").field(e).finish(),
            Settled::Canceled => f.write_str("Canceled"),
        }
    }
}

enum State<T> {
    Pending {
        callbacks: Vec<Callback<T>>,
        wakers: Vec<Waker>,
    },
    Settled(Settled<T>),
}

/// A single-assignment asynchronous result.
///
/// Cloning a `Promise` yields another handle to the same cell; the first of
/// [`done`](Promise::done), [`fail`](Promise::fail) or
/// [`cancel`](Promise::cancel) wins and later settlement attempts are
/// ignored.
pub struct Promise<T> {
    inner: Arc<Mutex<State<T>>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Promise {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// Create a new, pending promise.
    pub fn new() -> Self {
        Promise {
            inner: Arc::new(Mutex::new(State::Pending {
                callbacks: Vec::new(),
                wakers: Vec::new(),
            })),
        }
    }

    /// Resolve the promise with a value. No-op if already settled.
    pub fn done(&self, value: T) {
        self.settle(Settled::Done(value));
    }

    /// Fail the promise. No-op if already settled.
    pub fn fail(&self, error: Error) {
        self.settle(Settled::Failed(error));
    }

    /// Cancel the promise. No-op if already settled.
    pub fn cancel(&self) {
        self.settle(Settled::Canceled);
    }

    /// Returns true once the promise has settled.
    pub fn is_ready(&self) -> bool {
        matches!(*self.inner.lock().unwrap(), State::Settled(_))
    }

    pub(crate) fn settle(&self, outcome: Settled<T>) {
        let pending = {
            let mut state = self.inner.lock().unwrap();
            match &mut *state {
                State::Pending { callbacks, wakers } => {
                    let callbacks = std::mem::take(callbacks);
                    let wakers = std::mem::take(wakers);
                    *state = State::Settled(outcome.duplicate());
                    Some((callbacks, wakers, outcome))
                }
                State::Settled(_) => None,
            }
        };

        // Continuations run outside the lock, in attachment order.
        if let Some((callbacks, wakers, outcome)) = pending {
            for callback in callbacks {
                callback(&outcome);
            }
            for waker in wakers {
                waker.wake();
            }
        }
    }

    /// Attach a continuation that runs when the promise settles, or
    /// immediately if it already has.
    pub fn on_ready<F>(&self, f: F)
    where
        F: FnOnce(&Settled<T>) + Send + 'static,
    {
        let mut f = Some(f);
        let settled = {
            let mut state = self.inner.lock().unwrap();
            match &mut *state {
                State::Pending { callbacks, .. } => {
                    callbacks.push(Box::new(f.take().unwrap()));
                    None
                }
                State::Settled(s) => Some(s.duplicate()),
            }
        };
        if let Some(s) = settled {
            (f.take().unwrap())(&s);
        }
    }

    /// Attach a continuation invoked only on resolution with a value.
    pub fn on_done<F>(&self, f: F)
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.on_ready(move |s| {
            if let Settled::Done(v) = s {
                f(v);
            }
        });
    }

    /// Attach a continuation invoked only on failure.
    pub fn on_fail<F>(&self, f: F)
    where
        F: FnOnce(&Error) + Send + 'static,
    {
        self.on_ready(move |s| {
            if let Settled::Failed(e) = s {
                f(e);
            }
        });
    }

    /// Attach a continuation invoked only on cancellation.
    pub fn on_cancel<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_ready(move |s| {
            if let Settled::Canceled = s {
                f();
            }
        });
    }

    /// Monadic chain: run `f` on the resolved value and adopt the outcome of
    /// the promise it returns. Failure and cancellation propagate to the
    /// returned promise without invoking `f`.
    pub fn then<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        let next = Promise::new();
        let chained = next.clone();
        self.on_ready(move |s| match s {
            Settled::Done(v) => {
                let inner = chained.clone();
                f(v.clone()).on_ready(move |s| inner.settle(s.duplicate()));
            }
            Settled::Failed(e) => chained.fail(e.duplicate()),
            Settled::Canceled => chained.cancel(),
        });
        next
    }
}

impl<T: Clone + Send + 'static> Default for Promise<T> {
    fn default() -> Self {
        Promise::new()
    }
}

impl<T: Clone> Future for Promise<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.inner.lock().unwrap();
        match &mut *state {
            State::Pending { wakers, .. } => {
                if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
            State::Settled(s) => Poll::Ready(match s {
                Settled::Done(v) => Ok(v.clone()),
                Settled::Failed(e) => Err(e.duplicate()),
                Settled::Canceled => Err(Error::canceled()),
            }),
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match *self.inner.lock().unwrap() {
            State::Pending { .. } => "pending",
            State::Settled(Settled::Done(_)) => "done",
            State::Settled(Settled::Failed(_)) => "failed",
            State::Settled(Settled::Canceled) => "canceled",
        };
        f.debug_struct("Promise").field("state", &state).finish()
    }
}
