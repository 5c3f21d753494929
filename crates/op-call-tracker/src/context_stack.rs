//! Ambient Context - strictly nested "current call" context
//!
//! A run-wrapper pushes a context right before invoking a tracked function
//! and restores it right after the synchronous part returns. While the
//! function's own synchronous code runs, it can fetch its context without
//! having it passed through every frame. Continuations scheduled past the
//! first suspension point find no context.
//!
//! Restores must happen in exact reverse push order. Violations are reported
//! as [`ContextError`] and leave the stack untouched. A token dropped while
//! its thread panics pops its frame, so an unwinding call never stays current.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use serde_json::Value;
use tracing::{error, warn};

use crate::error::ContextError;
use crate::track::DataKey;

/// Context pushed for one tracked call: access to its side-data bag.
#[derive(Clone)]
pub struct TrackContext {
    sn: u64,
    get: Rc<dyn Fn(&str) -> Option<Value>>,
    update: Rc<dyn Fn(DataKey, Value)>,
}

impl TrackContext {
    pub fn new(
        sn: u64,
        get: impl Fn(&str) -> Option<Value> + 'static,
        update: impl Fn(DataKey, Value) + 'static,
    ) -> Self {
        Self {
            sn,
            get: Rc::new(get),
            update: Rc::new(update),
        }
    }

    /// Sequence number of the call this context belongs to
    pub fn sn(&self) -> u64 {
        self.sn
    }

    pub fn get_data(&self, key: &str) -> Option<Value> {
        (self.get)(key)
    }

    pub fn update_data(&self, key: impl Into<DataKey>, value: Value) {
        (self.update)(key.into(), value)
    }

    /// Whether both contexts are handles to the same pushed context
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.get, &other.get)
    }
}

impl fmt::Debug for TrackContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackContext").field("sn", &self.sn).finish()
    }
}

struct StackInner<C> {
    frames: RefCell<Vec<C>>,
}

/// LIFO stack of ambient contexts.
///
/// Cloning creates a new handle to the same stack.
pub struct ContextStack<C> {
    inner: Rc<StackInner<C>>,
}

impl<C> Clone for ContextStack<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<C> Default for ContextStack<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for ContextStack<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextStack")
            .field("depth", &self.depth())
            .finish()
    }
}

impl<C> ContextStack<C> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(StackInner {
                frames: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Push `context` as current and return the token that pops it
    pub fn prepare(&self, context: C) -> Restore<C> {
        let mut frames = self.inner.frames.borrow_mut();
        frames.push(context);
        Restore {
            stack: Rc::clone(&self.inner),
            depth: frames.len(),
            restored: Cell::new(false),
        }
    }

    pub fn current(&self) -> Option<C>
    where
        C: Clone,
    {
        self.inner.frames.borrow().last().cloned()
    }

    /// Like [`current`](Self::current), but fails when no context is active
    pub fn require_current(&self) -> Result<C, ContextError>
    where
        C: Clone,
    {
        self.current().ok_or(ContextError::NoCurrentContext)
    }

    pub fn depth(&self) -> usize {
        self.inner.frames.borrow().len()
    }

    /// Run `f` with `context` current, restoring as soon as `f` returns.
    ///
    /// For an async function `f` should only create the future; the context
    /// is gone by the time the future is first polled elsewhere. If `f`
    /// panics, the context is popped while unwinding.
    pub fn scope<R>(&self, context: C, f: impl FnOnce() -> R) -> Result<R, ContextError> {
        let restore = self.prepare(context);
        let out = f();
        restore.restore()?;
        Ok(out)
    }
}

/// One-shot token returned by [`ContextStack::prepare`].
#[must_use = "a prepared context stays current until restored"]
pub struct Restore<C> {
    stack: Rc<StackInner<C>>,
    depth: usize,
    restored: Cell<bool>,
}

impl<C> Restore<C> {
    /// Pop this token's context, making the previous one current again
    pub fn restore(&self) -> Result<(), ContextError> {
        if self.restored.get() {
            error!(depth = self.depth, "Context restored twice");
            return Err(ContextError::AlreadyRestored { depth: self.depth });
        }

        // Log only after the borrow ends; subscribers may read the stack.
        let current = self.stack.frames.borrow().len();
        if current != self.depth {
            error!(
                expected = self.depth,
                current,
                "Unbalanced context restore"
            );
            return Err(ContextError::Unbalanced {
                expected: self.depth,
                current,
            });
        }

        let popped = self.stack.frames.borrow_mut().pop();
        self.restored.set(true);
        drop(popped);
        Ok(())
    }

    /// Pop this token's frame during a panic, if it is still the innermost one
    fn unwind(&self) -> bool {
        let popped = match self.stack.frames.try_borrow_mut() {
            Ok(mut frames) if frames.len() == self.depth => frames.pop(),
            _ => None,
        };
        let unwound = popped.is_some();
        if unwound {
            self.restored.set(true);
        }
        drop(popped);
        unwound
    }

    pub fn is_restored(&self) -> bool {
        self.restored.get()
    }

    /// Stack depth at which this token's context sits
    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl<C> Drop for Restore<C> {
    fn drop(&mut self) {
        if self.restored.get() {
            return;
        }
        if std::thread::panicking() {
            if self.unwind() {
                warn!(depth = self.depth, "Context popped while unwinding");
            } else {
                warn!(depth = self.depth, "Context left in place while unwinding out of order");
            }
        } else {
            warn!(depth = self.depth, "Context token dropped without restore");
        }
    }
}

thread_local! {
    static AMBIENT: ContextStack<TrackContext> = ContextStack::new();
}

/// This thread's ambient stack
pub fn ambient() -> ContextStack<TrackContext> {
    AMBIENT.with(ContextStack::clone)
}

/// Push `context` onto this thread's ambient stack
pub fn prepare(context: TrackContext) -> Restore<TrackContext> {
    AMBIENT.with(|stack| stack.prepare(context))
}

/// Innermost active ambient context on this thread
pub fn current() -> Option<TrackContext> {
    AMBIENT.with(ContextStack::current)
}

pub fn require_current() -> Result<TrackContext, ContextError> {
    AMBIENT.with(ContextStack::require_current)
}
