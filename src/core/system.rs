// ============================================================================
// ember-signals - Reactive System
// Engine state: arenas, batch depth, active subscriber, effect queue
// ============================================================================
//
// One ReactiveSystem owns one reactive graph. Everything is single-threaded
// and interior-mutable; handles share the system through Rc, obtained from a
// weak self-reference stashed at construction. There is no global state -
// two systems never observe each other.
// ============================================================================

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use thiserror::Error;

use crate::core::graph::{GraphStore, NodeId};

// =============================================================================
// ERRORS
// =============================================================================

/// Errors raised by the system itself (as opposed to user bodies).
#[derive(Debug, Error)]
pub enum SystemError {
    /// A derived getter re-entered the node it is currently computing.
    #[error("derived value re-entered while updating (dependency cycle)")]
    Cycle,
}

/// Hook invoked when an effect body returns an error or the system detects a
/// recoverable fault. Receives the offending node and the error.
pub type ErrorHook = Box<dyn Fn(NodeId, anyhow::Error)>;

// =============================================================================
// REACTIVE SYSTEM
// =============================================================================

/// The reactive engine.
///
/// Holds the graph arenas, the active-subscriber slot, the batch depth, the
/// pause stack and the queued-effect worklist. Create one with
/// [`ReactiveSystem::new`] and build nodes through the factory methods in
/// the `primitives` module.
pub struct ReactiveSystem {
    /// Node and link arenas. Never borrowed across a user callback.
    pub(crate) store: RefCell<GraphStore>,

    /// Nesting depth of explicit batches; effects drain at zero.
    pub(crate) batch_depth: Cell<u32>,

    /// The subscriber whose body is currently executing, if any.
    /// Reads install dependency edges onto this node.
    pub(crate) active_sub: Cell<Option<NodeId>>,

    /// The innermost effect scope, if any.
    pub(crate) active_scope: Cell<Option<NodeId>>,

    /// Saved `active_sub` values from pause_tracking.
    pub(crate) pause_stack: RefCell<Vec<Option<NodeId>>>,

    /// FIFO worklist of effects reached by propagation.
    pub(crate) queued_effects: RefCell<VecDeque<NodeId>>,

    /// Re-entrancy depth of the queue drain (writes inside effect bodies).
    pub(crate) drain_depth: Cell<u32>,

    /// Where user errors go. Falls back to `log::error!` when absent.
    pub(crate) on_error: Option<ErrorHook>,

    /// Weak self-reference so factory methods can hand shared ownership to
    /// the handles they return.
    self_weak: RefCell<Weak<ReactiveSystem>>,
}

impl ReactiveSystem {
    /// Create a system that reports user errors through the `log` facade.
    pub fn new() -> Rc<Self> {
        Self::build(None)
    }

    /// Create a system with an error hook.
    ///
    /// The hook receives the id of the node whose body failed and the error
    /// itself. The graph stays consistent after a reported error.
    pub fn with_error_hook(hook: impl Fn(NodeId, anyhow::Error) + 'static) -> Rc<Self> {
        Self::build(Some(Box::new(hook)))
    }

    fn build(on_error: Option<ErrorHook>) -> Rc<Self> {
        let system = Rc::new(Self {
            store: RefCell::new(GraphStore::new()),
            batch_depth: Cell::new(0),
            active_sub: Cell::new(None),
            active_scope: Cell::new(None),
            pause_stack: RefCell::new(Vec::new()),
            queued_effects: RefCell::new(VecDeque::new()),
            drain_depth: Cell::new(0),
            on_error,
            self_weak: RefCell::new(Weak::new()),
        });
        *system.self_weak.borrow_mut() = Rc::downgrade(&system);
        system
    }

    /// Shared ownership of this system, for stashing inside handles.
    pub(crate) fn handle(&self) -> Rc<ReactiveSystem> {
        self.self_weak
            .borrow()
            .upgrade()
            .expect("reactive system dropped while a handle was being created")
    }

    // =========================================================================
    // BATCHING
    // =========================================================================

    /// Enter a batch: effect delivery is deferred until the matching
    /// [`end_batch`](Self::end_batch).
    pub fn start_batch(&self) {
        self.batch_depth.set(self.batch_depth.get() + 1);
    }

    /// Leave a batch. When the outermost batch ends, the queued effects
    /// drain in FIFO order.
    pub fn end_batch(&self) {
        let depth = self.batch_depth.get().saturating_sub(1);
        self.batch_depth.set(depth);
        if depth == 0 {
            self.process_effect_notifications();
        }
    }

    /// Run `f` inside a batch.
    ///
    /// The batch closes (and drains) even if `f` panics.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        struct BatchGuard<'a>(&'a ReactiveSystem);

        impl Drop for BatchGuard<'_> {
            fn drop(&mut self) {
                self.0.end_batch();
            }
        }

        self.start_batch();
        let _guard = BatchGuard(self);
        f()
    }

    /// True while inside a batch.
    pub fn is_batching(&self) -> bool {
        self.batch_depth.get() > 0
    }

    // =========================================================================
    // PAUSED TRACKING
    // =========================================================================

    /// Suspend dependency tracking: reads performed until the matching
    /// [`resume_tracking`](Self::resume_tracking) install no edges.
    pub fn pause_tracking(&self) {
        self.pause_stack.borrow_mut().push(self.active_sub.take());
    }

    /// Restore the tracking state saved by the matching pause.
    pub fn resume_tracking(&self) {
        let restored = self.pause_stack.borrow_mut().pop();
        debug_assert!(restored.is_some(), "resume_tracking without pause_tracking");
        self.active_sub.set(restored.flatten());
    }

    /// Run `f` with tracking paused. Tracking resumes even if `f` panics.
    pub fn untrack<R>(&self, f: impl FnOnce() -> R) -> R {
        struct ResumeGuard<'a>(&'a ReactiveSystem);

        impl Drop for ResumeGuard<'_> {
            fn drop(&mut self) {
                self.0.resume_tracking();
            }
        }

        self.pause_tracking();
        let _guard = ResumeGuard(self);
        f()
    }

    // =========================================================================
    // INTERNAL HELPERS
    // =========================================================================

    pub(crate) fn flags(&self, id: NodeId) -> u32 {
        self.store.borrow().node(id).flags
    }

    pub(crate) fn set_flags(&self, id: NodeId, flags: u32) {
        self.store.borrow_mut().node_mut(id).flags = flags;
    }

    /// Route a recoverable error to the hook, or to the log when none is set.
    pub(crate) fn report_error(&self, from: NodeId, err: anyhow::Error) {
        match &self.on_error {
            Some(hook) => hook(from, err),
            None => log::error!("unhandled reactive error from {from:?}: {err:#}"),
        }
    }
}

// =============================================================================
// TEST INTROSPECTION
// =============================================================================

#[cfg(test)]
impl ReactiveSystem {
    /// Dependencies of `id` in dep-chain (creation) order.
    pub(crate) fn dep_nodes(&self, id: NodeId) -> Vec<NodeId> {
        let store = self.store.borrow();
        let mut out = Vec::new();
        let mut cursor = store.node(id).deps;
        while let Some(link) = cursor {
            out.push(store.link(link).dep);
            cursor = store.link(link).next_dep;
        }
        out
    }

    /// Subscribers of `id` in sub-chain order.
    pub(crate) fn sub_nodes(&self, id: NodeId) -> Vec<NodeId> {
        let store = self.store.borrow();
        let mut out = Vec::new();
        let mut cursor = store.node(id).subs;
        while let Some(link) = cursor {
            out.push(store.link(link).sub);
            cursor = store.link(link).next_sub;
        }
        out
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_depth_nests() {
        let rs = ReactiveSystem::new();
        assert!(!rs.is_batching());

        rs.start_batch();
        assert!(rs.is_batching());
        rs.start_batch();
        rs.end_batch();
        assert!(rs.is_batching());
        rs.end_batch();
        assert!(!rs.is_batching());
    }

    #[test]
    fn batch_closure_restores_depth_on_panic() {
        let rs = ReactiveSystem::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            rs.batch(|| panic!("boom"));
        }));
        assert!(result.is_err());
        assert!(!rs.is_batching());
    }

    #[test]
    fn pause_and_resume_restore_the_active_subscriber() {
        let rs = ReactiveSystem::new();
        let node = rs
            .store
            .borrow_mut()
            .alloc_node(crate::core::constants::EFFECT, crate::core::graph::NodeKind::Scope);

        rs.active_sub.set(Some(node));
        rs.pause_tracking();
        assert!(rs.active_sub.get().is_none());
        rs.resume_tracking();
        assert_eq!(rs.active_sub.get(), Some(node));
    }

    #[test]
    fn untrack_restores_on_panic() {
        let rs = ReactiveSystem::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            rs.untrack(|| panic!("boom"));
        }));
        assert!(result.is_err());
        assert!(rs.pause_stack.borrow().is_empty());
    }
}
