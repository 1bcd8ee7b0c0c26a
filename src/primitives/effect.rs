// ============================================================================
// ember-signals - Effects
// Side-effectful leaves and the notification queue
// ============================================================================
//
// An effect is a subscriber whose body re-runs when a dependency changes.
// Effects created inside another body (or a scope) are linked as a
// *dependency* of the enclosing subscriber: the parent owns them for
// disposal and re-delivers them through its own dep chain, which is what
// keeps sibling re-runs in creation order. Only effects reached as leaves
// of a propagation enter the queue; nested children are re-run by
// process_pending_inner_effects from their parent.
// ============================================================================

use std::cell::RefCell;
use std::rc::Rc;

use crate::core::constants::*;
use crate::core::graph::{AnyEffect, NodeId, NodeKind};
use crate::core::system::ReactiveSystem;
use crate::reactivity::tracking::TrackGuard;

/// Writes inside effect bodies drain recursively; past this depth the graph
/// is assumed to be self-triggering.
const MAX_DRAIN_DEPTH: u32 = 1000;

// =============================================================================
// EFFECT STATE
// =============================================================================

pub(crate) struct EffectState {
    body: RefCell<Box<dyn FnMut() -> anyhow::Result<()>>>,
}

impl AnyEffect for EffectState {
    fn invoke(&self) -> anyhow::Result<()> {
        (self.body.borrow_mut())()
    }
}

// =============================================================================
// STOP HANDLE
// =============================================================================

/// Handle returned by [`ReactiveSystem::effect`] and
/// [`ReactiveSystem::effect_scope`].
///
/// The effect keeps running whether or not the handle is kept; disposal is
/// explicit via [`stop`](Self::stop), which severs every outgoing edge (and,
/// for scopes, transitively severs the children). Stopping twice is a no-op.
pub struct StopHandle {
    system: Rc<ReactiveSystem>,
    node: NodeId,
}

impl StopHandle {
    pub(crate) fn new(system: Rc<ReactiveSystem>, node: NodeId) -> Self {
        Self { system, node }
    }

    /// Sever the effect from everything it observes.
    pub fn stop(&self) {
        self.system.start_tracking(self.node);
        self.system.end_tracking(self.node);
    }

    #[cfg(test)]
    pub(crate) fn node(&self) -> NodeId {
        self.node
    }
}

// =============================================================================
// FACTORY AND RUN PROTOCOL
// =============================================================================

impl ReactiveSystem {
    /// Create an effect and run it once immediately.
    ///
    /// The body re-runs whenever a tracked dependency changes. An `Err`
    /// return is routed to the system's error hook; the effect stays
    /// subscribed.
    ///
    /// # Example
    /// ```
    /// use ember_signals::ReactiveSystem;
    /// use std::cell::Cell;
    /// use std::rc::Rc;
    ///
    /// let rs = ReactiveSystem::new();
    /// let count = rs.signal(1);
    /// let seen = Rc::new(Cell::new(0));
    ///
    /// let stop = rs.effect({
    ///     let count = count.clone();
    ///     let seen = seen.clone();
    ///     move || {
    ///         seen.set(count.get());
    ///         Ok(())
    ///     }
    /// });
    /// count.set(2);
    /// assert_eq!(seen.get(), 2);
    ///
    /// stop.stop();
    /// count.set(3);
    /// assert_eq!(seen.get(), 2);
    /// ```
    pub fn effect<F>(&self, body: F) -> StopHandle
    where
        F: FnMut() -> anyhow::Result<()> + 'static,
    {
        let state: Rc<dyn AnyEffect> = Rc::new(EffectState {
            body: RefCell::new(Box::new(body)),
        });
        let node = self
            .store
            .borrow_mut()
            .alloc_node(EFFECT, NodeKind::Effect(state));

        // Child of the enclosing body or scope, for disposal and ordered
        // re-delivery. The edge points effect -> parent, so the effect is
        // not reactive "upstream" of it.
        if let Some(sub) = self.active_sub.get() {
            self.link(node, sub);
        } else if let Some(scope) = self.active_scope.get() {
            self.link(node, scope);
        }

        self.run_effect(node);
        StopHandle::new(self.handle(), node)
    }

    /// Run an effect body under a fresh tracking window.
    pub(crate) fn run_effect(&self, id: NodeId) {
        let payload = match &self.store.borrow().node(id).kind {
            NodeKind::Effect(payload) => payload.clone(),
            _ => unreachable!("run_effect on a non-effect node"),
        };

        let prev = self.active_sub.replace(Some(id));
        self.start_tracking(id);
        let _guard = TrackGuard {
            system: self,
            node: id,
            prev,
            restore_scope: false,
        };
        if let Err(err) = payload.invoke() {
            self.report_error(id, err);
        }
    }

    // =========================================================================
    // NOTIFICATION PROTOCOL
    // =========================================================================

    /// Deliver one queued notification.
    ///
    /// Scopes never re-run themselves: they only forward to pending
    /// children, and report unhandled (false) when there is nothing to
    /// forward. A regular effect re-runs when definitely dirty, or when its
    /// pending state resolves dirty; otherwise it forwards to pending
    /// children.
    pub(crate) fn notify_effect(&self, id: NodeId) -> bool {
        let flags = self.flags(id);

        if flags & SCOPE != 0 {
            if flags & PENDING_EFFECT != 0 {
                self.process_pending_inner_effects(id);
                self.set_flags(id, self.flags(id) & !NOTIFIED);
                return true;
            }
            return false;
        }

        if flags & DIRTY != 0
            || (flags & PENDING_DERIVED != 0 && self.update_dirty_flag(id, flags))
        {
            self.run_effect(id);
        } else {
            self.process_pending_inner_effects(id);
            self.set_flags(id, self.flags(id) & !NOTIFIED);
        }
        true
    }

    /// Re-deliver to nested effects after their parent declined to re-run.
    ///
    /// Walks the parent's dep chain (creation order) and notifies every
    /// child effect that a propagation reached. Flags are re-read fresh:
    /// earlier steps of the protocol have already rewritten them.
    pub(crate) fn process_pending_inner_effects(&self, id: NodeId) {
        let flags = self.flags(id);
        if flags & PENDING_EFFECT == 0 {
            return;
        }
        self.set_flags(id, flags & !PENDING_EFFECT);

        // Snapshot the chain before notifying: a child re-run may splice
        // links while we walk.
        let children: Vec<NodeId> = {
            let store = self.store.borrow();
            let mut out = Vec::new();
            let mut cursor = store.node(id).deps;
            while let Some(link) = cursor {
                out.push(store.link(link).dep);
                cursor = store.link(link).next_dep;
            }
            out
        };

        for child in children {
            let child_flags = self.flags(child);
            if child_flags & EFFECT != 0 && child_flags & PROPAGATED != 0 {
                self.notify_effect(child);
            }
        }
    }

    /// Drain the queued-effect worklist in FIFO order.
    ///
    /// Runs at the close of the outermost batch and after unbatched writes.
    /// Writes performed by effect bodies re-enter here; the depth cap turns
    /// a self-triggering graph into a diagnostic instead of unbounded
    /// recursion.
    pub(crate) fn process_effect_notifications(&self) {
        let depth = self.drain_depth.get();
        if depth >= MAX_DRAIN_DEPTH {
            panic!(
                "maximum update depth exceeded: an effect keeps triggering \
                 itself through the signals it writes"
            );
        }
        self.drain_depth.set(depth + 1);

        loop {
            let id = match self.queued_effects.borrow_mut().pop_front() {
                Some(id) => id,
                None => break,
            };

            // Severed while queued (parent re-tracked away from it, or an
            // explicit stop): nothing left to observe, nothing to run.
            if self.store.borrow().node(id).deps.is_none() {
                self.set_flags(id, self.flags(id) & !NOTIFIED);
                continue;
            }

            if !self.notify_effect(id) {
                self.set_flags(id, self.flags(id) & !NOTIFIED);
            }
        }

        self.drain_depth.set(depth);
    }
}

// =============================================================================
// TESTS
// =============================================================================
