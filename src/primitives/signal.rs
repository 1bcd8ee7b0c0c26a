// ============================================================================
// ember-signals - Signals
// Writeable source values
// ============================================================================
//
// A Signal<T> is a leaf of the graph: it is only ever a dependency. The
// value lives in the typed handle; the arena node carries just the link
// chains. Writes are equality-gated, then propagate forward and drain the
// effect queue unless a batch is open.
// ============================================================================

use std::cell::RefCell;
use std::rc::Rc;

use crate::core::graph::{NodeId, NodeKind};
use crate::core::system::ReactiveSystem;
use crate::reactivity::equality::{equals, EqualsFn};

// =============================================================================
// SIGNAL STATE
// =============================================================================

/// The typed half of a signal: current value plus change detector.
pub(crate) struct SignalState<T> {
    value: RefCell<T>,
    equals: EqualsFn<T>,
}

// =============================================================================
// SIGNAL HANDLE
// =============================================================================

/// A writeable reactive value.
///
/// Cloning the handle clones a reference; all clones address the same node.
///
/// # Example
/// ```
/// use ember_signals::ReactiveSystem;
///
/// let rs = ReactiveSystem::new();
/// let count = rs.signal(1);
/// assert_eq!(count.get(), 1);
/// count.set(2);
/// assert_eq!(count.get(), 2);
/// ```
pub struct Signal<T> {
    system: Rc<ReactiveSystem>,
    node: NodeId,
    state: Rc<SignalState<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            system: self.system.clone(),
            node: self.node,
            state: self.state.clone(),
        }
    }
}

impl ReactiveSystem {
    /// Create a writeable signal with PartialEq change detection.
    pub fn signal<T: PartialEq + 'static>(&self, initial: T) -> Signal<T> {
        self.signal_with_equals(initial, equals::<T>)
    }

    /// Create a writeable signal with a custom equality function.
    ///
    /// Writes that compare equal to the current value are no-ops.
    pub fn signal_with_equals<T: 'static>(&self, initial: T, equals: EqualsFn<T>) -> Signal<T> {
        let node = self.store.borrow_mut().alloc_node(0, NodeKind::Signal);
        Signal {
            system: self.handle(),
            node,
            state: Rc::new(SignalState {
                value: RefCell::new(initial),
                equals,
            }),
        }
    }
}

impl<T: 'static> Signal<T> {
    /// Read the current value.
    ///
    /// Inside a tracked body this installs a dependency edge onto the
    /// active subscriber.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.track();
        self.state.value.borrow().clone()
    }

    /// Read the current value without installing a dependency.
    pub fn peek(&self) -> T
    where
        T: Clone,
    {
        self.state.value.borrow().clone()
    }

    /// Read through a closure without cloning. Tracked like [`get`](Self::get).
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&self.state.value.borrow())
    }

    /// Write a new value.
    ///
    /// A value equal to the current one (under the signal's equality
    /// function) is a no-op. Otherwise downstream subscribers are marked
    /// stale and, outside a batch, queued effects run before this returns.
    pub fn set(&self, value: T) {
        let changed = {
            let current = self.state.value.borrow();
            !(self.state.equals)(&current, &value)
        };
        if !changed {
            return;
        }
        *self.state.value.borrow_mut() = value;
        self.notify();
    }

    /// Mutate the value in place.
    ///
    /// In-place mutation cannot be compared against the previous value, so
    /// it always counts as a change when anyone is subscribed.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.state.value.borrow_mut());
        self.notify();
    }

    fn track(&self) {
        if let Some(sub) = self.system.active_sub.get() {
            self.system.link(self.node, sub);
        }
    }

    fn notify(&self) {
        let subs = self.system.store.borrow().node(self.node).subs;
        if let Some(head) = subs {
            self.system.propagate(head);
            if self.system.batch_depth.get() == 0 {
                self.system.process_effect_notifications();
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn node(&self) -> NodeId {
        self.node
    }
}

// =============================================================================
// TESTS
// =============================================================================
