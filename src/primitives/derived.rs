// ============================================================================
// ember-signals - Derived Values
// Lazily recomputed, cached values with equality bailout
// ============================================================================
//
// A Derived<T> is both a dependency and a subscriber. Its cached value is
// recomputed lazily on read: DIRTY means recompute now, PENDING_DERIVED
// means walk upstream first and recompute only if an ancestor actually
// changed. The getter receives the previous value, so user code can layer
// its own bailouts on top of the node's equality function.
// ============================================================================

use std::cell::RefCell;
use std::rc::Rc;

use crate::core::constants::*;
use crate::core::graph::{AnyDerived, NodeId, NodeKind};
use crate::core::system::{ReactiveSystem, SystemError};
use crate::reactivity::equality::{equals, EqualsFn};
use crate::reactivity::tracking::TrackGuard;

// =============================================================================
// DERIVED STATE
// =============================================================================

/// The typed half of a derived: cached value, getter, change detector.
pub(crate) struct DerivedState<T> {
    value: RefCell<T>,
    getter: RefCell<Box<dyn FnMut(&T) -> T>>,
    equals: EqualsFn<T>,
}

impl<T: Clone + 'static> AnyDerived for DerivedState<T> {
    fn refresh(&self) -> bool {
        let previous = self.value.borrow().clone();
        let next = (self.getter.borrow_mut())(&previous);
        let changed = !(self.equals)(&previous, &next);
        *self.value.borrow_mut() = next;
        changed
    }
}

// =============================================================================
// DERIVED HANDLE
// =============================================================================

/// A cached value computed from other reactive values.
///
/// # Example
/// ```
/// use ember_signals::ReactiveSystem;
///
/// let rs = ReactiveSystem::new();
/// let count = rs.signal(2);
/// let doubled = rs.derived({
///     let count = count.clone();
///     move |_| count.get() * 2
/// });
/// assert_eq!(doubled.get(), 4);
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Derived<T> {
    system: Rc<ReactiveSystem>,
    node: NodeId,
    state: Rc<DerivedState<T>>,
}

impl<T> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            system: self.system.clone(),
            node: self.node,
            state: self.state.clone(),
        }
    }
}

impl ReactiveSystem {
    /// Create a derived value.
    ///
    /// The getter receives the previous cached value (initially
    /// `T::default()`); the node starts DIRTY so the first read computes.
    pub fn derived<T, F>(&self, getter: F) -> Derived<T>
    where
        T: Default + Clone + PartialEq + 'static,
        F: FnMut(&T) -> T + 'static,
    {
        self.derived_with_equals(getter, equals::<T>)
    }

    /// Create a derived value with a custom equality function.
    pub fn derived_with_equals<T, F>(&self, getter: F, equals: EqualsFn<T>) -> Derived<T>
    where
        T: Default + Clone + 'static,
        F: FnMut(&T) -> T + 'static,
    {
        let state = Rc::new(DerivedState {
            value: RefCell::new(T::default()),
            getter: RefCell::new(Box::new(getter)),
            equals,
        });
        let node = self
            .store
            .borrow_mut()
            .alloc_node(DERIVED | DIRTY, NodeKind::Derived(state.clone()));
        Derived {
            system: self.handle(),
            node,
            state,
        }
    }

    // =========================================================================
    // RECOMPUTATION PROTOCOL (engine side)
    // =========================================================================

    /// Recompute a derived node under a fresh tracking window.
    ///
    /// Returns whether the cached value changed. The previous active
    /// subscriber is restored and the window closed even if the getter
    /// panics.
    pub(crate) fn update_derived(&self, id: NodeId) -> bool {
        let payload = match &self.store.borrow().node(id).kind {
            NodeKind::Derived(payload) => payload.clone(),
            _ => unreachable!("update_derived on a non-derived node"),
        };

        if self.flags(id) & TRACKING != 0 {
            // The getter is reading a value that depends on itself.
            log::warn!("derived {id:?} re-entered during its own update");
            self.report_error(id, anyhow::Error::new(SystemError::Cycle));
            return false;
        }

        let prev = self.active_sub.replace(Some(id));
        self.start_tracking(id);
        let _guard = TrackGuard {
            system: self,
            node: id,
            prev,
            restore_scope: false,
        };
        payload.refresh()
    }

    /// Bring a derived node up to date before its value is read.
    ///
    /// DIRTY recomputes immediately; PENDING_DERIVED resolves upstream via
    /// check_dirty first. When the recompute produces a new value, one level
    /// of subscribers is promoted from pending to dirty.
    pub(crate) fn process_derived_update(&self, id: NodeId, flags: u32) {
        let stale = flags & DIRTY != 0 || {
            let deps = self.store.borrow().node(id).deps;
            match deps {
                Some(deps) if self.check_dirty(deps) => true,
                _ => {
                    self.set_flags(id, self.flags(id) & !PENDING_DERIVED);
                    false
                }
            }
        };
        if stale && self.update_derived(id) {
            let subs = self.store.borrow().node(id).subs;
            if let Some(subs) = subs {
                self.shallow_propagate(subs);
            }
        }
    }
}

impl<T: Clone + 'static> Derived<T> {
    /// Read the derived value, recomputing if anything upstream changed.
    ///
    /// Inside a tracked body this installs a dependency edge onto the active
    /// subscriber (or, from a scope body, onto the scope).
    pub fn get(&self) -> T {
        self.refresh_if_stale();
        if let Some(sub) = self.system.active_sub.get() {
            self.system.link(self.node, sub);
        } else if let Some(scope) = self.system.active_scope.get() {
            self.system.link(self.node, scope);
        }
        self.state.value.borrow().clone()
    }

    /// Read the derived value without subscribing.
    ///
    /// Still re-validates, so the returned value is never stale.
    pub fn peek(&self) -> T {
        self.refresh_if_stale();
        self.state.value.borrow().clone()
    }

    fn refresh_if_stale(&self) {
        let flags = self.system.flags(self.node);
        if flags & (DIRTY | PENDING_DERIVED) != 0 {
            self.system.process_derived_update(self.node, flags);
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
