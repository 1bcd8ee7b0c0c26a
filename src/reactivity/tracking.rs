// ============================================================================
// ember-signals - Dependency Tracking
// Building and retiring edges as a subscriber's dependency set changes
// ============================================================================
//
// A subscriber's dep chain is rebuilt in place on every run of its body:
// start_tracking resets the reconfirmation boundary (deps_tail), each read
// calls link() which either advances the boundary over an edge that already
// exists or splices in a new one, and end_tracking severs whatever is left
// beyond the boundary. Repeat reads inside one pass are O(1).
//
// # Borrow Safety
// Everything in this module is pure graph surgery - no user code runs - so
// each entry point takes one store borrow for its whole duration.
// ============================================================================

use crate::core::constants::*;
use crate::core::graph::{GraphStore, LinkId, NodeId};
use crate::core::system::ReactiveSystem;

impl ReactiveSystem {
    // =========================================================================
    // LINK
    // =========================================================================

    /// Install an edge dep -> sub, reusing an existing edge when possible.
    ///
    /// Reuse cases, in order:
    /// 1. The edge is already the reconfirmed tail (duplicate read).
    /// 2. The next unconfirmed edge in the chain targets `dep` (same read
    ///    order as the previous pass): advance the boundary over it.
    /// 3. The dependency's last subscriber is already `sub` and that edge is
    ///    live in sub's chain (back-edge inside a nested re-entry).
    /// Otherwise a new link is spliced in at the boundary.
    pub(crate) fn link(&self, dep: NodeId, sub: NodeId) {
        let store = &mut *self.store.borrow_mut();

        let current_dep = store.node(sub).deps_tail;
        if let Some(cd) = current_dep {
            if store.link(cd).dep == dep {
                return;
            }
        }

        let next_dep = match current_dep {
            Some(cd) => store.link(cd).next_dep,
            None => store.node(sub).deps,
        };
        if let Some(nd) = next_dep {
            if store.link(nd).dep == dep {
                store.node_mut(sub).deps_tail = Some(nd);
                return;
            }
        }

        let dep_last_sub = store.node(dep).subs_tail;
        if let Some(dls) = dep_last_sub {
            if store.link(dls).sub == sub && is_valid_link(store, dls, sub) {
                return;
            }
        }

        link_new_dep(store, dep, sub, next_dep, current_dep);
    }

    // =========================================================================
    // TRACKING WINDOW
    // =========================================================================

    /// Prepare `sub` to re-track its dependencies.
    ///
    /// Resets the reconfirmation boundary and clears the staleness bits; the
    /// TRACKING bit shields the node from being re-marked by propagation
    /// while its body runs.
    pub(crate) fn start_tracking(&self, sub: NodeId) {
        let store = &mut *self.store.borrow_mut();
        let node = store.node_mut(sub);
        node.deps_tail = None;
        node.flags = (node.flags & !(NOTIFIED | RECURSED | PROPAGATED)) | TRACKING;
    }

    /// Close the tracking window of `sub`.
    ///
    /// Edges past the reconfirmation boundary were not read this pass and
    /// are severed; a boundary of None means the body took no dependencies
    /// at all and the whole chain goes.
    pub(crate) fn end_tracking(&self, sub: NodeId) {
        let store = &mut *self.store.borrow_mut();
        match store.node(sub).deps_tail {
            Some(tail) => {
                if let Some(stale) = store.link(tail).next_dep {
                    clear_tracking(store, stale);
                    store.link_mut(tail).next_dep = None;
                }
            }
            None => {
                if let Some(deps) = store.node(sub).deps {
                    clear_tracking(store, deps);
                }
                store.node_mut(sub).deps = None;
            }
        }
        store.node_mut(sub).flags &= !TRACKING;
    }
}

// =============================================================================
// TRACKING GUARD
// =============================================================================

/// Closes a tracking window when dropped, restoring the saved active
/// subscriber (or scope) and running end_tracking.
///
/// User bodies run between start_tracking and end_tracking; the guard makes
/// the close-off survive a panicking getter or body, so a failed run cannot
/// leave the graph with a dangling TRACKING window.
pub(crate) struct TrackGuard<'a> {
    pub system: &'a ReactiveSystem,
    pub node: NodeId,
    pub prev: Option<NodeId>,
    pub restore_scope: bool,
}

impl Drop for TrackGuard<'_> {
    fn drop(&mut self) {
        if self.restore_scope {
            self.system.active_scope.set(self.prev);
        } else {
            self.system.active_sub.set(self.prev);
        }
        self.system.end_tracking(self.node);
    }
}

// =============================================================================
// FREE FUNCTIONS OVER THE STORE
// =============================================================================
//
// These take the store directly so callers that already hold the borrow
// (propagate, end_tracking) can use them without re-borrowing.
// =============================================================================

/// Whether `check` is present in sub's dep chain between deps and deps_tail.
pub(crate) fn is_valid_link(store: &GraphStore, check: LinkId, sub: NodeId) -> bool {
    let deps_tail = match store.node(sub).deps_tail {
        Some(dt) => dt,
        None => return false,
    };
    let mut cursor = store.node(sub).deps;
    while let Some(link) = cursor {
        if link == check {
            return true;
        }
        if link == deps_tail {
            break;
        }
        cursor = store.link(link).next_dep;
    }
    false
}

/// Splice a fresh link between `deps_tail` and `next_dep` on the subscriber
/// side and append it on the dependency side. Both tails move to it.
fn link_new_dep(
    store: &mut GraphStore,
    dep: NodeId,
    sub: NodeId,
    next_dep: Option<LinkId>,
    deps_tail: Option<LinkId>,
) {
    let new_link = store.alloc_link(dep, sub, next_dep);

    match deps_tail {
        None => store.node_mut(sub).deps = Some(new_link),
        Some(dt) => store.link_mut(dt).next_dep = Some(new_link),
    }

    if store.node(dep).subs.is_none() {
        store.node_mut(dep).subs = Some(new_link);
    } else {
        let old_tail = store.node(dep).subs_tail.expect("subs chain without tail");
        store.link_mut(new_link).prev_sub = Some(old_tail);
        store.link_mut(old_tail).next_sub = Some(new_link);
    }

    store.node_mut(sub).deps_tail = Some(new_link);
    store.node_mut(dep).subs_tail = Some(new_link);
}

/// Sever every link from `link` to the end of its dep chain.
///
/// Each link is unspliced from its dependency's subscriber list and returned
/// to the free list. A dependency that loses its last subscriber and is
/// itself a subscriber (flags != 0: a derived, or a child effect) is marked
/// DIRTY for its next observation and its own dep chain is spliced into the
/// walk, clearing transitively orphaned nodes without recursion.
pub(crate) fn clear_tracking(store: &mut GraphStore, mut link: LinkId) {
    loop {
        let (dep, next_dep, next_sub, prev_sub) = {
            let l = store.link(link);
            (l.dep, l.next_dep, l.next_sub, l.prev_sub)
        };

        match next_sub {
            Some(ns) => store.link_mut(ns).prev_sub = prev_sub,
            None => store.node_mut(dep).subs_tail = prev_sub,
        }
        match prev_sub {
            Some(ps) => store.link_mut(ps).next_sub = next_sub,
            None => store.node_mut(dep).subs = next_sub,
        }
        store.free_link(link);

        if store.node(dep).subs.is_none() && store.node(dep).flags != 0 {
            let flags = store.node(dep).flags;
            if flags & DIRTY == 0 {
                store.node_mut(dep).flags = flags | DIRTY;
            }
            if let Some(orphan_deps) = store.node(dep).deps {
                let orphan_tail = store.node(dep).deps_tail.expect("deps chain without tail");
                store.link_mut(orphan_tail).next_dep = next_dep;
                let node = store.node_mut(dep);
                node.deps = None;
                node.deps_tail = None;
                link = orphan_deps;
                continue;
            }
        }

        match next_dep {
            Some(n) => link = n,
            None => return,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
