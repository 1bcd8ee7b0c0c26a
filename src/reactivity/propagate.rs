// ============================================================================
// ember-signals - Propagation
// Forward mark/sweep from changed sources, lazy re-validation on read
// ============================================================================
//
// propagate() walks the subscriber sub-graph reachable from a changed source
// and tags it with staleness flags: direct subscribers become DIRTY, nodes
// reached through a derived become PENDING_DERIVED ("an ancestor may have
// changed"), nodes reached through an effect become PENDING_EFFECT. Effect
// leaves are appended to the system's queue.
//
// check_dirty() is the other half: on read, a PENDING_DERIVED subscriber
// walks upstream, recomputes the deriveds that are definitely dirty, and
// reports whether any of them actually produced a new value. Unchanged
// values clear the pending bits on the way out, which is what makes the
// equality bailout sparse.
//
// Both traversals use explicit stacks; fanouts can be wide and chains deep,
// so native recursion is off the table.
//
// # Borrow Safety
// propagate and shallow_propagate never run user code and hold one store
// borrow for the whole traversal. check_dirty recomputes deriveds mid-walk,
// so it only takes short borrows and never holds one across update_derived.
// ============================================================================

use crate::core::constants::*;
use crate::core::graph::{LinkId, NodeId};
use crate::core::system::ReactiveSystem;
use crate::reactivity::tracking::is_valid_link;

impl ReactiveSystem {
    // =========================================================================
    // PROPAGATE
    // =========================================================================

    /// Mark everything downstream of `start` stale and enqueue effect leaves.
    ///
    /// `start` is the head of the changed dependency's subscriber chain. The
    /// branch stack holds the `next` continuation of every multi-subscriber
    /// fanout currently descended through; the target flag degrades from
    /// DIRTY (direct subscriber) to PENDING_DERIVED / PENDING_EFFECT once the
    /// walk passes through a derived or an effect.
    pub(crate) fn propagate(&self, start: LinkId) {
        let store = &mut *self.store.borrow_mut();

        let mut current = start;
        let mut next = store.link(current).next_sub;
        let mut branches: Vec<Option<LinkId>> = Vec::new();
        let mut target_flag = DIRTY;

        'top: loop {
            let sub = store.link(current).sub;
            let flags = store.node(sub).flags;
            let mut should_notify = false;

            if flags & (TRACKING | RECURSED | PROPAGATED) == 0 {
                store.node_mut(sub).flags = flags | target_flag | NOTIFIED;
                should_notify = true;
            } else if flags & RECURSED != 0 && flags & TRACKING == 0 {
                store.node_mut(sub).flags = (flags & !RECURSED) | target_flag | NOTIFIED;
                should_notify = true;
            } else if flags & PROPAGATED == 0 && is_valid_link(store, current, sub) {
                // Late-added edge inside the same pass: mark, and only keep
                // descending if the subscriber has subscribers of its own.
                store.node_mut(sub).flags = flags | RECURSED | target_flag | NOTIFIED;
                should_notify = store.node(sub).subs.is_some();
            }

            if should_notify {
                if let Some(sub_subs) = store.node(sub).subs {
                    current = sub_subs;
                    if store.link(sub_subs).next_sub.is_some() {
                        branches.push(next);
                        next = store.link(current).next_sub;
                        target_flag = PENDING_DERIVED;
                    } else {
                        target_flag = if flags & EFFECT != 0 {
                            PENDING_EFFECT
                        } else {
                            PENDING_DERIVED
                        };
                    }
                    continue;
                }
                if flags & EFFECT != 0 {
                    self.enqueue_effect(sub);
                }
            } else if flags & (TRACKING | target_flag) == 0 {
                store.node_mut(sub).flags = flags | target_flag | NOTIFIED;
                if flags & (EFFECT | NOTIFIED) == EFFECT {
                    self.enqueue_effect(sub);
                }
            } else if flags & target_flag == 0
                && flags & PROPAGATED != 0
                && is_valid_link(store, current, sub)
            {
                store.node_mut(sub).flags = flags | target_flag;
            }

            if let Some(n) = next {
                current = n;
                next = store.link(n).next_sub;
                target_flag = if branches.is_empty() { DIRTY } else { PENDING_DERIVED };
                continue;
            }

            while let Some(resume) = branches.pop() {
                if let Some(c) = resume {
                    current = c;
                    next = store.link(c).next_sub;
                    target_flag = if branches.is_empty() { DIRTY } else { PENDING_DERIVED };
                    continue 'top;
                }
            }
            break;
        }
    }

    // =========================================================================
    // SHALLOW PROPAGATE
    // =========================================================================

    /// Promote one level of subscribers from "maybe stale" to "stale".
    ///
    /// Called after a derived recomputes to a genuinely new value: every
    /// subscriber that was only PENDING_DERIVED becomes DIRTY, and pending
    /// effects that are not yet queued get queued.
    pub(crate) fn shallow_propagate(&self, head: LinkId) {
        let store = &mut *self.store.borrow_mut();
        let mut cursor = Some(head);
        while let Some(link) = cursor {
            let sub = store.link(link).sub;
            let flags = store.node(sub).flags;
            if flags & (PENDING_DERIVED | DIRTY) == PENDING_DERIVED {
                store.node_mut(sub).flags = flags | DIRTY | NOTIFIED;
                if flags & (EFFECT | NOTIFIED) == EFFECT {
                    self.enqueue_effect(sub);
                }
            }
            cursor = store.link(link).next_sub;
        }
    }

    // =========================================================================
    // CHECK DIRTY
    // =========================================================================

    /// Resolve whether a PENDING_DERIVED subscriber really is stale.
    ///
    /// Walks the subscriber's dep chain starting at `current`. Deriveds that
    /// are definitely DIRTY recompute on the spot; deriveds that are merely
    /// pending are descended into (their pending bit clears on descent, so a
    /// second reader does not repeat the walk). Every descent pushes the
    /// traversed link; the unwind recomputes each level while changes keep
    /// bubbling, and falls back to scanning the rest of the parent chain the
    /// moment a recompute comes back unchanged.
    ///
    /// Returns true iff some upstream derived produced a new value.
    pub(crate) fn check_dirty(&self, mut current: LinkId) -> bool {
        let mut stack: Vec<LinkId> = Vec::new();
        let mut dirty;

        'top: loop {
            dirty = loop {
                let (dep, next_dep) = {
                    let store = self.store.borrow();
                    let l = store.link(current);
                    (l.dep, l.next_dep)
                };
                let dep_flags = self.flags(dep);

                if dep_flags & (DERIVED | DIRTY) == DERIVED | DIRTY {
                    if self.update_derived(dep) {
                        let subs = self.store.borrow().node(dep).subs;
                        if let Some(subs) = subs {
                            if self.store.borrow().link(subs).next_sub.is_some() {
                                self.shallow_propagate(subs);
                            }
                        }
                        break true;
                    }
                } else if dep_flags & (DERIVED | PENDING_DERIVED) == DERIVED | PENDING_DERIVED {
                    self.set_flags(dep, dep_flags & !PENDING_DERIVED);
                    stack.push(current);
                    current = self
                        .store
                        .borrow()
                        .node(dep)
                        .deps
                        .expect("pending derived with no dependencies");
                    continue 'top;
                }

                match next_dep {
                    Some(n) => current = n,
                    None => break false,
                }
            };

            // Unwind: `stack` holds the links we descended through; each one
            // lives in the dep chain of the level above and points at the
            // derived we were validating.
            loop {
                let frame = match stack.pop() {
                    Some(f) => f,
                    None => return dirty,
                };
                let level = self.store.borrow().link(frame).dep;

                if dirty {
                    if self.update_derived(level) {
                        let subs = self.store.borrow().node(level).subs;
                        if let Some(subs) = subs {
                            if self.store.borrow().link(subs).next_sub.is_some() {
                                self.shallow_propagate(subs);
                            }
                        }
                        // Still dirty one level up; keep unwinding.
                        continue;
                    }
                    dirty = false;
                }

                // This level settled unchanged: resume scanning the rest of
                // the parent's dep chain, if any remains.
                let next_dep = self.store.borrow().link(frame).next_dep;
                if let Some(n) = next_dep {
                    current = n;
                    continue 'top;
                }
            }
        }
    }

    // =========================================================================
    // UPDATE DIRTY FLAG
    // =========================================================================

    /// Settle a subscriber's PENDING_DERIVED bit.
    ///
    /// Returns true (and marks the subscriber DIRTY) when some upstream
    /// derived actually changed; otherwise clears the pending bit.
    pub(crate) fn update_dirty_flag(&self, sub: NodeId, flags: u32) -> bool {
        let deps = self.store.borrow().node(sub).deps;
        let deps = match deps {
            Some(d) => d,
            None => {
                self.set_flags(sub, flags & !PENDING_DERIVED);
                return false;
            }
        };
        if self.check_dirty(deps) {
            self.set_flags(sub, flags | DIRTY);
            true
        } else {
            self.set_flags(sub, flags & !PENDING_DERIVED);
            false
        }
    }

    /// Append an effect to the FIFO worklist.
    pub(crate) fn enqueue_effect(&self, id: NodeId) {
        self.queued_effects.borrow_mut().push_back(id);
    }
}

// =============================================================================
// TESTS
// =============================================================================
