// ============================================================================
// ember-signals - Effect Scopes
// Containers that own child effects for collective disposal
// ============================================================================
//
// A scope runs its body exactly once. Effects created inside the body link
// themselves to the scope, so one stop() tears the whole family down. When a
// propagation reaches a child, the scope is what lands on the queue; it
// forwards the notification through its dep chain without re-running
// anything of its own.
// ============================================================================

use crate::core::constants::*;
use crate::core::graph::{NodeId, NodeKind};
use crate::core::system::ReactiveSystem;
use crate::primitives::effect::StopHandle;
use crate::reactivity::tracking::TrackGuard;

impl ReactiveSystem {
    /// Run `body` inside a new effect scope.
    ///
    /// Effects created by the body become children of the scope; the
    /// returned handle stops all of them at once. Scope bodies do not
    /// re-run.
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
    /// let scope = rs.effect_scope({
    ///     let rs = rs.clone();
    ///     let count = count.clone();
    ///     let seen = seen.clone();
    ///     move || {
    ///         rs.effect(move || {
    ///             seen.set(count.get());
    ///             Ok(())
    ///         });
    ///         Ok(())
    ///     }
    /// });
    /// count.set(2);
    /// assert_eq!(seen.get(), 2);
    ///
    /// scope.stop();
    /// count.set(3);
    /// assert_eq!(seen.get(), 2);
    /// ```
    pub fn effect_scope<F>(&self, body: F) -> StopHandle
    where
        F: FnOnce() -> anyhow::Result<()>,
    {
        let node = self
            .store
            .borrow_mut()
            .alloc_node(EFFECT | SCOPE, NodeKind::Scope);
        self.run_effect_scope(node, body);
        StopHandle::new(self.handle(), node)
    }

    fn run_effect_scope(&self, id: NodeId, body: impl FnOnce() -> anyhow::Result<()>) {
        let prev = self.active_scope.replace(Some(id));
        self.start_tracking(id);
        let _guard = TrackGuard {
            system: self,
            node: id,
            prev,
            restore_scope: true,
        };
        if let Err(err) = body() {
            self.report_error(id, err);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::core::system::ReactiveSystem;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn scope_children_keep_running_until_the_scope_stops() {
        let rs = ReactiveSystem::new();
        let count = rs.signal(0);
        let triggers = Rc::new(Cell::new(0));

        let scope = rs.effect_scope({
            let rs = rs.clone();
            let count = count.clone();
            let triggers = triggers.clone();
            move || {
                rs.effect(move || {
                    triggers.set(triggers.get() + 1);
                    count.get();
                    Ok(())
                });
                Ok(())
            }
        });

        assert_eq!(triggers.get(), 1);
        count.set(2);
        assert_eq!(triggers.get(), 2);

        scope.stop();
        count.set(3);
        assert_eq!(triggers.get(), 2);
    }

    #[test]
    fn scope_children_rerun_in_creation_order() {
        let rs = ReactiveSystem::new();
        let a = rs.signal(0);
        let b = rs.signal(0);
        let order = Rc::new(std::cell::RefCell::new(Vec::new()));

        let _scope = rs.effect_scope({
            let rs = rs.clone();
            let a = a.clone();
            let b = b.clone();
            let order = order.clone();
            move || {
                rs.effect({
                    let a = a.clone();
                    let order = order.clone();
                    move || {
                        order.borrow_mut().push("first inner");
                        a.get();
                        Ok(())
                    }
                });
                rs.effect({
                    let a = a.clone();
                    let b = b.clone();
                    let order = order.clone();
                    move || {
                        order.borrow_mut().push("last inner");
                        a.get();
                        b.get();
                        Ok(())
                    }
                });
                Ok(())
            }
        });

        order.borrow_mut().clear();
        rs.batch(|| {
            b.set(1);
            a.set(1);
        });
        assert_eq!(*order.borrow(), vec!["first inner", "last inner"]);
    }

    #[test]
    fn nested_scopes_restore_the_outer_scope() {
        let rs = ReactiveSystem::new();
        let count = rs.signal(0);
        let outer_child_runs = Rc::new(Cell::new(0));

        let _scope = rs.effect_scope({
            let rs = rs.clone();
            let count = count.clone();
            let outer_child_runs = outer_child_runs.clone();
            move || {
                let inner = rs.effect_scope(|| Ok(()));
                inner.stop();

                // Created after the nested scope closed: must attach to the
                // outer scope, not the stopped inner one.
                rs.effect({
                    let count = count.clone();
                    let outer_child_runs = outer_child_runs.clone();
                    move || {
                        count.get();
                        outer_child_runs.set(outer_child_runs.get() + 1);
                        Ok(())
                    }
                });
                Ok(())
            }
        });

        count.set(1);
        assert_eq!(outer_child_runs.get(), 2);
    }
}
