// ============================================================================
// ember-signals - A Fine-grained Reactive Signals Library for Rust
// ============================================================================
//
// Push-pull reactivity with sparse staleness flags: writes push DIRTY /
// PENDING marks forward through an intrusive dependency graph and queue
// effect leaves; reads pull, re-validating lazily and recomputing only the
// nodes whose upstream values actually changed. Diamonds settle in one
// update, unchanged intermediate values bail out downstream work, and
// nested effects re-run in creation order.
// ============================================================================

pub mod core;
pub mod primitives;
pub mod reactivity;

// Re-export the working surface at the crate root
pub use crate::core::system::{ErrorHook, ReactiveSystem, SystemError};
pub use crate::core::NodeId;
pub use crate::primitives::derived::Derived;
pub use crate::primitives::effect::StopHandle;
pub use crate::primitives::signal::Signal;
pub use crate::reactivity::equality::{
    always_equals, equals, never_equals, safe_equals_f32, safe_equals_f64, EqualsFn,
};

// =============================================================================
// TESTS
// =============================================================================
