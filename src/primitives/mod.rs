// ============================================================================
// ember-signals - Primitives Module
// Signals, derived values, effects, and effect scopes
// ============================================================================

pub mod derived;
pub mod effect;
pub mod scope;
pub mod signal;

pub use derived::Derived;
pub use effect::StopHandle;
pub use signal::Signal;
