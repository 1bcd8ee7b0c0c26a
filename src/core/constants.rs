// ============================================================================
// ember-signals - Constants
// Flag bits carried by every node in the reactive graph
// ============================================================================
//
// One flag word per node encodes both what the node is (derived, effect,
// scope; plain signals carry no bits) and where it stands in the current
// propagation pass. The status bits are sparse on purpose: DIRTY means a
// recompute is definitely due, the PENDING_* bits mean "an ancestor may have
// changed, resolve lazily on read".
// ============================================================================

// =============================================================================
// NODE KIND FLAGS
// =============================================================================

/// Node is a derived value (has a getter and a cached value).
pub const DERIVED: u32 = 1 << 0;

/// Node is an effect or effect-scope leaf.
pub const EFFECT: u32 = 1 << 1;

/// Node is specifically an effect scope (always combined with EFFECT).
pub const SCOPE: u32 = 1 << 2;

// =============================================================================
// TRAVERSAL FLAGS
// =============================================================================

/// Subscriber is currently re-executing its body; its edges are being
/// reconfirmed and must not be re-marked by propagation.
pub const TRACKING: u32 = 1 << 3;

/// Already placed on the effect queue for this drain.
pub const NOTIFIED: u32 = 1 << 4;

/// Revisited within a single propagation pass (late-added edge).
pub const RECURSED: u32 = 1 << 5;

// =============================================================================
// STALENESS FLAGS
// =============================================================================

/// Definitely needs recomputation.
pub const DIRTY: u32 = 1 << 6;

/// Possibly needs recomputation: an upstream derived may have changed.
pub const PENDING_DERIVED: u32 = 1 << 7;

/// A descendant effect may need processing.
pub const PENDING_EFFECT: u32 = 1 << 8;

/// Union of the staleness bits; "this node was reached by a propagation".
pub const PROPAGATED: u32 = DIRTY | PENDING_DERIVED | PENDING_EFFECT;

// =============================================================================
// TESTS
// =============================================================================
