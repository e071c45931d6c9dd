//! Concrete analyses built on the engine.
//!
//! These are small clients exercising the framework end to end: a forward,
//! entity-keyed nullability analysis with predicate classification, and a
//! backward liveness analysis over plain symbol sets.

pub mod liveness;
pub mod nullness;
