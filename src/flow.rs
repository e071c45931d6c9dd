//! Storage flavors for the abstract interpreter.
//!
//! [`crate::interp::Semantics`] leaves open where values live; these modules
//! supply the two standard answers. [`entity`] keys state by analysis entity
//! and implements value-copy (struct) assignment semantics; [`location`]
//! keys state by abstract location and implements reference (points-to)
//! propagation.

pub mod entity;
pub mod location;
