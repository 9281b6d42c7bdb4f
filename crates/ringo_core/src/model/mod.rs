//! Entity model: the base contract, factories and concrete entities.
//!
//! # Invariants
//! - Every entity declares its schema once as a static descriptor list.
//! - Entity-specific fields change only through `Entity::set_values`.

pub mod entity;
pub mod factory;
pub mod user;
