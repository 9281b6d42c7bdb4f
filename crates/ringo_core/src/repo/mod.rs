//! Generic CRUD dispatch and search parsing.
//!
//! # Responsibility
//! - Validate caller input and route it to entity factories.
//! - Return semantic errors (`NotFound`, `ClientError`, ...) in addition to
//!   store transport errors.
//!
//! # Invariants
//! - Validation failures are raised before any store interaction.

pub mod crud;
pub mod filter;
