//! Public entity APIs.
//!
//! # Responsibility
//! - Wrap the generic CRUD dispatcher into per-entity use-case calls.
//! - Keep transport layers decoupled from sessions and entity instances.

pub mod user_service;
