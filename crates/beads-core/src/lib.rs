//! Core domain types for the beads issue-tracking storage core.
//!
//! This crate is backend-independent: it defines the entity model, the
//! content-addressing scheme, ID generation, validation, and the JSONL
//! interchange format that every backend in `beads-storage` builds on.

pub mod comment;
pub mod content_hash;
pub mod dependency;
pub mod enums;
pub mod external_ref;
pub mod filter;
pub mod idgen;
pub mod issue;
pub mod jsonl;
pub mod validation;
