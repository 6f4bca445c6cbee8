//! Core types and codecs for the braid system.
//!
//! Everything that the storage, sync, and daemon layers agree on lives here:
//! the domain model, the canonical enum catalogs, validators, ID generation,
//! content hashing, and the text-mirror codecs.

pub mod comment;
pub mod content_hash;
pub mod dependency;
pub mod enums;
pub mod filter;
pub mod format;
pub mod idgen;
pub mod issue;
pub mod jsonl;
pub mod validation;
