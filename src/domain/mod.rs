//! Domain layer types and invariants.

pub mod curated;
pub mod error;
pub mod movies;
pub mod slug;
