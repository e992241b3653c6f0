//! Movie availability catalog with a tiered read path.
//!
//! Reads resolve cache → primary store → snapshot; writes go to the store and
//! then invalidate the cache.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
