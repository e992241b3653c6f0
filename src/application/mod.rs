//! Application services: catalog reads, coordinated writes, and ingestion.

pub mod catalog;
pub mod error;
pub mod inflight;
pub mod ingest;
pub mod ranking;
pub mod refresh;
pub mod repos;
pub mod scheduler;
pub mod sources;
