//! Core services: row access, chunking, and request orchestration.

pub mod chunker;
pub mod object_store;
pub mod transfer_service;
