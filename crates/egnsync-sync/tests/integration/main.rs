//! Integration tests for egnsync-sync
//!
//! Runs the engine against an in-memory remote store, the real local
//! filesystem adapter in temporary directories and the JSON state store.

mod common;

mod test_concurrency;
mod test_deletions;
mod test_engine;
mod test_service;
