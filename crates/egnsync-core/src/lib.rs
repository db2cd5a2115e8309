//! egnsync Core - Domain types, ports and configuration
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain types** - `SyncPair`, `FileRecord`, `ChangeClassification`, policies
//! - **Error taxonomy** - `AuthError`, `RemoteError`, `DomainError`
//! - **Port definitions** - `IRemoteStore`, `ITokenProvider`, `IStateStore`, `ILocalFileSystem`
//! - **Configuration** - YAML config with validation and a builder
//! - **Atomic writes** - temp-file-and-rename helpers shared by the file adapters
//!
//! # Architecture
//!
//! The domain module has no I/O. Ports define the trait interfaces that the
//! adapter crates (`egnsync-remote`, `egnsync-state`, `egnsync-sync`) implement.

pub mod atomic;
pub mod config;
pub mod domain;
pub mod ports;
