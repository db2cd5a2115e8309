//! Port definitions (hexagonal architecture interfaces)
//!
//! Ports are the interfaces the sync engine depends on; their
//! implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IRemoteStore`] - Remote file operations (list, stat, transfer, mutate)
//! - [`ITokenProvider`] - Loading, refreshing and persisting OAuth tokens
//! - [`IStateStore`] - Durable per-path sync baseline
//! - [`ILocalFileSystem`] - Local file enumeration and atomic writes
//! - [`ChangeHint`] - Payload of the change-event source

pub mod change_source;
pub mod local_filesystem;
pub mod remote_store;
pub mod state_store;
pub mod token_provider;

pub use change_source::ChangeHint;
pub use local_filesystem::{ILocalFileSystem, LocalEntry, LocalMetadata};
pub use remote_store::{Downloaded, IRemoteStore, RemoteEntry};
pub use state_store::IStateStore;
pub use token_provider::{ITokenProvider, Token};
