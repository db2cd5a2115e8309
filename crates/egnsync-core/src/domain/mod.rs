//! Domain entities and business logic
//!
//! This module contains the core domain types for egnsync:
//! - Newtypes for validated identifiers, paths and content tokens
//! - Sync pairs and the per-file sync baseline
//! - Change classification and conflict/deletion policies
//! - The shared error taxonomy

pub mod classification;
pub mod errors;
pub mod newtypes;
pub mod policy;
pub mod record;
pub mod sync_pair;

// Re-export commonly used types
pub use classification::{ChangeClassification, LocalState, RemoteState};
pub use errors::{AuthError, DomainError, RejectReason, RemoteError};
pub use newtypes::*;
pub use policy::{ConflictPolicy, LocalDeletedPolicy, RemoteDeletedPolicy, Resolution};
pub use record::FileRecord;
pub use sync_pair::SyncPair;
