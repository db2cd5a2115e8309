//! egnsync Conflict - Change detection and conflict resolution
//!
//! Provides:
//! - Three-way classification of a path against its last synced baseline
//! - SHA-512 content fingerprints with a size/mtime pre-filter cache
//! - Glob-driven conflict policies with per-pair overrides

pub mod detector;
pub mod error;
pub mod fingerprint;
pub mod policy;

pub use detector::ChangeDetector;
pub use error::ConflictError;
pub use fingerprint::{fingerprint_bytes, fingerprint_file, FingerprintCache};
pub use policy::{ConflictRule, PolicyEngine};
