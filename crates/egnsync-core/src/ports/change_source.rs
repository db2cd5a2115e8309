//! Change-event source payload
//!
//! A hint only says "look at this path again". Classification always
//! re-reads the current local and remote state.

use crate::domain::{PairId, RelativePath};

/// A path-scoped change notification
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeHint {
    pub pair: PairId,
    pub relative_path: RelativePath,
}

impl ChangeHint {
    #[must_use]
    pub fn new(pair: PairId, relative_path: RelativePath) -> Self {
        Self {
            pair,
            relative_path,
        }
    }
}
