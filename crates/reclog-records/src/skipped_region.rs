//! Skipped Region - What Recovery Jumped Over
//!
//! When the chunk or record layer recovers from corruption, the caller
//! learns which byte range was given up and why. Positions are file
//! offsets; `message` is the failure that triggered the skip.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRegion {
    /// First skipped byte.
    pub begin: u64,
    /// First byte after the region.
    pub end: u64,
    /// The failure that made the region unreadable.
    pub message: String,
}

impl SkippedRegion {
    pub fn new(begin: u64, end: u64, message: impl Into<String>) -> Self {
        Self {
            begin,
            end,
            message: message.into(),
        }
    }

    pub fn len(&self) -> u64 {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }
}

impl std::fmt::Display for SkippedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "skipped bytes [{}, {}): {}",
            self.begin, self.end, self.message
        )
    }
}
