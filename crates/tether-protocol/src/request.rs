//! Request identifier type

use serde::{Deserialize, Serialize};
use std::fmt;

/// Correlates the frames that belong to one request (an exec and its output)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u32);

impl RequestId {
    /// Create a new request ID
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// The ID following this one, skipping `CONTROL` on wrap-around
    pub fn next(&self) -> Self {
        match self.0.wrapping_add(1) {
            0 => Self(1),
            n => Self(n),
        }
    }

    /// Frames not bound to a request (hello, heartbeats, goodbye)
    pub const CONTROL: RequestId = RequestId(0);
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request-{}", self.0)
    }
}

impl From<u32> for RequestId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}
