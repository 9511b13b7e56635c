//! Per-connection user identities.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Display colors handed out to new users.
pub const PALETTE: [&str; 7] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#96CEB4", "#FECA57", "#FF9FF3", "#54A0FF",
];

/// Opaque user identifier, unique among the users connected at the same time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A `#RRGGBB` display color.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserColor(String);

impl fmt::Display for UserColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserColor {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for UserColor {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identity bound to one connection for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: UserId,
    pub color: UserColor,
}

/// Issues identities to new connections.
///
/// Colors are assigned round-robin over [`PALETTE`], so the first
/// `PALETTE.len()` users connected at once never share a color.
#[derive(Debug, Default)]
pub struct IdentityAllocator {
    next_color: usize,
}

impl IdentityAllocator {
    /// Create an allocator starting at the first palette entry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an identity without checking against live users.
    pub fn allocate(&mut self) -> Identity {
        self.allocate_unless(|_| false)
    }

    /// Allocate an identity whose id is not reported live by `is_live`.
    pub fn allocate_unless(&mut self, mut is_live: impl FnMut(&UserId) -> bool) -> Identity {
        let id = loop {
            let candidate = UserId::generate();
            if !is_live(&candidate) {
                break candidate;
            }
            log::debug!("Regenerating colliding user id {}", candidate);
        };

        let color = UserColor::from(PALETTE[self.next_color]);
        self.next_color = (self.next_color + 1) % PALETTE.len();

        Identity { id, color }
    }
}
