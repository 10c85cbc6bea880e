//! Read-time user display joins.
//!
//! SSH key responses are enriched with the owning user's email and display
//! name. This join is cosmetic — it is not part of the subsystem's
//! correctness contract, and a missing user simply yields `None` fields.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::{error::StoreResult, types::UserId};

/// Denormalized display fields for a user account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDisplay {
    /// Account email, used as the username in API responses.
    pub email: String,
    /// Human display name, when the account has one.
    pub display_name: Option<String>,
}

/// Lookup of user display fields by id.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Returns display fields for `user_id`, or `None` if unknown.
    async fn display(&self, user_id: &UserId) -> StoreResult<Option<UserDisplay>>;
}

/// In-memory [`UserDirectory`] implementation for tests and development.
#[derive(Default)]
pub struct MemoryUserDirectory {
    users: RwLock<HashMap<UserId, UserDisplay>>,
}

impl MemoryUserDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers display fields for a user.
    pub fn put(&self, user_id: UserId, display: UserDisplay) {
        self.users.write().insert(user_id, display);
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn display(&self, user_id: &UserId) -> StoreResult<Option<UserDisplay>> {
        Ok(self.users.read().get(user_id).cloned())
    }
}
