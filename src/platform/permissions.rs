//! Optional host-permission broker.
//!
//! The privileged context queries and requests optional permission grants on
//! behalf of the page side. The real implementation talks to the browser's
//! permission prompt; [`StaticPermissions`] models the grant state for tests.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::protocol::PermissionSet;

#[async_trait]
pub trait PermissionBroker: Send + Sync {
    /// Whether every listed origin is currently granted.
    async fn contains(&self, origins: &[String]) -> bool;

    /// Prompt the user; returns whether the grant was given.
    async fn request(&self, set: &PermissionSet) -> bool;

    /// Drop a previous grant; returns whether anything was removed.
    async fn remove(&self, set: &PermissionSet) -> bool;
}

/// Deterministic broker: grants are a plain set, and a request either always
/// succeeds or always fails depending on `auto_grant`.
pub struct StaticPermissions {
    granted: Mutex<HashSet<String>>,
    auto_grant: bool,
}

impl StaticPermissions {
    /// Broker that accepts every permission request.
    pub fn granting() -> Self {
        StaticPermissions {
            granted: Mutex::new(HashSet::new()),
            auto_grant: true,
        }
    }

    /// Broker that refuses every permission request.
    pub fn denying() -> Self {
        StaticPermissions {
            granted: Mutex::new(HashSet::new()),
            auto_grant: false,
        }
    }

    /// Broker with a pre-existing grant for the given origins.
    pub fn with_origins(origins: &[&str]) -> Self {
        StaticPermissions {
            granted: Mutex::new(origins.iter().map(|s| s.to_string()).collect()),
            auto_grant: true,
        }
    }
}

#[async_trait]
impl PermissionBroker for StaticPermissions {
    async fn contains(&self, origins: &[String]) -> bool {
        let granted = self.granted.lock().unwrap();
        !origins.is_empty() && origins.iter().all(|o| granted.contains(o))
    }

    async fn request(&self, set: &PermissionSet) -> bool {
        if !self.auto_grant {
            return false;
        }
        let mut granted = self.granted.lock().unwrap();
        for origin in &set.origins {
            granted.insert(origin.clone());
        }
        true
    }

    async fn remove(&self, set: &PermissionSet) -> bool {
        let mut granted = self.granted.lock().unwrap();
        let mut removed = false;
        for origin in &set.origins {
            removed |= granted.remove(origin);
        }
        removed
    }
}
