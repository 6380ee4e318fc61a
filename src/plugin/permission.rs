//! Access permissions
//!
//! Each loaded instance owns a permission named `{plugin_type}.{name}`.
//! Permissions live outside the core; the lifecycle manager only asks the
//! provider to get or create them.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::core::sync::handle_mutex_poison;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
    pub id: i64,
    pub codename: String,
    pub display_name: String,
}

#[async_trait]
pub trait PermissionProvider: Send + Sync {
    /// Existing permission for `codename`, or a new one with `display_name`
    async fn get_or_create_permission(
        &self,
        codename: &str,
        display_name: &str,
    ) -> Result<Permission, String>;
}

/// Permission provider backed by a map
#[derive(Debug, Default)]
pub struct MemoryPermissions {
    permissions: Mutex<BTreeMap<String, Permission>>,
}

impl MemoryPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, codename: &str) -> Option<Permission> {
        crate::core::sync::recover_mutex(self.permissions.lock())
            .get(codename)
            .cloned()
    }

    pub fn len(&self) -> usize {
        crate::core::sync::recover_mutex(self.permissions.lock()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PermissionProvider for MemoryPermissions {
    async fn get_or_create_permission(
        &self,
        codename: &str,
        display_name: &str,
    ) -> Result<Permission, String> {
        let mut permissions = handle_mutex_poison(self.permissions.lock(), |m| {
            format!("permission table unavailable: {}", m)
        })?;
        let next_id = permissions.len() as i64 + 1;
        let permission = permissions
            .entry(codename.to_string())
            .or_insert_with(|| Permission {
                id: next_id,
                codename: codename.to_string(),
                display_name: display_name.to_string(),
            });
        Ok(permission.clone())
    }
}
