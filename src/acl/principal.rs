//! The acting user

use super::{AclError, Permission};
use crate::storage::VaultData;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Who is performing an operation, with everything needed to authorize it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub id: u64,
    pub login: String,
    pub name: String,
    /// Main group
    pub group_id: u64,
    /// Secondary group memberships
    pub groups: BTreeSet<u64>,
    pub permissions: BTreeSet<Permission>,
    pub is_admin_app: bool,
    pub is_admin_acc: bool,
}

impl Principal {
    /// Build the principal for a stored user. Disabled or unknown users
    /// have none.
    pub fn from_vault(data: &VaultData, user_id: u64) -> Option<Principal> {
        let user = data.users.get(user_id)?;
        if user.is_disabled {
            return None;
        }

        let permissions = data
            .profiles
            .get(user.profile_id)
            .map(|p| p.permissions.clone())
            .unwrap_or_default();
        let groups = data
            .groups
            .values()
            .filter(|g| g.members.contains(&user.id))
            .map(|g| g.id)
            .collect();

        Some(Principal {
            id: user.id,
            login: user.login.clone(),
            name: user.name.clone(),
            group_id: user.group_id,
            groups,
            permissions,
            is_admin_app: user.is_admin_app,
            is_admin_acc: user.is_admin_acc,
        })
    }

    /// Local operator running the CLI
    pub fn system() -> Principal {
        Principal {
            id: 0,
            login: "system".to_string(),
            name: "System".to_string(),
            group_id: 0,
            groups: BTreeSet::new(),
            permissions: Permission::all(),
            is_admin_app: true,
            is_admin_acc: true,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.is_admin_app || self.is_admin_acc
    }

    /// Application admins hold every permission
    pub fn has(&self, permission: Permission) -> bool {
        self.is_admin_app || self.permissions.contains(&permission)
    }

    pub fn require(&self, permission: Permission) -> Result<(), AclError> {
        if self.has(permission) {
            Ok(())
        } else {
            Err(AclError::PermissionDenied(permission))
        }
    }

    pub fn require_admin(&self) -> Result<(), AclError> {
        if self.is_admin_app {
            Ok(())
        } else {
            Err(AclError::AdminRequired)
        }
    }

    /// Group membership. Secondary groups only count with full group access.
    pub fn member_of(&self, group_id: u64, full_group_access: bool) -> bool {
        self.group_id == group_id || (full_group_access && self.groups.contains(&group_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(perms: &[Permission]) -> Principal {
        Principal {
            id: 7,
            login: "jdoe".to_string(),
            name: "John Doe".to_string(),
            group_id: 2,
            groups: [5].into_iter().collect(),
            permissions: perms.iter().copied().collect(),
            is_admin_app: false,
            is_admin_acc: false,
        }
    }

    #[test]
    fn test_require_permission() {
        let p = principal(&[Permission::AccountView]);
        assert!(p.require(Permission::AccountView).is_ok());
        assert_eq!(
            p.require(Permission::ManageUsers),
            Err(AclError::PermissionDenied(Permission::ManageUsers))
        );
        assert!(p.require_admin().is_err());
    }

    #[test]
    fn test_admin_has_everything() {
        let mut p = principal(&[]);
        p.is_admin_app = true;
        assert!(p.has(Permission::ConfigEncryption));
        assert!(Principal::system().has(Permission::ManagePlugins));
    }

    #[test]
    fn test_group_membership() {
        let p = principal(&[]);
        assert!(p.member_of(2, false));
        assert!(!p.member_of(5, false));
        assert!(p.member_of(5, true));
        assert!(!p.member_of(9, true));
    }
}
