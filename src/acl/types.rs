//! Permissions and user profiles

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Actions a profile can grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    AccountView,
    AccountViewPass,
    AccountViewHistory,
    AccountEdit,
    AccountEditPass,
    AccountCreate,
    AccountDelete,
    AccountFiles,
    AccountPublicLinks,
    AccountPrivate,
    AccountPrivateGroup,
    AccountPermission,
    AccountGlobalSearch,
    ConfigGeneral,
    ConfigEncryption,
    ConfigBackup,
    ManageUsers,
    ManageGroups,
    ManageProfiles,
    ManageCategories,
    ManageClients,
    ManageTags,
    ManageApiTokens,
    ManagePublicLinks,
    ManageAccounts,
    ManagePlugins,
    EventLog,
}

impl Permission {
    pub const ALL: [Permission; 27] = [
        Permission::AccountView,
        Permission::AccountViewPass,
        Permission::AccountViewHistory,
        Permission::AccountEdit,
        Permission::AccountEditPass,
        Permission::AccountCreate,
        Permission::AccountDelete,
        Permission::AccountFiles,
        Permission::AccountPublicLinks,
        Permission::AccountPrivate,
        Permission::AccountPrivateGroup,
        Permission::AccountPermission,
        Permission::AccountGlobalSearch,
        Permission::ConfigGeneral,
        Permission::ConfigEncryption,
        Permission::ConfigBackup,
        Permission::ManageUsers,
        Permission::ManageGroups,
        Permission::ManageProfiles,
        Permission::ManageCategories,
        Permission::ManageClients,
        Permission::ManageTags,
        Permission::ManageApiTokens,
        Permission::ManagePublicLinks,
        Permission::ManageAccounts,
        Permission::ManagePlugins,
        Permission::EventLog,
    ];

    pub fn all() -> BTreeSet<Permission> {
        Self::ALL.into_iter().collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::AccountView => "account_view",
            Permission::AccountViewPass => "account_view_pass",
            Permission::AccountViewHistory => "account_view_history",
            Permission::AccountEdit => "account_edit",
            Permission::AccountEditPass => "account_edit_pass",
            Permission::AccountCreate => "account_create",
            Permission::AccountDelete => "account_delete",
            Permission::AccountFiles => "account_files",
            Permission::AccountPublicLinks => "account_public_links",
            Permission::AccountPrivate => "account_private",
            Permission::AccountPrivateGroup => "account_private_group",
            Permission::AccountPermission => "account_permission",
            Permission::AccountGlobalSearch => "account_global_search",
            Permission::ConfigGeneral => "config_general",
            Permission::ConfigEncryption => "config_encryption",
            Permission::ConfigBackup => "config_backup",
            Permission::ManageUsers => "manage_users",
            Permission::ManageGroups => "manage_groups",
            Permission::ManageProfiles => "manage_profiles",
            Permission::ManageCategories => "manage_categories",
            Permission::ManageClients => "manage_clients",
            Permission::ManageTags => "manage_tags",
            Permission::ManageApiTokens => "manage_api_tokens",
            Permission::ManagePublicLinks => "manage_public_links",
            Permission::ManageAccounts => "manage_accounts",
            Permission::ManagePlugins => "manage_plugins",
            Permission::EventLog => "event_log",
        }
    }

    /// Parse a permission name; dashes and case are ignored
    pub fn from_str(s: &str) -> Option<Permission> {
        let wanted = s.trim().to_lowercase().replace('-', "_");
        Self::ALL.into_iter().find(|p| p.as_str() == wanted)
    }

    /// Parse a comma-separated list
    pub fn parse_many(s: &str) -> Result<BTreeSet<Permission>, String> {
        let mut permissions = BTreeSet::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match Permission::from_str(part) {
                Some(p) => {
                    permissions.insert(p);
                }
                None => return Err(format!("Unknown permission: {}", part)),
            }
        }
        Ok(permissions)
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named set of permissions assigned to users
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: u64,
    pub name: String,
    pub permissions: BTreeSet<Permission>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(name: impl Into<String>, permissions: BTreeSet<Permission>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            name: name.into(),
            permissions,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }
}

pub const PROFILE_ADMIN: &str = "Admin";
pub const PROFILE_STANDARD: &str = "Standard";
pub const PROFILE_READ_ONLY: &str = "Read Only";

pub fn admin_profile() -> UserProfile {
    UserProfile::new(PROFILE_ADMIN, Permission::all())
}

/// Day-to-day account work, no administration
pub fn standard_profile() -> UserProfile {
    use Permission::*;
    UserProfile::new(
        PROFILE_STANDARD,
        [
            AccountView,
            AccountViewPass,
            AccountViewHistory,
            AccountEdit,
            AccountEditPass,
            AccountCreate,
            AccountDelete,
            AccountFiles,
            AccountPublicLinks,
            AccountPrivate,
            AccountPrivateGroup,
            AccountPermission,
        ]
        .into_iter()
        .collect(),
    )
}

pub fn read_only_profile() -> UserProfile {
    UserProfile::new(
        PROFILE_READ_ONLY,
        [Permission::AccountView, Permission::AccountViewPass]
            .into_iter()
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_parsing() {
        assert_eq!(Permission::from_str("account_view"), Some(Permission::AccountView));
        assert_eq!(Permission::from_str("MANAGE-USERS"), Some(Permission::ManageUsers));
        assert_eq!(Permission::from_str("launch_missiles"), None);
    }

    #[test]
    fn test_parse_many() {
        let perms = Permission::parse_many("account_view, account_edit,,event_log").unwrap();
        assert_eq!(perms.len(), 3);
        assert!(perms.contains(&Permission::EventLog));
        assert!(Permission::parse_many("account_view, nope").is_err());
    }

    #[test]
    fn test_display_roundtrips() {
        for p in Permission::ALL {
            assert_eq!(Permission::from_str(&p.to_string()), Some(p));
        }
    }

    #[test]
    fn test_predefined_profiles() {
        assert_eq!(admin_profile().permissions.len(), Permission::ALL.len());

        let standard = standard_profile();
        assert!(standard.has(Permission::AccountCreate));
        assert!(!standard.has(Permission::ManageUsers));

        let read_only = read_only_profile();
        assert!(read_only.has(Permission::AccountViewPass));
        assert!(!read_only.has(Permission::AccountEdit));
    }
}
