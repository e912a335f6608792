//! Access control
//!
//! Profiles grant [`Permission`]s to users. Per-account access is computed
//! by [`AccountAcl`] from ownership, group membership and explicit shares,
//! then narrowed by the acting user's profile.

mod account;
mod principal;
mod types;

pub use account::{can_list, is_visible, AccountAcl};
pub use principal::Principal;
pub use types::{
    admin_profile, read_only_profile, standard_profile, Permission, UserProfile, PROFILE_ADMIN,
    PROFILE_READ_ONLY, PROFILE_STANDARD,
};

use thiserror::Error;

/// Access control errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AclError {
    #[error("Permission denied: requires '{0}'")]
    PermissionDenied(Permission),

    #[error("Access denied to account {0}")]
    AccountDenied(u64),

    #[error("Administrator privileges required")]
    AdminRequired,
}
