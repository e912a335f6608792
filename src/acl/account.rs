//! Per-account access control

use super::{Permission, Principal};
use crate::accounts::Account;
use serde::Serialize;

/// What a principal may do with one account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AccountAcl {
    pub account_id: u64,
    pub view: bool,
    pub edit: bool,
    pub show_view: bool,
    pub show_view_pass: bool,
    pub show_edit: bool,
    pub show_edit_pass: bool,
    pub show_delete: bool,
    pub show_history: bool,
    pub show_link: bool,
    pub show_copy: bool,
    pub show_permission: bool,
    pub show_files: bool,
}

impl AccountAcl {
    /// Nothing allowed
    pub fn denied(account_id: u64) -> Self {
        Self {
            account_id,
            ..Default::default()
        }
    }

    pub fn compile(principal: &Principal, account: &Account, full_group_access: bool) -> Self {
        if principal.is_admin() {
            return Self {
                account_id: account.id,
                view: true,
                edit: true,
                show_view: true,
                show_view_pass: true,
                show_edit: true,
                show_edit_pass: true,
                show_delete: true,
                show_history: true,
                show_link: true,
                show_copy: true,
                show_permission: true,
                show_files: true,
            };
        }

        let owner = account.owner_id == principal.id;
        let main_group = principal.member_of(account.main_group_id, full_group_access);
        let user_grant = account.users.iter().find(|g| g.id == principal.id);
        let (group_view, group_edit) = account
            .groups
            .iter()
            .filter(|g| principal.member_of(g.id, full_group_access))
            .fold((false, false), |(_, edit), g| (true, edit || g.can_edit));

        let view = owner || main_group || user_grant.is_some() || group_view;
        let edit = owner || main_group || user_grant.is_some_and(|g| g.can_edit) || group_edit;
        let has = |p: Permission| principal.has(p);

        Self {
            account_id: account.id,
            view,
            edit,
            show_view: view && has(Permission::AccountView),
            show_view_pass: view && has(Permission::AccountViewPass),
            show_edit: edit && has(Permission::AccountEdit),
            show_edit_pass: edit && has(Permission::AccountEditPass),
            show_delete: edit && has(Permission::AccountDelete),
            show_history: view && has(Permission::AccountViewHistory),
            show_link: view && has(Permission::AccountPublicLinks),
            show_copy: view && has(Permission::AccountViewPass),
            show_permission: (owner || main_group) && has(Permission::AccountPermission),
            show_files: view && has(Permission::AccountFiles),
        }
    }
}

/// Private flags hide an account from everyone outside its owner (or main
/// group), admins included.
pub fn can_list(principal: &Principal, account: &Account) -> bool {
    let owner = account.owner_id == principal.id;
    if account.is_private {
        return owner;
    }
    if account.is_private_group {
        return owner || principal.member_of(account.main_group_id, true);
    }
    true
}

/// Whether an account belongs in the principal's normal (non-global) listing
pub fn is_visible(principal: &Principal, account: &Account, full_group_access: bool) -> bool {
    if !can_list(principal, account) {
        return false;
    }
    principal.is_admin() || AccountAcl::compile(principal, account, full_group_access).view
}
