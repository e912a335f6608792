use super::{
    account_with_acl, ensure, Account, AccountError, AccountHistory, AccountPassword,
    AccountRequest, AccountView, HistoryReason,
};
use crate::acl::{AccountAcl, AclError, Permission, Principal};
use crate::config::AccountsConfig;
use crate::events::{Event, EventDispatcher, EventMessage};
use crate::storage::{Store, VaultData};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;

/// One archived state, as listed to the user
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub id: u64,
    pub account_id: u64,
    pub name: String,
    pub reason: HistoryReason,
    pub archived_at: DateTime<Utc>,
    pub archived_by: String,
}

/// Account CRUD behind the per-account ACL
pub struct AccountService {
    store: Arc<Store>,
    events: Arc<EventDispatcher>,
    config: AccountsConfig,
}

impl AccountService {
    pub fn new(store: Arc<Store>, events: Arc<EventDispatcher>, config: AccountsConfig) -> Self {
        Self {
            store,
            events,
            config,
        }
    }

    async fn emit(&self, name: &str, principal: &Principal, description: &str, account: &Account) {
        let event = Event::new(name, "accounts").by(principal).with_message(
            EventMessage::new(description)
                .add_detail("Account", &account.name)
                .add_detail("Id", account.id),
        );
        self.events.dispatch(event).await;
    }

    fn default_expiry(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.config
            .expire_enabled
            .then(|| now + Duration::days(self.config.expire_days))
    }

    pub fn acl(&self, principal: &Principal, id: u64) -> Result<AccountAcl, AccountError> {
        let data = self.store.read();
        let (_, acl) = account_with_acl(&data, principal, id, self.config.full_group_access)?;
        Ok(acl)
    }

    pub async fn create(&self, principal: &Principal, req: AccountRequest) -> Result<u64, AccountError> {
        principal.require(Permission::AccountCreate)?;
        if req.is_private {
            principal.require(Permission::AccountPrivate)?;
        }
        if req.is_private_group {
            principal.require(Permission::AccountPrivateGroup)?;
        }

        let password = req
            .password
            .as_deref()
            .ok_or_else(|| AccountError::Invalid("password is required".to_string()))?;
        let sealed = self.store.seal(password)?;
        let full = self.config.full_group_access;

        let now = Utc::now();
        let mut account = Account::blank(req.name.trim());
        account.owner_id = req.owner_id.unwrap_or(principal.id);
        account.main_group_id = req.main_group_id.unwrap_or(principal.group_id);
        if (account.owner_id != principal.id || account.main_group_id != principal.group_id)
            && !principal.has(Permission::AccountPermission)
        {
            return Err(AclError::PermissionDenied(Permission::AccountPermission).into());
        }
        apply_request(&mut account, &req);
        account.edited_by = principal.id;
        account.password = sealed;
        account.password_expires_at = req.password_expires_at.or_else(|| self.default_expiry(now));

        let id = self
            .store
            .write(|data| {
                validate(data, &account)?;
                if let Some(parent) = account.parent_id {
                    check_parent(data, principal, parent, full)?;
                }
                Ok::<_, AccountError>(data.accounts.insert(account.clone()))
            })
            .await?;
        account.id = id;

        tracing::info!(account_id = id, user = %principal.login, "Account created");
        self.emit("create.account", principal, "Account created", &account).await;
        Ok(id)
    }

    /// Edit everything but the password. Ownership and shares need
    /// `show_permission`; otherwise they are kept as they were.
    pub async fn update(&self, principal: &Principal, id: u64, req: AccountRequest) -> Result<(), AccountError> {
        let full = self.config.full_group_access;
        let history_enabled = self.config.history_enabled;

        let updated = self
            .store
            .write(|data| {
                let (current, acl) = account_with_acl(data, principal, id, full)?;
                ensure(acl.show_edit, id)?;

                let mut account = current.clone();
                apply_request(&mut account, &req);

                let changes_permissions = account.users != current.users
                    || account.groups != current.groups
                    || req.owner_id.is_some_and(|o| o != current.owner_id)
                    || req.main_group_id.is_some_and(|g| g != current.main_group_id);
                if changes_permissions {
                    ensure(acl.show_permission, id)?;
                    account.owner_id = req.owner_id.unwrap_or(current.owner_id);
                    account.main_group_id = req.main_group_id.unwrap_or(current.main_group_id);
                }
                if account.is_private && !current.is_private {
                    principal.require(Permission::AccountPrivate)?;
                }
                if account.is_private_group && !current.is_private_group {
                    principal.require(Permission::AccountPrivateGroup)?;
                }
                if req.password_expires_at.is_some() {
                    account.password_expires_at = req.password_expires_at;
                }
                account.edited_by = principal.id;
                account.updated_at = Utc::now();

                validate(data, &account)?;
                if let Some(parent) = account.parent_id.filter(|p| current.parent_id != Some(*p)) {
                    check_parent(data, principal, parent, full)?;
                }
                if history_enabled {
                    data.history
                        .insert(AccountHistory::archive(&current, HistoryReason::Modified, principal.id));
                }
                data.accounts.update(account.clone());
                Ok::<_, AccountError>(account)
            })
            .await?;

        self.emit("edit.account", principal, "Account updated", &updated).await;
        Ok(())
    }

    pub async fn update_password(
        &self,
        principal: &Principal,
        id: u64,
        password: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), AccountError> {
        let full = self.config.full_group_access;
        let history_enabled = self.config.history_enabled;
        let sealed = self.store.seal(password)?;
        let now = Utc::now();
        let expiry = expires_at.or_else(|| self.default_expiry(now));

        let updated = self
            .store
            .write(|data| {
                let (current, acl) = account_with_acl(data, principal, id, full)?;
                ensure(acl.show_edit_pass, id)?;

                if history_enabled {
                    data.history
                        .insert(AccountHistory::archive(&current, HistoryReason::Modified, principal.id));
                }
                let mut account = current;
                account.password = sealed;
                account.password_changed_at = now;
                account.password_expires_at = expiry;
                account.edited_by = principal.id;
                account.updated_at = now;
                data.accounts.update(account.clone());
                Ok::<_, AccountError>(account)
            })
            .await?;

        self.emit("edit.account.pass", principal, "Password changed", &updated).await;
        Ok(())
    }

    /// Removes the account together with its links, files and favourites
    pub async fn delete(&self, principal: &Principal, id: u64) -> Result<(), AccountError> {
        let full = self.config.full_group_access;
        let history_enabled = self.config.history_enabled;

        let deleted = self
            .store
            .write(|data| {
                let (account, acl) = account_with_acl(data, principal, id, full)?;
                ensure(acl.show_delete, id)?;

                if history_enabled {
                    data.history
                        .insert(AccountHistory::archive(&account, HistoryReason::Deleted, principal.id));
                }
                data.accounts.remove(id);
                data.links.retain(|l| l.account_id != id);
                data.files.retain(|f| f.account_id != id);
                for favorites in data.favorites.values_mut() {
                    favorites.remove(&id);
                }
                for child in data.accounts.values_mut() {
                    if child.parent_id == Some(id) {
                        child.parent_id = None;
                    }
                }
                Ok::<_, AccountError>(account)
            })
            .await?;

        tracing::info!(account_id = id, user = %principal.login, "Account deleted");
        self.emit("delete.account", principal, "Account deleted", &deleted).await;
        Ok(())
    }

    /// Account details without touching the view counter
    pub fn details(&self, principal: &Principal, id: u64) -> Result<AccountView, AccountError> {
        let data = self.store.read();
        let (account, acl) = account_with_acl(&data, principal, id, self.config.full_group_access)?;
        ensure(acl.view, id)?;
        Ok(build_view(&data, &account, acl, principal.id))
    }

    /// Show an account and count the view
    pub async fn view(&self, principal: &Principal, id: u64) -> Result<AccountView, AccountError> {
        let full = self.config.full_group_access;

        let view = self
            .store
            .write(|data| {
                let (_, acl) = account_with_acl(data, principal, id, full)?;
                ensure(acl.view, id)?;
                let account = data.accounts.get_mut(id).ok_or(AccountError::NotFound(id))?;
                account.view_count += 1;
                let account = account.clone();
                Ok::<_, AccountError>(build_view(data, &account, acl, principal.id))
            })
            .await?;

        let event = Event::new("show.account", "accounts").by(principal).with_message(
            EventMessage::new("Account viewed")
                .add_detail("Account", &view.name)
                .add_detail("Id", id),
        );
        self.events.dispatch(event).await;
        Ok(view)
    }

    /// Decrypt the password. Linked accounts use their parent's.
    pub async fn view_password(&self, principal: &Principal, id: u64) -> Result<AccountPassword, AccountError> {
        let full = self.config.full_group_access;

        let account = self
            .store
            .write(|data| {
                let (_, acl) = account_with_acl(data, principal, id, full)?;
                ensure(acl.show_view_pass, id)?;
                let account = data.accounts.get_mut(id).ok_or(AccountError::NotFound(id))?;
                account.decrypt_count += 1;
                Ok::<_, AccountError>(account.clone())
            })
            .await?;

        let sealed = {
            let data = self.store.read();
            account
                .parent_id
                .and_then(|pid| data.accounts.get(pid))
                .map(|parent| parent.password.clone())
                .unwrap_or_else(|| account.password.clone())
        };
        let password = self.store.unseal(&sealed)?;

        self.emit("show.account.pass", principal, "Password viewed", &account).await;
        Ok(AccountPassword {
            account_id: id,
            login: account.login,
            password,
        })
    }

    /// Copy an account (password included) as "<name> (copy)" owned by the
    /// acting user
    pub async fn duplicate(&self, principal: &Principal, id: u64) -> Result<u64, AccountError> {
        principal.require(Permission::AccountCreate)?;
        let full = self.config.full_group_access;

        let (copy_id, copy) = self
            .store
            .write(|data| {
                let (source, acl) = account_with_acl(data, principal, id, full)?;
                ensure(acl.show_view, id)?;

                let now = Utc::now();
                if let Some(parent) = source.parent_id {
                    check_parent(data, principal, parent, full)?;
                }
                let mut copy = source;
                copy.name = format!("{} (copy)", copy.name);
                copy.owner_id = principal.id;
                copy.edited_by = principal.id;
                copy.view_count = 0;
                copy.decrypt_count = 0;
                copy.created_at = now;
                copy.updated_at = now;
                let copy_id = data.accounts.insert(copy.clone());
                copy.id = copy_id;
                Ok::<_, AccountError>((copy_id, copy))
            })
            .await?;

        self.emit("copy.account", principal, "Account duplicated", &copy).await;
        Ok(copy_id)
    }

    /// Newest first
    pub fn history(&self, principal: &Principal, id: u64) -> Result<Vec<HistoryEntry>, AccountError> {
        let data = self.store.read();
        let (_, acl) = account_with_acl(&data, principal, id, self.config.full_group_access)?;
        ensure(acl.show_history, id)?;

        let mut entries: Vec<HistoryEntry> = data
            .history
            .values()
            .filter(|h| h.account_id == id)
            .map(|h| history_entry(&data, h))
            .collect();
        entries.sort_by(|a, b| b.archived_at.cmp(&a.archived_at).then(b.id.cmp(&a.id)));
        Ok(entries)
    }

    /// Archived states of accounts that no longer exist, for admins
    pub fn deleted_history(&self, principal: &Principal) -> Result<Vec<HistoryEntry>, AccountError> {
        principal.require(Permission::ManageAccounts)?;
        let data = self.store.read();
        Ok(data
            .history
            .values()
            .filter(|h| h.reason == HistoryReason::Deleted && !data.accounts.contains(h.account_id))
            .map(|h| history_entry(&data, h))
            .collect())
    }

    /// Bring an archived state back. A deleted account is recreated under
    /// its old id.
    pub async fn restore(&self, principal: &Principal, history_id: u64) -> Result<u64, AccountError> {
        let full = self.config.full_group_access;

        let restored = self
            .store
            .write(|data| {
                let entry = data
                    .history
                    .get(history_id)
                    .cloned()
                    .ok_or(AccountError::HistoryNotFound(history_id))?;
                let account_id = entry.account_id;
                let current_parent = data.accounts.get(account_id).and_then(|a| a.parent_id);

                match data.accounts.get(account_id).cloned() {
                    Some(_) => {
                        let (current, acl) = account_with_acl(data, principal, account_id, full)?;
                        ensure(acl.show_edit, account_id)?;
                        data.history
                            .insert(AccountHistory::archive(&current, HistoryReason::Restored, principal.id));
                    }
                    None => {
                        let acl = AccountAcl::compile(principal, &entry.snapshot, full);
                        ensure(acl.edit && principal.has(Permission::AccountEdit), account_id)?;
                    }
                }

                let mut account = entry.snapshot;
                account.edited_by = principal.id;
                account.updated_at = Utc::now();
                // References may have gone away since the snapshot was taken
                account.tags.retain(|t| data.tags.contains(*t));
                account.users.retain(|g| data.users.contains(g.id));
                account.groups.retain(|g| data.groups.contains(g.id));
                if account.parent_id.is_some_and(|p| !data.accounts.contains(p)) {
                    account.parent_id = None;
                }
                validate(data, &account)?;
                if let Some(parent) = account.parent_id.filter(|p| current_parent != Some(*p)) {
                    check_parent(data, principal, parent, full)?;
                }
                data.accounts.restore(account.clone());
                Ok::<_, AccountError>(account)
            })
            .await?;

        self.emit("restore.account", principal, "Account restored", &restored).await;
        Ok(restored.id)
    }

    /// Returns whether the account is now a favourite
    pub async fn toggle_favorite(&self, principal: &Principal, id: u64) -> Result<bool, AccountError> {
        let full = self.config.full_group_access;

        self.store
            .write(|data| {
                let (_, acl) = account_with_acl(data, principal, id, full)?;
                ensure(acl.view, id)?;
                let favorites = data.favorites.entry(principal.id).or_default();
                let now_favorite = if favorites.remove(&id) {
                    false
                } else {
                    favorites.insert(id);
                    true
                };
                Ok::<_, AccountError>(now_favorite)
            })
            .await
    }
}

fn apply_request(account: &mut Account, req: &AccountRequest) {
    account.name = req.name.trim().to_string();
    account.login = req.login.clone();
    account.url = req.url.clone();
    account.notes = req.notes.clone();
    account.category_id = req.category_id;
    account.client_id = req.client_id;
    account.is_private = req.is_private;
    account.is_private_group = req.is_private_group;
    account.users = req.users.clone();
    account.groups = req.groups.clone();
    account.tags = req.tags.clone();
    account.parent_id = req.parent_id;
}

/// Linking to a parent exposes its password, so the principal must be
/// able to decrypt the parent already
fn check_parent(data: &VaultData, principal: &Principal, parent: u64, full: bool) -> Result<(), AccountError> {
    let (_, acl) = account_with_acl(data, principal, parent, full)?;
    ensure(acl.show_view_pass, parent)
}

/// Every reference must exist
fn validate(data: &VaultData, account: &Account) -> Result<(), AccountError> {
    let missing = |kind, id| Err(AccountError::MissingReference { kind, id });

    if account.name.is_empty() {
        return Err(AccountError::Invalid("name is required".to_string()));
    }
    if !data.categories.contains(account.category_id) {
        return missing("category", account.category_id);
    }
    if !data.clients.contains(account.client_id) {
        return missing("client", account.client_id);
    }
    if !data.users.contains(account.owner_id) {
        return missing("user", account.owner_id);
    }
    if !data.groups.contains(account.main_group_id) {
        return missing("group", account.main_group_id);
    }
    if let Some(tag) = account.tags.iter().find(|t| !data.tags.contains(**t)) {
        return missing("tag", *tag);
    }
    if let Some(user) = account.users.iter().find(|g| !data.users.contains(g.id)) {
        return missing("user", user.id);
    }
    if let Some(group) = account.groups.iter().find(|g| !data.groups.contains(g.id)) {
        return missing("group", group.id);
    }
    if let Some(parent) = account.parent_id {
        if parent == account.id || !data.accounts.contains(parent) {
            return missing("parent account", parent);
        }
    }
    Ok(())
}

fn history_entry(data: &VaultData, h: &AccountHistory) -> HistoryEntry {
    HistoryEntry {
        id: h.id,
        account_id: h.account_id,
        name: h.snapshot.name.clone(),
        reason: h.reason,
        archived_at: h.archived_at,
        archived_by: data
            .users
            .get(h.archived_by)
            .map(|u| u.login.clone())
            .unwrap_or_else(|| "system".to_string()),
    }
}

pub(crate) fn build_view(data: &VaultData, account: &Account, acl: AccountAcl, user_id: u64) -> AccountView {
    let user_login = |id: u64| data.users.get(id).map(|u| u.login.clone()).unwrap_or_default();
    let group_name = |id: u64| data.groups.get(id).map(|g| g.name.clone()).unwrap_or_default();

    AccountView {
        id: account.id,
        name: account.name.clone(),
        login: account.login.clone(),
        url: account.url.clone(),
        notes: account.notes.clone(),
        category_id: account.category_id,
        category: data
            .categories
            .get(account.category_id)
            .map(|c| c.name.clone())
            .unwrap_or_default(),
        client_id: account.client_id,
        client: data
            .clients
            .get(account.client_id)
            .map(|c| c.name.clone())
            .unwrap_or_default(),
        owner: user_login(account.owner_id),
        main_group: group_name(account.main_group_id),
        tags: account
            .tags
            .iter()
            .filter_map(|t| data.tags.get(*t).map(|t| t.name.clone()))
            .collect(),
        users: account.users.iter().map(|g| (user_login(g.id), g.can_edit)).collect(),
        groups: account.groups.iter().map(|g| (group_name(g.id), g.can_edit)).collect(),
        is_private: account.is_private,
        is_private_group: account.is_private_group,
        password_changed_at: account.password_changed_at,
        password_expires_at: account.password_expires_at,
        password_expired: account.is_expired(Utc::now()),
        view_count: account.view_count,
        decrypt_count: account.decrypt_count,
        is_favorite: data.is_favorite(user_id, account.id),
        public_link: data
            .links
            .values()
            .find(|l| l.account_id == account.id)
            .map(|l| l.hash.clone()),
        created_at: account.created_at,
        updated_at: account.updated_at,
        acl,
    }
}
