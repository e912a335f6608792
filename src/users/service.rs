use super::{check_password, User, UserError, UserSummary};
use crate::acl::{Permission, Principal};
use crate::crypto::hash_password;
use crate::events::{Event, EventDispatcher, EventMessage};
use crate::storage::{Store, VaultData};
use crate::{ItemSearch, ItemSearchResult};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

/// Input for creating or editing a user
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserRequest {
    pub name: String,
    pub login: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub group_id: u64,
    pub profile_id: u64,
    /// Required on create, ignored on update
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub is_admin_app: bool,
    #[serde(default)]
    pub is_admin_acc: bool,
    #[serde(default)]
    pub is_change_pass: bool,
}

impl UserRequest {
    fn validate(&self, data: &VaultData, user_id: u64) -> Result<(), UserError> {
        if self.login.trim().is_empty() || self.name.trim().is_empty() {
            return Err(UserError::Invalid("name and login are required".to_string()));
        }
        if let Some(other) = data.user_by_login(self.login.trim()) {
            if other.id != user_id {
                return Err(UserError::LoginTaken(self.login.clone()));
            }
        }
        if !data.groups.contains(self.group_id) {
            return Err(UserError::GroupNotFound(self.group_id));
        }
        if !data.profiles.contains(self.profile_id) {
            return Err(UserError::ProfileNotFound(self.profile_id));
        }
        Ok(())
    }
}

pub struct UserService {
    store: Arc<Store>,
    events: Arc<EventDispatcher>,
    page_size: usize,
    min_password_length: usize,
}

impl UserService {
    pub fn new(
        store: Arc<Store>,
        events: Arc<EventDispatcher>,
        page_size: usize,
        min_password_length: usize,
    ) -> Self {
        Self {
            store,
            events,
            page_size,
            min_password_length,
        }
    }

    async fn emit(&self, name: &str, principal: &Principal, description: &str, login: &str) {
        let event = Event::new(name, "users").by(principal).with_message(
            EventMessage::new(description).add_detail("Login", login),
        );
        self.events.dispatch(event).await;
    }

    /// Only application admins can hand out admin flags
    fn check_admin_flags(principal: &Principal, req: &UserRequest) -> Result<(), UserError> {
        if (req.is_admin_app || req.is_admin_acc) && !principal.is_admin_app {
            principal.require_admin()?;
        }
        Ok(())
    }

    pub async fn create(&self, principal: &Principal, req: UserRequest) -> Result<u64, UserError> {
        principal.require(Permission::ManageUsers)?;
        Self::check_admin_flags(principal, &req)?;

        let password = req
            .password
            .as_deref()
            .ok_or_else(|| UserError::Invalid("password is required".to_string()))?;
        check_password(password, self.min_password_length)?;
        let password_hash = hash_password(password)?;

        let login = req.login.trim().to_string();
        let id = self
            .store
            .write(|data| {
                req.validate(data, 0)?;
                let now = Utc::now();
                Ok::<_, UserError>(data.users.insert(User {
                    id: 0,
                    name: req.name.trim().to_string(),
                    login: login.clone(),
                    email: req.email.clone(),
                    notes: req.notes.clone(),
                    group_id: req.group_id,
                    profile_id: req.profile_id,
                    password_hash,
                    is_admin_app: req.is_admin_app,
                    is_admin_acc: req.is_admin_acc,
                    is_disabled: false,
                    is_change_pass: req.is_change_pass,
                    login_count: 0,
                    last_login: None,
                    created_at: now,
                    updated_at: now,
                }))
            })
            .await?;

        tracing::info!(user_id = id, login = %login, "User created");
        self.emit("create.user", principal, "User created", &login).await;
        Ok(id)
    }

    pub async fn update(&self, principal: &Principal, id: u64, req: UserRequest) -> Result<(), UserError> {
        principal.require(Permission::ManageUsers)?;
        Self::check_admin_flags(principal, &req)?;

        let login = req.login.trim().to_string();
        self.store
            .write(|data| {
                req.validate(data, id)?;
                let user = data.users.get_mut(id).ok_or(UserError::NotFound(id))?;
                user.name = req.name.trim().to_string();
                user.login = login.clone();
                user.email = req.email.clone();
                user.notes = req.notes.clone();
                user.group_id = req.group_id;
                user.profile_id = req.profile_id;
                user.is_admin_app = req.is_admin_app;
                user.is_admin_acc = req.is_admin_acc;
                user.is_change_pass = req.is_change_pass;
                user.updated_at = Utc::now();
                Ok::<_, UserError>(())
            })
            .await?;

        self.emit("edit.user", principal, "User updated", &login).await;
        Ok(())
    }

    /// Users may always change their own password
    pub async fn update_password(
        &self,
        principal: &Principal,
        id: u64,
        password: &str,
    ) -> Result<(), UserError> {
        if principal.id != id {
            principal.require(Permission::ManageUsers)?;
        }
        check_password(password, self.min_password_length)?;
        let password_hash = hash_password(password)?;

        let login = self
            .store
            .write(|data| {
                let user = data.users.get_mut(id).ok_or(UserError::NotFound(id))?;
                user.password_hash = password_hash;
                user.is_change_pass = false;
                user.updated_at = Utc::now();
                Ok::<_, UserError>(user.login.clone())
            })
            .await?;

        self.emit("edit.user.pass", principal, "Password changed", &login).await;
        Ok(())
    }

    pub async fn set_disabled(&self, principal: &Principal, id: u64, disabled: bool) -> Result<(), UserError> {
        principal.require(Permission::ManageUsers)?;
        if principal.id == id && disabled {
            return Err(UserError::Invalid("users cannot disable themselves".to_string()));
        }

        let login = self
            .store
            .write(|data| {
                let user = data.users.get_mut(id).ok_or(UserError::NotFound(id))?;
                user.is_disabled = disabled;
                user.updated_at = Utc::now();
                Ok::<_, UserError>(user.login.clone())
            })
            .await?;

        let description = if disabled { "User disabled" } else { "User enabled" };
        self.emit("edit.user", principal, description, &login).await;
        Ok(())
    }

    pub async fn delete(&self, principal: &Principal, id: u64) -> Result<(), UserError> {
        principal.require(Permission::ManageUsers)?;
        if principal.id == id {
            return Err(UserError::SelfDelete);
        }

        let login = self
            .store
            .write(|data| {
                let user = data.users.get(id).ok_or(UserError::NotFound(id))?;
                let accounts = data.accounts.values().filter(|a| a.owner_id == id).count();
                if accounts > 0 {
                    return Err(UserError::OwnsAccounts {
                        login: user.login.clone(),
                        accounts,
                    });
                }
                let login = user.login.clone();

                data.users.remove(id);
                data.favorites.remove(&id);
                data.tokens.retain(|t| t.user_id != id);
                for group in data.groups.values_mut() {
                    group.members.remove(&id);
                }
                for account in data.accounts.values_mut() {
                    account.users.retain(|g| g.id != id);
                }
                Ok(login)
            })
            .await?;

        tracing::info!(user_id = id, login = %login, "User deleted");
        self.emit("delete.user", principal, "User deleted", &login).await;
        Ok(())
    }

    pub fn get(&self, id: u64) -> Option<User> {
        self.store.read().users.get(id).cloned()
    }

    pub fn get_by_login(&self, login: &str) -> Option<User> {
        self.store.read().user_by_login(login).cloned()
    }

    pub fn search(
        &self,
        principal: &Principal,
        search: &ItemSearch,
    ) -> Result<ItemSearchResult<UserSummary>, UserError> {
        principal.require(Permission::ManageUsers)?;

        let data = self.store.read();
        let mut matches: Vec<UserSummary> = data
            .users
            .values()
            .filter(|u| {
                search.matches([
                    u.login.as_str(),
                    u.name.as_str(),
                    u.email.as_deref().unwrap_or(""),
                ])
            })
            .map(UserSummary::from)
            .collect();
        matches.sort_by_key(|u| u.login.to_lowercase());

        Ok(search.paginate(matches, self.page_size))
    }
}
