use super::{UserError, UserGroup};
use crate::acl::{Permission, Principal, UserProfile};
use crate::events::{Event, EventDispatcher, EventMessage};
use crate::storage::Store;
use crate::{ItemSearch, ItemSearchResult};
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;

pub struct GroupService {
    store: Arc<Store>,
    events: Arc<EventDispatcher>,
    page_size: usize,
}

impl GroupService {
    pub fn new(store: Arc<Store>, events: Arc<EventDispatcher>, page_size: usize) -> Self {
        Self {
            store,
            events,
            page_size,
        }
    }

    async fn emit(&self, name: &str, principal: &Principal, group: &str) {
        let event = Event::new(name, "groups")
            .by(principal)
            .with_message(EventMessage::new("Group").add_detail("Name", group));
        self.events.dispatch(event).await;
    }

    pub async fn create(
        &self,
        principal: &Principal,
        name: &str,
        description: Option<String>,
    ) -> Result<u64, UserError> {
        principal.require(Permission::ManageGroups)?;
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(UserError::Invalid("group name is required".to_string()));
        }

        let id = self
            .store
            .write(|data| {
                if data.group_by_name(&name).is_some() {
                    return Err(UserError::GroupExists(name.clone()));
                }
                Ok(data.groups.insert(UserGroup::new(name.clone(), description)))
            })
            .await?;

        self.emit("create.group", principal, &name).await;
        Ok(id)
    }

    pub async fn update(
        &self,
        principal: &Principal,
        id: u64,
        name: &str,
        description: Option<String>,
    ) -> Result<(), UserError> {
        principal.require(Permission::ManageGroups)?;
        let name = name.trim().to_string();

        self.store
            .write(|data| {
                if data.group_by_name(&name).is_some_and(|g| g.id != id) {
                    return Err(UserError::GroupExists(name.clone()));
                }
                let group = data.groups.get_mut(id).ok_or(UserError::GroupNotFound(id))?;
                group.name = name.clone();
                group.description = description;
                Ok(())
            })
            .await?;

        self.emit("edit.group", principal, &name).await;
        Ok(())
    }

    /// Groups that are someone's main group, or an account's, stay
    pub async fn delete(&self, principal: &Principal, id: u64) -> Result<(), UserError> {
        principal.require(Permission::ManageGroups)?;

        let name = self
            .store
            .write(|data| {
                let group = data.groups.get(id).ok_or(UserError::GroupNotFound(id))?;
                let users = data.users.values().filter(|u| u.group_id == id).count();
                if users > 0 {
                    return Err(UserError::GroupInUse {
                        name: group.name.clone(),
                        reason: format!("main group of {} user(s)", users),
                    });
                }
                let accounts = data
                    .accounts
                    .values()
                    .filter(|a| a.main_group_id == id)
                    .count();
                if accounts > 0 {
                    return Err(UserError::GroupInUse {
                        name: group.name.clone(),
                        reason: format!("main group of {} account(s)", accounts),
                    });
                }
                let name = group.name.clone();

                data.groups.remove(id);
                for account in data.accounts.values_mut() {
                    account.groups.retain(|g| g.id != id);
                }
                Ok(name)
            })
            .await?;

        self.emit("delete.group", principal, &name).await;
        Ok(())
    }

    pub async fn add_member(&self, principal: &Principal, group_id: u64, user_id: u64) -> Result<(), UserError> {
        self.set_member(principal, group_id, user_id, true).await
    }

    pub async fn remove_member(&self, principal: &Principal, group_id: u64, user_id: u64) -> Result<(), UserError> {
        self.set_member(principal, group_id, user_id, false).await
    }

    async fn set_member(
        &self,
        principal: &Principal,
        group_id: u64,
        user_id: u64,
        member: bool,
    ) -> Result<(), UserError> {
        principal.require(Permission::ManageGroups)?;

        let name = self
            .store
            .write(|data| {
                if !data.users.contains(user_id) {
                    return Err(UserError::NotFound(user_id));
                }
                let group = data
                    .groups
                    .get_mut(group_id)
                    .ok_or(UserError::GroupNotFound(group_id))?;
                if member {
                    group.members.insert(user_id);
                } else {
                    group.members.remove(&user_id);
                }
                Ok(group.name.clone())
            })
            .await?;

        self.emit("edit.group", principal, &name).await;
        Ok(())
    }

    pub fn get(&self, id: u64) -> Option<UserGroup> {
        self.store.read().groups.get(id).cloned()
    }

    pub fn all(&self) -> Vec<UserGroup> {
        let mut groups: Vec<UserGroup> = self.store.read().groups.values().cloned().collect();
        groups.sort_by_key(|g| g.name.to_lowercase());
        groups
    }

    pub fn search(
        &self,
        principal: &Principal,
        search: &ItemSearch,
    ) -> Result<ItemSearchResult<UserGroup>, UserError> {
        principal.require(Permission::ManageGroups)?;
        let matches = self
            .all()
            .into_iter()
            .filter(|g| search.matches([g.name.as_str(), g.description.as_deref().unwrap_or("")]))
            .collect();
        Ok(search.paginate(matches, self.page_size))
    }
}

pub struct ProfileService {
    store: Arc<Store>,
    events: Arc<EventDispatcher>,
    page_size: usize,
}

impl ProfileService {
    pub fn new(store: Arc<Store>, events: Arc<EventDispatcher>, page_size: usize) -> Self {
        Self {
            store,
            events,
            page_size,
        }
    }

    async fn emit(&self, name: &str, principal: &Principal, profile: &str) {
        let event = Event::new(name, "profiles")
            .by(principal)
            .with_message(EventMessage::new("Profile").add_detail("Name", profile));
        self.events.dispatch(event).await;
    }

    pub async fn create(&self, principal: &Principal, mut profile: UserProfile) -> Result<u64, UserError> {
        principal.require(Permission::ManageProfiles)?;
        profile.name = profile.name.trim().to_string();
        if profile.name.is_empty() {
            return Err(UserError::Invalid("profile name is required".to_string()));
        }
        let name = profile.name.clone();

        let id = self
            .store
            .write(|data| {
                if data.profiles.values().any(|p| p.name.eq_ignore_ascii_case(&name)) {
                    return Err(UserError::ProfileExists(name.clone()));
                }
                Ok(data.profiles.insert(profile))
            })
            .await?;

        self.emit("create.profile", principal, &name).await;
        Ok(id)
    }

    pub async fn update(
        &self,
        principal: &Principal,
        id: u64,
        name: &str,
        permissions: BTreeSet<Permission>,
    ) -> Result<(), UserError> {
        principal.require(Permission::ManageProfiles)?;
        let name = name.trim().to_string();

        self.store
            .write(|data| {
                if data
                    .profiles
                    .values()
                    .any(|p| p.id != id && p.name.eq_ignore_ascii_case(&name))
                {
                    return Err(UserError::ProfileExists(name.clone()));
                }
                let profile = data.profiles.get_mut(id).ok_or(UserError::ProfileNotFound(id))?;
                profile.name = name.clone();
                profile.permissions = permissions;
                profile.updated_at = Utc::now();
                Ok(())
            })
            .await?;

        self.emit("edit.profile", principal, &name).await;
        Ok(())
    }

    pub async fn delete(&self, principal: &Principal, id: u64) -> Result<(), UserError> {
        principal.require(Permission::ManageProfiles)?;

        let name = self
            .store
            .write(|data| {
                let profile = data.profiles.get(id).ok_or(UserError::ProfileNotFound(id))?;
                if data.users.values().any(|u| u.profile_id == id) {
                    return Err(UserError::ProfileInUse(profile.name.clone()));
                }
                let name = profile.name.clone();
                data.profiles.remove(id);
                Ok(name)
            })
            .await?;

        self.emit("delete.profile", principal, &name).await;
        Ok(())
    }

    pub fn get(&self, id: u64) -> Option<UserProfile> {
        self.store.read().profiles.get(id).cloned()
    }

    pub fn get_by_name(&self, name: &str) -> Option<UserProfile> {
        self.store
            .read()
            .profiles
            .values()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn all(&self) -> Vec<UserProfile> {
        let mut profiles: Vec<UserProfile> = self.store.read().profiles.values().cloned().collect();
        profiles.sort_by_key(|p| p.name.to_lowercase());
        profiles
    }

    pub fn search(
        &self,
        principal: &Principal,
        search: &ItemSearch,
    ) -> Result<ItemSearchResult<UserProfile>, UserError> {
        principal.require(Permission::ManageProfiles)?;
        let matches = self
            .all()
            .into_iter()
            .filter(|p| search.matches([p.name.as_str()]))
            .collect();
        Ok(search.paginate(matches, self.page_size))
    }
}
