use super::{Category, Client, ItemError, NamedItem, Tag};
use crate::acl::{is_visible, Principal};
use crate::events::{Event, EventDispatcher, EventMessage};
use crate::storage::{Store, VaultData};
use crate::{ItemSearch, ItemSearchResult};
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;

pub type CategoryService = ItemService<Category>;
pub type ClientService = ItemService<Client>;
pub type TagService = ItemService<Tag>;

/// CRUD for a [`NamedItem`] table
pub struct ItemService<T> {
    store: Arc<Store>,
    events: Arc<EventDispatcher>,
    page_size: usize,
    _item: PhantomData<fn() -> T>,
}

impl<T: NamedItem> ItemService<T> {
    pub fn new(store: Arc<Store>, events: Arc<EventDispatcher>, page_size: usize) -> Self {
        Self {
            store,
            events,
            page_size,
            _item: PhantomData,
        }
    }

    fn check_unique(data: &VaultData, item: &T) -> Result<(), ItemError> {
        if item.name().is_empty() {
            return Err(ItemError::EmptyName);
        }
        let clash = T::table(data)
            .values()
            .any(|other| other.id() != item.id() && other.hash() == item.hash());
        if clash {
            return Err(ItemError::AlreadyExists {
                kind: T::KIND,
                name: item.name().to_string(),
            });
        }
        Ok(())
    }

    async fn emit(&self, action: &str, principal: &Principal, item: &T) {
        let event = Event::new(format!("{}.{}", action, T::KIND), T::KIND)
            .by(principal)
            .with_message(
                EventMessage::new(format!("{} {}", T::KIND, action))
                    .add_detail("Name", item.name())
                    .add_detail("Id", item.id()),
            );
        self.events.dispatch(event).await;
    }

    pub async fn create(&self, principal: &Principal, mut item: T) -> Result<u64, ItemError> {
        principal.require(T::PERMISSION)?;
        item.set_id(0);

        let id = self
            .store
            .write(|data| {
                Self::check_unique(data, &item)?;
                Ok::<_, ItemError>(T::table_mut(data).insert(item.clone()))
            })
            .await?;
        item.set_id(id);

        tracing::info!(kind = T::KIND, id, name = item.name(), "Item created");
        self.emit("create", principal, &item).await;
        Ok(id)
    }

    pub async fn update(&self, principal: &Principal, item: T) -> Result<(), ItemError> {
        principal.require(T::PERMISSION)?;

        self.store
            .write(|data| {
                if !T::table(data).contains(item.id()) {
                    return Err(ItemError::NotFound {
                        kind: T::KIND,
                        id: item.id(),
                    });
                }
                Self::check_unique(data, &item)?;
                T::table_mut(data).update(item.clone());
                Ok(())
            })
            .await?;

        self.emit("edit", principal, &item).await;
        Ok(())
    }

    pub async fn delete(&self, principal: &Principal, id: u64) -> Result<T, ItemError> {
        principal.require(T::PERMISSION)?;

        let removed = self
            .store
            .write(|data| {
                let item = T::table(data)
                    .get(id)
                    .cloned()
                    .ok_or(ItemError::NotFound { kind: T::KIND, id })?;
                let accounts = T::usage(data, id);
                if accounts > 0 {
                    return Err(ItemError::InUse {
                        kind: T::KIND,
                        name: item.name().to_string(),
                        accounts,
                    });
                }
                T::detach(data, id);
                T::table_mut(data).remove(id);
                Ok(item)
            })
            .await?;

        self.emit("delete", principal, &removed).await;
        Ok(removed)
    }

    pub fn get(&self, id: u64) -> Option<T> {
        T::table(&self.store.read()).get(id).cloned()
    }

    /// Lookup by normalised name, so "ACME Corp." finds "acme corp"
    pub fn get_by_name(&self, name: &str) -> Option<T> {
        let hash = crate::crypto::item_hash(name);
        T::table(&self.store.read())
            .values()
            .find(|item| item.hash() == hash)
            .cloned()
    }

    /// Every item, sorted by name
    pub fn all(&self) -> Vec<T> {
        let mut items: Vec<T> = T::table(&self.store.read()).values().cloned().collect();
        items.sort_by_key(|item| item.name().to_lowercase());
        items
    }

    pub fn search(
        &self,
        principal: &Principal,
        search: &ItemSearch,
    ) -> Result<ItemSearchResult<T>, ItemError> {
        principal.require(T::PERMISSION)?;
        let matches = self
            .all()
            .into_iter()
            .filter(|item| search.matches([item.name()]))
            .collect();
        Ok(search.paginate(matches, self.page_size))
    }
}

impl ItemService<Client> {
    /// Global clients plus the clients of accounts the principal can see
    pub fn all_for_user(&self, principal: &Principal, full_group_access: bool) -> Vec<Client> {
        let data = self.store.read();
        let used: BTreeSet<u64> = data
            .accounts
            .values()
            .filter(|a| is_visible(principal, a, full_group_access))
            .map(|a| a.client_id)
            .collect();

        let mut clients: Vec<Client> = data
            .clients
            .values()
            .filter(|c| c.is_global || used.contains(&c.id))
            .cloned()
            .collect();
        clients.sort_by_key(|c| c.name.to_lowercase());
        clients
    }
}
