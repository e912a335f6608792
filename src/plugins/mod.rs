//! Plugin system for sysPass
//!
//! Plugins are compiled-in event subscribers. Each one is registered with
//! the [`PluginManager`], which keeps a [`PluginRecord`] per plugin in the
//! vault (enabled flag, installed version, private JSON data) and attaches
//! enabled plugins to the event dispatcher.

mod expiry;

pub use expiry::ExpiryNotifier;

use crate::acl::{AclError, Permission, Principal};
use crate::events::{Event, EventDispatcher, EventError, EventFilter, EventReceiver};
use crate::notifications::{Notification, NotificationService};
use crate::storage::{StorageError, Store};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Plugin-related errors
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Plugin not found: {0}")]
    NotFound(String),

    #[error("Plugin is not available: {0}")]
    Unavailable(String),

    #[error("Plugin {plugin} failed: {reason}")]
    Failed { plugin: String, reason: String },

    #[error(transparent)]
    Acl(#[from] AclError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Persistent state of a plugin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginRecord {
    pub id: u64,
    pub name: String,
    /// Version last initialized
    pub version: String,
    pub enabled: bool,
    /// False when no implementation with this name is registered
    pub available: bool,
    /// Plugin-owned JSON store
    #[serde(default)]
    pub data: serde_json::Value,
}

/// What a plugin can reach while handling an event
#[derive(Clone)]
pub struct PluginContext {
    plugin: String,
    store: Arc<Store>,
    notifications: Arc<NotificationService>,
}

impl PluginContext {
    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn get_data(&self) -> serde_json::Value {
        read_data(&self.store, &self.plugin)
    }

    pub async fn set_data(&self, value: serde_json::Value) -> Result<(), PluginError> {
        write_data(&self.store, &self.plugin, value).await
    }

    pub async fn notify(&self, user_id: u64, description: impl Into<String>) -> Result<u64, PluginError> {
        let notification = Notification::new("Information", self.plugin.clone(), description, user_id);
        self.notifications
            .create(notification)
            .await
            .map_err(|e| PluginError::Failed {
                plugin: self.plugin.clone(),
                reason: e.to_string(),
            })
    }
}

/// Trait for sysPass plugins
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique identifier for this plugin
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    /// Event names (or `prefix.*` patterns) the plugin handles
    fn events(&self) -> Vec<&str>;

    async fn on_event(&self, event: &Event, ctx: &PluginContext) -> Result<(), PluginError>;

    /// Called each time the plugin is enabled
    async fn init(&self, _ctx: &PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    /// Called once when the stored version differs from [`Plugin::version`]
    async fn upgrade(&self, _from_version: &str, _ctx: &PluginContext) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Forwards dispatcher events to a plugin
struct PluginReceiver {
    name: String,
    plugin: Arc<dyn Plugin>,
    ctx: PluginContext,
}

#[async_trait]
impl EventReceiver for PluginReceiver {
    fn name(&self) -> &str {
        &self.name
    }

    fn events(&self) -> EventFilter {
        EventFilter::Only(self.plugin.events().into_iter().map(str::to_string).collect())
    }

    async fn receive(&self, event: &Event) -> Result<(), EventError> {
        self.plugin
            .on_event(event, &self.ctx)
            .await
            .map_err(|e| EventError::Receiver {
                receiver: self.name.clone(),
                reason: e.to_string(),
            })
    }
}

/// Plugin summary for listings
#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub enabled: bool,
    pub available: bool,
}

impl From<&PluginRecord> for PluginInfo {
    fn from(record: &PluginRecord) -> Self {
        Self {
            name: record.name.clone(),
            version: record.version.clone(),
            enabled: record.enabled,
            available: record.available,
        }
    }
}

/// Registry of compiled-in plugins plus their vault state
pub struct PluginManager {
    plugins: RwLock<HashMap<String, Arc<dyn Plugin>>>,
    store: Arc<Store>,
    events: Arc<EventDispatcher>,
    notifications: Arc<NotificationService>,
}

impl PluginManager {
    pub fn new(store: Arc<Store>, events: Arc<EventDispatcher>, notifications: Arc<NotificationService>) -> Self {
        Self {
            plugins: RwLock::new(HashMap::new()),
            store,
            events,
            notifications,
        }
    }

    /// The built-in plugins
    pub fn with_builtins(self) -> Self {
        self.register(Arc::new(ExpiryNotifier::new()));
        self
    }

    pub fn register(&self, plugin: Arc<dyn Plugin>) {
        let mut plugins = self.plugins.write();
        plugins.insert(plugin.name().to_string(), plugin);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.read().get(name).cloned()
    }

    fn context(&self, name: &str) -> PluginContext {
        PluginContext {
            plugin: name.to_string(),
            store: self.store.clone(),
            notifications: self.notifications.clone(),
        }
    }

    fn receiver_name(name: &str) -> String {
        format!("plugin:{}", name)
    }

    async fn attach(&self, plugin: Arc<dyn Plugin>) -> Result<(), PluginError> {
        let name = plugin.name().to_string();
        let ctx = self.context(&name);
        plugin.init(&ctx).await?;
        self.events.attach(Arc::new(PluginReceiver {
            name: Self::receiver_name(&name),
            plugin,
            ctx,
        }));
        tracing::info!(plugin = %name, "Plugin attached");
        Ok(())
    }

    /// Sync vault records with the registered plugins and attach the
    /// enabled ones. Names in `enabled` are switched on.
    pub async fn load(&self, enabled: &[String]) -> Result<(), PluginError> {
        let registered: Vec<Arc<dyn Plugin>> = self.plugins.read().values().cloned().collect();

        // Upgrades run before the new version is recorded
        let stored: HashMap<String, String> = self
            .store
            .read()
            .plugins
            .values()
            .map(|r| (r.name.clone(), r.version.clone()))
            .collect();
        for plugin in &registered {
            if let Some(version) = stored.get(plugin.name()) {
                if version != plugin.version() {
                    tracing::info!(plugin = plugin.name(), from = %version, to = plugin.version(), "Upgrading plugin");
                    plugin.upgrade(version, &self.context(plugin.name())).await?;
                }
            }
        }

        let to_attach: Vec<String> = self
            .store
            .write(|data| {
                for record in data.plugins.values_mut() {
                    record.available = registered.iter().any(|p| p.name() == record.name);
                }
                for plugin in &registered {
                    let existing = data
                        .plugins
                        .values()
                        .find(|r| r.name == plugin.name())
                        .map(|r| r.id);
                    match existing {
                        Some(id) => {
                            if let Some(record) = data.plugins.get_mut(id) {
                                record.version = plugin.version().to_string();
                            }
                        }
                        None => {
                            data.plugins.insert(PluginRecord {
                                id: 0,
                                name: plugin.name().to_string(),
                                version: plugin.version().to_string(),
                                enabled: false,
                                available: true,
                                data: serde_json::Value::Null,
                            });
                        }
                    }
                }
                for record in data.plugins.values_mut() {
                    if enabled.contains(&record.name) && record.available {
                        record.enabled = true;
                    }
                }
                Ok::<_, StorageError>(
                    data.plugins
                        .values()
                        .filter(|r| r.enabled && r.available)
                        .map(|r| r.name.clone())
                        .collect(),
                )
            })
            .await?;

        for name in to_attach {
            if let Some(plugin) = self.get(&name) {
                self.attach(plugin).await?;
            }
        }
        Ok(())
    }

    pub async fn enable(&self, principal: &Principal, name: &str) -> Result<(), PluginError> {
        principal.require(Permission::ManagePlugins)?;
        let plugin = self
            .get(name)
            .ok_or_else(|| PluginError::Unavailable(name.to_string()))?;

        self.set_enabled(name, true).await?;
        self.attach(plugin).await?;
        tracing::info!(plugin = name, user = %principal.login, "Plugin enabled");
        Ok(())
    }

    pub async fn disable(&self, principal: &Principal, name: &str) -> Result<(), PluginError> {
        principal.require(Permission::ManagePlugins)?;

        self.set_enabled(name, false).await?;
        self.events.detach(&Self::receiver_name(name));
        tracing::info!(plugin = name, user = %principal.login, "Plugin disabled");
        Ok(())
    }

    async fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), PluginError> {
        self.store
            .write(|data| {
                let record = data
                    .plugins
                    .values_mut()
                    .find(|r| r.name == name)
                    .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
                record.enabled = enabled;
                Ok(())
            })
            .await
    }

    pub fn list(&self, principal: &Principal) -> Result<Vec<PluginInfo>, PluginError> {
        principal.require(Permission::ManagePlugins)?;
        let data = self.store.read();
        let mut list: Vec<PluginInfo> = data.plugins.values().map(PluginInfo::from).collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    pub fn get_data(&self, name: &str) -> serde_json::Value {
        read_data(&self.store, name)
    }

    pub async fn set_data(&self, name: &str, value: serde_json::Value) -> Result<(), PluginError> {
        write_data(&self.store, name, value).await
    }
}

fn read_data(store: &Store, name: &str) -> serde_json::Value {
    store
        .read()
        .plugins
        .values()
        .find(|r| r.name == name)
        .map(|r| r.data.clone())
        .unwrap_or(serde_json::Value::Null)
}

async fn write_data(store: &Store, name: &str, value: serde_json::Value) -> Result<(), PluginError> {
    store
        .write(|data| {
            let record = data
                .plugins
                .values_mut()
                .find(|r| r.name == name)
                .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
            record.data = value;
            Ok(())
        })
        .await
}
