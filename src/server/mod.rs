//! Application assembly
//!
//! Opens the vault and wires every service to the shared store and event
//! dispatcher. The web UI, the JSON API and the CLI all work through a
//! [`SyspassApp`].

use crate::accounts::{AccountFileService, AccountService};
use crate::acl::Principal;
use crate::auth::{LoginService, TokenManager};
use crate::config::Config;
use crate::events::{EventDispatcher, EventLogService, EventlogReceiver, TracingReceiver};
use crate::install::{ExportService, MasterPasswordService, UpgradeService};
use crate::items::{CategoryService, ClientService, TagService};
use crate::links::LinkService;
use crate::notifications::{NotificationReceiver, NotificationService};
use crate::plugins::PluginManager;
use crate::search::AccountSearchService;
use crate::storage::{FileStorage, Store};
use crate::tasks::TaskManager;
use crate::track::TrackService;
use crate::users::{GroupService, ProfileService, UserService};
use crate::SyspassError;
use secrecy::SecretString;
use std::sync::Arc;
use tracing::info;

/// Every service, sharing one store and one dispatcher
pub struct SyspassApp {
    config: Config,
    store: Arc<Store>,
    events: Arc<EventDispatcher>,
    pub accounts: AccountService,
    pub files: AccountFileService,
    pub search: AccountSearchService,
    pub categories: CategoryService,
    pub clients: ClientService,
    pub tags: TagService,
    pub users: UserService,
    pub groups: GroupService,
    pub profiles: ProfileService,
    pub tracks: Arc<TrackService>,
    pub links: LinkService,
    pub notifications: Arc<NotificationService>,
    pub tokens: TokenManager,
    pub login: LoginService,
    pub eventlog: EventLogService,
    pub tasks: TaskManager,
    pub masterpass: MasterPasswordService,
    pub export: ExportService,
    pub upgrade: UpgradeService,
    pub plugins: PluginManager,
}

impl SyspassApp {
    /// Open the vault named in `config` and start every service
    pub async fn open(config: Config, master: &SecretString) -> Result<Self, SyspassError> {
        let backend = FileStorage::open(&config.storage.path, master).await?;
        let store = Arc::new(Store::open(Arc::new(backend), master).await?);
        Self::with_store(config, store).await
    }

    /// Wire the services around an already opened store
    pub async fn with_store(config: Config, store: Arc<Store>) -> Result<Self, SyspassError> {
        let events = Arc::new(EventDispatcher::new());
        let page_size = config.accounts.page_size;

        let notifications = Arc::new(NotificationService::new(store.clone(), page_size));
        events.attach(Arc::new(TracingReceiver));
        events.attach(Arc::new(EventlogReceiver::new(
            store.clone(),
            &config.events.log_events,
            config.events.max_rows,
        )));
        events.attach(Arc::new(NotificationReceiver::new(
            notifications.clone(),
            &config.events.notify_events,
        )));

        let tracks = Arc::new(TrackService::new(
            store.clone(),
            events.clone(),
            config.security.clone(),
            page_size,
        ));

        let plugins = PluginManager::new(store.clone(), events.clone(), notifications.clone())
            .with_builtins();
        plugins.load(&config.plugins.enabled).await?;

        let app = Self {
            accounts: AccountService::new(store.clone(), events.clone(), config.accounts.clone()),
            files: AccountFileService::new(store.clone(), events.clone(), config.accounts.clone()),
            search: AccountSearchService::new(store.clone(), config.accounts.clone()),
            categories: CategoryService::new(store.clone(), events.clone(), page_size),
            clients: ClientService::new(store.clone(), events.clone(), page_size),
            tags: TagService::new(store.clone(), events.clone(), page_size),
            users: UserService::new(
                store.clone(),
                events.clone(),
                page_size,
                config.security.min_password_length,
            ),
            groups: GroupService::new(store.clone(), events.clone(), page_size),
            profiles: ProfileService::new(store.clone(), events.clone(), page_size),
            links: LinkService::new(
                store.clone(),
                events.clone(),
                tracks.clone(),
                config.links.clone(),
                config.accounts.full_group_access,
                page_size,
            ),
            tokens: TokenManager::new(store.clone(), events.clone(), tracks.clone()),
            login: LoginService::new(store.clone(), events.clone(), tracks.clone()),
            eventlog: EventLogService::new(store.clone(), page_size),
            tasks: TaskManager::new(config.tasks.dir.clone(), config.tasks.poll_interval),
            masterpass: MasterPasswordService::new(
                store.clone(),
                events.clone(),
                config.security.min_password_length,
            ),
            export: ExportService::new(store.clone(), events.clone()),
            upgrade: UpgradeService::new(store.clone(), events.clone()),
            tracks,
            notifications,
            plugins,
            config,
            store,
            events,
        };

        info!(
            vault = %app.store.location(),
            receivers = ?app.events.receiver_names(),
            "sysPass ready"
        );
        Ok(app)
    }

    /// The principal for a stored user, `None` when unknown or disabled
    pub fn principal(&self, user_id: u64) -> Option<Principal> {
        Principal::from_vault(&self.store.read(), user_id)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn events(&self) -> &Arc<EventDispatcher> {
        &self.events
    }

    /// Verify the vault backend is reachable
    pub async fn health_check(&self) -> Result<(), SyspassError> {
        self.store.health_check().await?;
        Ok(())
    }
}
