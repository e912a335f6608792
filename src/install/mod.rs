//! Installation, upgrades and vault-wide maintenance jobs

mod export;
mod masterpass;

pub use export::{private_dir, ExportAccount, ExportDocument, ExportService};
pub use masterpass::MasterPasswordService;

use crate::acl::{
    admin_profile, read_only_profile, standard_profile, AclError, Principal,
};
use crate::config::{Config, ConfigError};
use crate::crypto::{hash_password, CryptoError};
use crate::events::{Event, EventDispatcher, EventMessage};
use crate::storage::{FileStorage, StorageError, Store};
use crate::tasks::TaskError;
use crate::users::{User, UserGroup};
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Version recorded in the vault by this build
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the group created for the first administrator
pub const ADMIN_GROUP: &str = "Admins";

#[derive(Error, Debug)]
pub enum InstallError {
    #[error("A vault already exists at {0}")]
    VaultExists(PathBuf),

    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("{what} must be at least {min} characters")]
    WeakPassword { what: &'static str, min: usize },

    #[error("Wrong master password")]
    WrongMasterPassword,

    #[error(transparent)]
    Acl(#[from] AclError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Everything the installer needs
#[derive(Debug)]
pub struct InstallRequest {
    pub admin_login: String,
    pub admin_name: String,
    pub admin_password: SecretString,
    pub master_password: SecretString,
    pub vault_path: PathBuf,
    /// Write a default config pointing at the new vault
    pub config_path: Option<PathBuf>,
}

/// Result of a successful installation
pub struct Installation {
    pub store: Arc<Store>,
    pub admin_id: u64,
}

/// First-run wizard
pub struct Installer {
    min_password_length: usize,
}

impl Installer {
    pub fn new(min_password_length: usize) -> Self {
        Self {
            min_password_length,
        }
    }

    fn validate(&self, req: &InstallRequest) -> Result<(), InstallError> {
        if req.admin_login.trim().is_empty() {
            return Err(InstallError::Invalid("admin login is required".to_string()));
        }
        if req.admin_password.expose_secret().chars().count() < self.min_password_length {
            return Err(InstallError::WeakPassword {
                what: "Admin password",
                min: self.min_password_length,
            });
        }
        if req.master_password.expose_secret().chars().count() < self.min_password_length {
            return Err(InstallError::WeakPassword {
                what: "Master password",
                min: self.min_password_length,
            });
        }
        if req.vault_path.exists() {
            return Err(InstallError::VaultExists(req.vault_path.clone()));
        }
        Ok(())
    }

    pub async fn run(&self, req: InstallRequest) -> Result<Installation, InstallError> {
        self.validate(&req)?;

        let backend = FileStorage::create(&req.vault_path, &req.master_password).await?;
        let store = Store::initialize(Arc::new(backend), &req.master_password).await?;

        let password_hash = hash_password(req.admin_password.expose_secret())?;
        let admin_login = req.admin_login.trim().to_string();
        let admin_name = match req.admin_name.trim() {
            "" => admin_login.clone(),
            name => name.to_string(),
        };

        let admin_id = store
            .write(|data| {
                let now = Utc::now();
                let group_id = data.groups.insert(UserGroup::new(
                    ADMIN_GROUP,
                    Some("Application administrators".to_string()),
                ));
                let profile_id = data.profiles.insert(admin_profile());
                data.profiles.insert(standard_profile());
                data.profiles.insert(read_only_profile());

                let admin_id = data.users.insert(User {
                    id: 0,
                    name: admin_name,
                    login: admin_login.clone(),
                    email: None,
                    notes: None,
                    group_id,
                    profile_id,
                    password_hash,
                    is_admin_app: true,
                    is_admin_acc: false,
                    is_disabled: false,
                    is_change_pass: false,
                    login_count: 0,
                    last_login: None,
                    created_at: now,
                    updated_at: now,
                });

                data.meta.app_version = APP_VERSION.to_string();
                data.meta.installed_at = Some(now);
                Ok::<_, StorageError>(admin_id)
            })
            .await?;

        tracing::info!(
            vault = %req.vault_path.display(),
            admin = %admin_login,
            version = APP_VERSION,
            "Installation complete"
        );

        if let Some(config_path) = &req.config_path {
            let mut config = Config::default();
            config.storage.path = req.vault_path.clone();
            if let Some(parent) = config_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(config_path, config.to_toml()?).await?;
            tracing::info!(path = %config_path.display(), "Configuration written");
        }

        Ok(Installation {
            store: Arc::new(store),
            admin_id,
        })
    }
}

/// Result of comparing the vault with this build
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UpgradeStatus {
    pub recorded: String,
    pub current: String,
    pub needed: bool,
}

/// Records application upgrades. Schema migrations already ran when the
/// vault was loaded.
pub struct UpgradeService {
    store: Arc<Store>,
    events: Arc<EventDispatcher>,
}

impl UpgradeService {
    pub fn new(store: Arc<Store>, events: Arc<EventDispatcher>) -> Self {
        Self { store, events }
    }

    pub fn check(&self) -> UpgradeStatus {
        let recorded = self.store.read().meta.app_version.clone();
        UpgradeStatus {
            needed: recorded != APP_VERSION,
            recorded,
            current: APP_VERSION.to_string(),
        }
    }

    /// Returns false when the vault was already current
    pub async fn run(&self, principal: &Principal) -> Result<bool, InstallError> {
        principal.require_admin()?;
        let status = self.check();
        if !status.needed {
            return Ok(false);
        }

        self.store
            .write(|data| {
                data.meta.app_version = APP_VERSION.to_string();
                Ok::<_, StorageError>(())
            })
            .await?;

        tracing::info!(from = %status.recorded, to = APP_VERSION, "Application upgraded");
        let event = Event::new("upgrade.app", "install").by(principal).with_message(
            EventMessage::new("Application upgraded")
                .add_detail("From", &status.recorded)
                .add_detail("To", APP_VERSION),
        );
        self.events.dispatch(event).await;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn request(dir: &std::path::Path) -> InstallRequest {
        InstallRequest {
            admin_login: "admin".to_string(),
            admin_name: "Administrator".to_string(),
            admin_password: SecretString::from("admin-password".to_string()),
            master_password: SecretString::from("master-password".to_string()),
            vault_path: dir.join("vault.enc"),
            config_path: Some(dir.join("config.toml")),
        }
    }

    #[tokio::test]
    async fn test_install_creates_admin_and_config() {
        let dir = tempfile::tempdir().unwrap();
        let install = Installer::new(8).run(request(dir.path())).await.unwrap();

        {
            let data = install.store.read();
            assert!(data.meta.is_installed());
            assert_eq!(data.meta.app_version, APP_VERSION);
            let admin = data.users.get(install.admin_id).unwrap();
            assert!(admin.is_admin_app);
            assert_eq!(data.groups.get(admin.group_id).unwrap().name, ADMIN_GROUP);
            assert_eq!(data.profiles.len(), 3);
        }
        assert!(install.store.verify_master("master-password"));

        let config = Config::load(dir.path().join("config.toml")).await.unwrap();
        assert_eq!(config.storage.path, dir.path().join("vault.enc"));
    }

    #[tokio::test]
    async fn test_install_refuses_existing_vault_and_weak_passwords() {
        let dir = tempfile::tempdir().unwrap();
        let installer = Installer::new(8);

        let mut weak = request(dir.path());
        weak.master_password = SecretString::from("short".to_string());
        assert!(matches!(
            installer.run(weak).await,
            Err(InstallError::WeakPassword { what: "Master password", .. })
        ));

        installer.run(request(dir.path())).await.unwrap();
        assert!(matches!(
            installer.run(request(dir.path())).await,
            Err(InstallError::VaultExists(_))
        ));
    }

    #[tokio::test]
    async fn test_upgrade_records_new_version() {
        let dir = tempfile::tempdir().unwrap();
        let install = Installer::new(8).run(request(dir.path())).await.unwrap();
        let service = UpgradeService::new(install.store.clone(), Arc::new(EventDispatcher::new()));

        assert!(!service.check().needed);
        assert!(!service.run(&Principal::system()).await.unwrap());

        install
            .store
            .write(|data| {
                data.meta.app_version = "0.0.1".to_string();
                Ok::<_, StorageError>(())
            })
            .await
            .unwrap();
        assert!(service.check().needed);
        assert!(service.run(&Principal::system()).await.unwrap());
        assert_eq!(service.check().recorded, APP_VERSION);
    }
}
