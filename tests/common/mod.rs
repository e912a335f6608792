//! Shared setup for the integration tests

#![allow(dead_code)]

use secrecy::SecretString;
use std::sync::Arc;
use syspass::accounts::AccountRequest;
use syspass::acl::Principal;
use syspass::config::Config;
use syspass::install::{InstallRequest, Installer};
use syspass::items::{Category, Client};
use syspass::server::SyspassApp;
use tempfile::TempDir;

pub const ADMIN_LOGIN: &str = "admin";
pub const ADMIN_PASSWORD: &str = "admin-password";
pub const MASTER_PASSWORD: &str = "master-password";

pub struct TestApp {
    pub dir: TempDir,
    pub app: Arc<SyspassApp>,
    pub admin: Principal,
}

/// Install a fresh vault and wire the application around it
pub async fn setup() -> TestApp {
    setup_with(|_| {}).await
}

pub async fn setup_with(tweak: impl FnOnce(&mut Config)) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.storage.path = dir.path().join("vault.enc");
    config.tasks.dir = dir.path().join("tasks");
    config.storage.exports_dir = dir.path().join("exports");
    config.tasks.poll_interval = std::time::Duration::from_millis(20);
    config.security.track_sleep_per_attempt = std::time::Duration::ZERO;
    tweak(&mut config);

    let installation = Installer::new(config.security.min_password_length)
        .run(InstallRequest {
            admin_login: ADMIN_LOGIN.to_string(),
            admin_name: "Administrator".to_string(),
            admin_password: SecretString::from(ADMIN_PASSWORD.to_string()),
            master_password: SecretString::from(MASTER_PASSWORD.to_string()),
            vault_path: config.storage.path.clone(),
            config_path: None,
        })
        .await
        .unwrap();

    let app = SyspassApp::with_store(config, installation.store).await.unwrap();
    let admin = app.principal(installation.admin_id).unwrap();
    TestApp {
        dir,
        app: Arc::new(app),
        admin,
    }
}

impl TestApp {
    /// A category and a client to hang accounts on
    pub async fn reference_items(&self) -> (u64, u64) {
        let category = self
            .app
            .categories
            .create(&self.admin, Category::new("Servers", None))
            .await
            .unwrap();
        let client = self
            .app
            .clients
            .create(&self.admin, Client::new("ACME", None, false))
            .await
            .unwrap();
        (category, client)
    }

    pub async fn account(&self, name: &str, password: &str) -> u64 {
        let (category_id, client_id) = match (
            self.app.categories.get_by_name("Servers"),
            self.app.clients.get_by_name("ACME"),
        ) {
            (Some(category), Some(client)) => (category.id, client.id),
            _ => self.reference_items().await,
        };
        self.app
            .accounts
            .create(
                &self.admin,
                AccountRequest {
                    name: name.to_string(),
                    login: "root".to_string(),
                    url: format!("https://{}.example.com", name),
                    category_id,
                    client_id,
                    password: Some(password.to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
    }
}
