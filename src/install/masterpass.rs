use super::InstallError;
use crate::acl::{Permission, Principal};
use crate::events::{Event, EventDispatcher, EventMessage};
use crate::storage::Store;
use crate::tasks::Task;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;

/// Changes the master password, re-encrypting every account secret
pub struct MasterPasswordService {
    store: Arc<Store>,
    events: Arc<EventDispatcher>,
    min_password_length: usize,
}

impl MasterPasswordService {
    pub fn new(store: Arc<Store>, events: Arc<EventDispatcher>, min_password_length: usize) -> Self {
        Self {
            store,
            events,
            min_password_length,
        }
    }

    /// Returns the number of secrets re-encrypted. Progress goes to `task`
    /// when one is given; the task is ended either way.
    pub async fn change(
        &self,
        principal: &Principal,
        current: &SecretString,
        new: &SecretString,
        task: Option<Task>,
    ) -> Result<usize, InstallError> {
        let result = self.rekey(principal, current, new, task.as_ref()).await;

        if let Some(task) = task {
            let message = match &result {
                Ok(n) => format!("Master password changed, {} secrets re-encrypted", n),
                Err(e) => format!("Master password change failed: {}", e),
            };
            task.end(&message)?;
        }
        result
    }

    async fn rekey(
        &self,
        principal: &Principal,
        current: &SecretString,
        new: &SecretString,
        task: Option<&Task>,
    ) -> Result<usize, InstallError> {
        principal.require(Permission::ConfigEncryption)?;
        if !self.store.verify_master(current.expose_secret()) {
            tracing::warn!(user = %principal.login, "Master password change with wrong current password");
            return Err(InstallError::WrongMasterPassword);
        }
        if new.expose_secret().chars().count() < self.min_password_length {
            return Err(InstallError::WeakPassword {
                what: "Master password",
                min: self.min_password_length,
            });
        }
        if new.expose_secret() == current.expose_secret() {
            return Err(InstallError::Invalid(
                "the new master password matches the current one".to_string(),
            ));
        }

        let total = self
            .store
            .rekey(new, |done, total| {
                if let Some(task) = task {
                    if let Err(e) = task.write_progress("Re-encrypting accounts", done, total) {
                        tracing::debug!(error = %e, "Could not write task progress");
                    }
                }
            })
            .await?;

        tracing::info!(secrets = total, user = %principal.login, "Master password changed");
        let event = Event::new("edit.masterPassword", "config").by(principal).with_message(
            EventMessage::new("Master password changed").add_detail("Secrets", total),
        );
        self.events.dispatch(event).await;
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::Account;
    use crate::storage::testing::{store, MASTER};
    use crate::storage::StorageError;
    use crate::tasks::TaskManager;
    use std::time::Duration;

    fn secret(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    #[tokio::test]
    async fn test_change_reencrypts_and_reports_progress() {
        let (dir, store) = store().await;
        let sealed = store.seal("hunter2").unwrap();
        store
            .write(|data| {
                let mut account = Account::blank("db");
                account.password = sealed;
                data.accounts.insert(account);
                Ok::<_, StorageError>(())
            })
            .await
            .unwrap();

        let tasks = TaskManager::new(dir.path().join("tasks"), Duration::from_millis(10));
        let task = tasks.create("masterpass", 0).unwrap();
        let id = task.id().to_string();

        let service = MasterPasswordService::new(store.clone(), Arc::new(EventDispatcher::new()), 8);
        let n = service
            .change(&Principal::system(), &secret(MASTER), &secret("new-master-pw"), Some(task))
            .await
            .unwrap();

        assert_eq!(n, 1);
        assert!(store.verify_master("new-master-pw"));
        let account = store.read().accounts.values().next().cloned().unwrap();
        assert_eq!(store.unseal(&account.password).unwrap(), "hunter2");

        let status = tasks.read_status(&id).unwrap().unwrap();
        assert!(status.end);
        assert!(!tasks.is_running(&id));
    }

    #[tokio::test]
    async fn test_change_rejects_wrong_or_weak_password() {
        let (_dir, store) = store().await;
        let service = MasterPasswordService::new(store.clone(), Arc::new(EventDispatcher::new()), 8);
        let admin = Principal::system();

        assert!(matches!(
            service.change(&admin, &secret("wrong"), &secret("new-master-pw"), None).await,
            Err(InstallError::WrongMasterPassword)
        ));
        assert!(matches!(
            service.change(&admin, &secret(MASTER), &secret("short"), None).await,
            Err(InstallError::WeakPassword { .. })
        ));

        let mut user = Principal::system();
        user.is_admin_app = false;
        user.permissions.clear();
        assert!(matches!(
            service.change(&user, &secret(MASTER), &secret("new-master-pw"), None).await,
            Err(InstallError::Acl(_))
        ));
        assert!(store.verify_master(MASTER));
    }
}
