use super::{account_with_acl, ensure, AccountError, AccountFile, FileInfo};
use crate::acl::{Permission, Principal};
use crate::config::AccountsConfig;
use crate::events::{Event, EventDispatcher, EventMessage};
use crate::storage::Store;
use chrono::Utc;
use std::sync::Arc;

/// Attachments stored alongside accounts
pub struct AccountFileService {
    store: Arc<Store>,
    events: Arc<EventDispatcher>,
    config: AccountsConfig,
}

impl AccountFileService {
    pub fn new(store: Arc<Store>, events: Arc<EventDispatcher>, config: AccountsConfig) -> Self {
        Self {
            store,
            events,
            config,
        }
    }

    async fn emit(&self, name: &str, principal: &Principal, file: &FileInfo) {
        let event = Event::new(name, "files").by(principal).with_message(
            EventMessage::new("Account file")
                .add_detail("File", &file.name)
                .add_detail("Account", file.account_id),
        );
        self.events.dispatch(event).await;
    }

    pub async fn upload(
        &self,
        principal: &Principal,
        account_id: u64,
        name: &str,
        mime: &str,
        content: Vec<u8>,
    ) -> Result<u64, AccountError> {
        principal.require(Permission::AccountFiles)?;
        let max = self.config.max_file_size_kb * 1024;
        if content.len() > max {
            return Err(AccountError::FileTooLarge {
                size: content.len(),
                max,
            });
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(AccountError::Invalid("file name is required".to_string()));
        }

        let full = self.config.full_group_access;
        let mut file = AccountFile {
            id: 0,
            account_id,
            name: name.to_string(),
            mime: if mime.is_empty() {
                "application/octet-stream".to_string()
            } else {
                mime.to_string()
            },
            size: content.len(),
            content,
            created_at: Utc::now(),
        };

        let id = self
            .store
            .write(|data| {
                let (_, acl) = account_with_acl(data, principal, account_id, full)?;
                ensure(acl.show_files && acl.edit, account_id)?;
                Ok::<_, AccountError>(data.files.insert(file.clone()))
            })
            .await?;
        file.id = id;

        tracing::info!(file_id = id, account_id, size = file.size, "File uploaded");
        self.emit("upload.account.file", principal, &FileInfo::from(&file)).await;
        Ok(id)
    }

    pub async fn download(&self, principal: &Principal, file_id: u64) -> Result<AccountFile, AccountError> {
        let file = {
            let data = self.store.read();
            let file = data
                .files
                .get(file_id)
                .cloned()
                .ok_or(AccountError::FileNotFound(file_id))?;
            let (_, acl) = account_with_acl(&data, principal, file.account_id, self.config.full_group_access)?;
            ensure(acl.show_files, file.account_id)?;
            file
        };

        self.emit("download.account.file", principal, &FileInfo::from(&file)).await;
        Ok(file)
    }

    pub fn list(&self, principal: &Principal, account_id: u64) -> Result<Vec<FileInfo>, AccountError> {
        let data = self.store.read();
        let (_, acl) = account_with_acl(&data, principal, account_id, self.config.full_group_access)?;
        ensure(acl.view, account_id)?;

        Ok(data
            .files
            .values()
            .filter(|f| f.account_id == account_id)
            .map(FileInfo::from)
            .collect())
    }

    pub async fn delete(&self, principal: &Principal, file_id: u64) -> Result<(), AccountError> {
        principal.require(Permission::AccountFiles)?;
        let full = self.config.full_group_access;

        let info = self
            .store
            .write(|data| {
                let file = data.files.get(file_id).ok_or(AccountError::FileNotFound(file_id))?;
                let info = FileInfo::from(file);
                let (_, acl) = account_with_acl(data, principal, info.account_id, full)?;
                ensure(acl.show_files && acl.edit, info.account_id)?;
                data.files.remove(file_id);
                Ok::<_, AccountError>(info)
            })
            .await?;

        self.emit("delete.account.file", principal, &info).await;
        Ok(())
    }
}
