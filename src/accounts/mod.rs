//! Accounts: stored credentials, their history and attached files

mod files;
mod service;
mod types;

pub use files::AccountFileService;
pub use service::{AccountService, HistoryEntry};
pub use types::{
    Account, AccountFile, AccountGrant, AccountHistory, AccountPassword, AccountRequest,
    AccountView, FileInfo, HistoryReason,
};

use crate::acl::{can_list, AccountAcl, AclError, Principal};
use crate::storage::{StorageError, VaultData};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AccountError {
    #[error("Account {0} not found")]
    NotFound(u64),

    #[error("History entry {0} not found")]
    HistoryNotFound(u64),

    #[error("File {0} not found")]
    FileNotFound(u64),

    #[error("Unknown {kind} {id}")]
    MissingReference { kind: &'static str, id: u64 },

    #[error("File is {size} bytes, the limit is {max}")]
    FileTooLarge { size: usize, max: usize },

    #[error("Invalid account: {0}")]
    Invalid(String),

    #[error(transparent)]
    Acl(#[from] AclError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Load an account together with the principal's ACL for it. Private
/// accounts outside the principal's reach look exactly like missing ones
/// would to a stranger: access denied.
pub(crate) fn account_with_acl(
    data: &VaultData,
    principal: &Principal,
    id: u64,
    full_group_access: bool,
) -> Result<(Account, AccountAcl), AccountError> {
    let account = data.accounts.get(id).ok_or(AccountError::NotFound(id))?;
    if !can_list(principal, account) {
        return Err(AclError::AccountDenied(id).into());
    }
    let acl = AccountAcl::compile(principal, account, full_group_access);
    Ok((account.clone(), acl))
}

/// Turn a false ACL flag into an error
pub(crate) fn ensure(allowed: bool, account_id: u64) -> Result<(), AccountError> {
    if allowed {
        Ok(())
    } else {
        Err(AclError::AccountDenied(account_id).into())
    }
}
