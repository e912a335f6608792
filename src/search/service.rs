use super::filter::{AccountQuery, AccountSearchFilter, SortKey, SortOrder};
use crate::accounts::Account;
use crate::acl::{can_list, AccountAcl, Permission, Principal};
use crate::config::AccountsConfig;
use crate::storage::{Store, VaultData};
use chrono::Utc;
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;

const SHORT_NOTES: usize = 300;

/// One row of an account search
#[derive(Debug, Clone, Serialize)]
pub struct AccountSearchItem {
    pub id: u64,
    pub name: String,
    pub login: String,
    pub url: String,
    pub category: String,
    pub client: String,
    pub tags: Vec<String>,
    /// At most 300 characters
    pub notes: String,
    pub view_count: u64,
    pub is_private: bool,
    pub is_private_group: bool,
    pub is_favorite: bool,
    pub password_expired: bool,
    pub has_public_link: bool,
    /// Listed by global search only; details are withheld
    pub restricted: bool,
    pub acl: AccountAcl,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountSearchResult {
    pub total: usize,
    pub items: Vec<AccountSearchItem>,
}

pub struct AccountSearchService {
    store: Arc<Store>,
    config: AccountsConfig,
}

impl AccountSearchService {
    pub fn new(store: Arc<Store>, config: AccountsConfig) -> Self {
        Self { store, config }
    }

    pub fn search(&self, principal: &Principal, filter: &AccountSearchFilter) -> AccountSearchResult {
        let data = self.store.read();
        let query = AccountQuery::build(filter, principal, &data);
        let now = Utc::now();
        let full = self.config.full_group_access;
        let global = self.config.global_search
            && filter.global_search
            && principal.has(Permission::AccountGlobalSearch);

        let mut matches: Vec<(&Account, AccountAcl, bool)> = data
            .accounts
            .values()
            .filter(|account| can_list(principal, account))
            .filter_map(|account| {
                let acl = AccountAcl::compile(principal, account, full);
                let visible = principal.is_admin() || acl.view;
                if visible {
                    Some((account, acl, false))
                } else if global {
                    Some((account, AccountAcl::denied(account.id), true))
                } else {
                    None
                }
            })
            .filter(|(account, _, _)| query.matches(account, &data, now))
            .collect();

        sort(&mut matches, filter, &data);

        let total = matches.len();
        let limit = match filter.limit.unwrap_or(self.config.page_size) {
            0 => usize::MAX,
            n => n,
        };
        let items = matches
            .into_iter()
            .skip(filter.offset)
            .take(limit)
            .map(|(account, acl, restricted)| materialize(&data, principal.id, account, acl, restricted))
            .collect();

        tracing::debug!(user = %principal.login, total, query = %filter.query, "Account search");
        AccountSearchResult { total, items }
    }
}

fn sort(matches: &mut [(&Account, AccountAcl, bool)], filter: &AccountSearchFilter, data: &VaultData) {
    if filter.sort_views {
        matches.sort_by(|a, b| b.0.view_count.cmp(&a.0.view_count).then(a.0.id.cmp(&b.0.id)));
        return;
    }

    let client = |a: &Account| {
        data.clients
            .get(a.client_id)
            .map(|c| c.name.to_lowercase())
            .unwrap_or_default()
    };
    let category = |a: &Account| {
        data.categories
            .get(a.category_id)
            .map(|c| c.name.to_lowercase())
            .unwrap_or_default()
    };
    let name = |a: &Account| a.name.to_lowercase();

    matches.sort_by(|(a, _, _), (b, _, _)| {
        let ord = match filter.sort {
            SortKey::Default => client(a).cmp(&client(b)).then_with(|| name(a).cmp(&name(b))),
            SortKey::Name => name(a).cmp(&name(b)),
            SortKey::Category => category(a).cmp(&category(b)),
            SortKey::Login => a.login.to_lowercase().cmp(&b.login.to_lowercase()),
            SortKey::Url => a.url.to_lowercase().cmp(&b.url.to_lowercase()),
            SortKey::Client => client(a).cmp(&client(b)),
        };
        let ord = match filter.order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        };
        if ord == Ordering::Equal {
            a.id.cmp(&b.id)
        } else {
            ord
        }
    });
}

fn materialize(
    data: &VaultData,
    user_id: u64,
    account: &Account,
    acl: AccountAcl,
    restricted: bool,
) -> AccountSearchItem {
    let (login, url, notes) = if restricted {
        (String::new(), String::new(), String::new())
    } else {
        (
            account.login.clone(),
            account.url.clone(),
            account.notes.chars().take(SHORT_NOTES).collect(),
        )
    };

    AccountSearchItem {
        id: account.id,
        name: account.name.clone(),
        login,
        url,
        category: data
            .categories
            .get(account.category_id)
            .map(|c| c.name.clone())
            .unwrap_or_default(),
        client: data
            .clients
            .get(account.client_id)
            .map(|c| c.name.clone())
            .unwrap_or_default(),
        tags: account
            .tags
            .iter()
            .filter_map(|t| data.tags.get(*t).map(|t| t.name.clone()))
            .collect(),
        notes,
        view_count: account.view_count,
        is_private: account.is_private,
        is_private_group: account.is_private_group,
        is_favorite: data.is_favorite(user_id, account.id),
        password_expired: account.is_expired(Utc::now()),
        has_public_link: data.links.values().any(|l| l.account_id == account.id),
        restricted,
        acl,
    }
}
