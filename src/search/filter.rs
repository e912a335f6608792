//! Account search query builder
//!
//! A [`AccountSearchFilter`] plus its tokenized query string are resolved
//! against the vault into [`Clause`] predicates. References that do not
//! resolve (an unknown login, an invalid regex, a non-numeric id) become
//! [`Clause::Nothing`], so the filter never silently widens.

use super::tokenizer::{tokenize, ConditionKind, FilterField, FilterOperator};
use crate::accounts::Account;
use crate::acl::Principal;
use crate::storage::VaultData;
use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    /// Client name, then account name
    #[default]
    Default,
    Name,
    Category,
    Login,
    Url,
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// An account search request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountSearchFilter {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub category_id: Option<u64>,
    #[serde(default)]
    pub client_id: Option<u64>,
    #[serde(default)]
    pub tag_ids: Vec<u64>,
    #[serde(default)]
    pub tags_operator: FilterOperator,
    #[serde(default)]
    pub favorites_only: bool,
    /// Ask for restricted matches too (needs config and permission)
    #[serde(default)]
    pub global_search: bool,
    #[serde(default)]
    pub sort: SortKey,
    #[serde(default)]
    pub order: SortOrder,
    /// Most viewed first, overriding `sort`
    #[serde(default)]
    pub sort_views: bool,
    #[serde(default)]
    pub offset: usize,
    /// `None` uses the configured page size, `Some(0)` returns everything
    #[serde(default)]
    pub limit: Option<usize>,
}

impl AccountSearchFilter {
    pub fn query(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

/// A single predicate over an account
#[derive(Debug, Clone)]
pub enum Clause {
    /// Matches nothing
    Nothing,
    Id(u64),
    /// Owned by, or shared with, the user
    User(u64),
    Owner(u64),
    /// Main group, or shared with the group
    Group(u64),
    MainGroup(u64),
    /// Lower-cased file name fragment
    File(String),
    ClientName(String),
    CategoryName(String),
    /// Carries any of these tags
    AnyTag(BTreeSet<u64>),
    /// Carries all of these tags
    AllTags(BTreeSet<u64>),
    NameRegex(Regex),
    Expired(bool),
    /// Private to the searcher, or private to their main group
    PrivateTo { user_id: u64, group_id: u64 },
    NotPrivate,
    /// Lower-cased free text against name, login, url and notes
    Text(String),
    Category(u64),
    Client(u64),
    Favorite(BTreeSet<u64>),
}

impl Clause {
    pub fn matches(&self, account: &Account, data: &VaultData, now: DateTime<Utc>) -> bool {
        let contains = |haystack: &str, needle: &str| haystack.to_lowercase().contains(needle);

        match self {
            Clause::Nothing => false,
            Clause::Id(id) => account.id == *id,
            Clause::User(id) => account.owner_id == *id || account.shared_with_user(*id),
            Clause::Owner(id) => account.owner_id == *id,
            Clause::Group(id) => account.main_group_id == *id || account.shared_with_group(*id),
            Clause::MainGroup(id) => account.main_group_id == *id,
            Clause::File(name) => data
                .files
                .values()
                .any(|f| f.account_id == account.id && contains(&f.name, name)),
            Clause::ClientName(name) => data
                .clients
                .get(account.client_id)
                .is_some_and(|c| contains(&c.name, name)),
            Clause::CategoryName(name) => data
                .categories
                .get(account.category_id)
                .is_some_and(|c| contains(&c.name, name)),
            Clause::AnyTag(tags) => !tags.is_disjoint(&account.tags),
            Clause::AllTags(tags) => tags.is_subset(&account.tags),
            Clause::NameRegex(re) => re.is_match(&account.name),
            Clause::Expired(expired) => account.is_expired(now) == *expired,
            Clause::PrivateTo { user_id, group_id } => {
                (account.is_private && account.owner_id == *user_id)
                    || (account.is_private_group && account.main_group_id == *group_id)
            }
            Clause::NotPrivate => !account.is_private && !account.is_private_group,
            Clause::Text(text) => {
                contains(&account.name, text)
                    || contains(&account.login, text)
                    || contains(&account.url, text)
                    || contains(&account.notes, text)
            }
            Clause::Category(id) => account.category_id == *id,
            Clause::Client(id) => account.client_id == *id,
            Clause::Favorite(ids) => ids.contains(&account.id),
        }
    }
}

/// The resolved search
#[derive(Debug, Clone, Default)]
pub struct AccountQuery {
    pub operator: FilterOperator,
    /// Item and condition clauses, combined with `operator`
    pub filters: Vec<Clause>,
    /// Always ANDed
    pub required: Vec<Clause>,
}

impl AccountQuery {
    pub fn build(filter: &AccountSearchFilter, principal: &Principal, data: &VaultData) -> Self {
        let mut query = AccountQuery::default();

        if let Some(tokens) = tokenize(&filter.query) {
            query.operator = tokens.operator.unwrap_or_default();

            for (field, value) in &tokens.items {
                query.filters.push(resolve_item(*field, value, data));
            }
            for (kind, set) in &tokens.conditions {
                query.filters.push(match (kind, set) {
                    (ConditionKind::Expired, set) => Clause::Expired(*set),
                    (ConditionKind::Private, true) => Clause::PrivateTo {
                        user_id: principal.id,
                        group_id: principal.group_id,
                    },
                    (ConditionKind::Private, false) => Clause::NotPrivate,
                });
            }
            if let Some(text) = tokens.text {
                query.required.push(Clause::Text(text.to_lowercase()));
            }
        }

        if let Some(id) = filter.category_id {
            query.required.push(Clause::Category(id));
        }
        if let Some(id) = filter.client_id {
            query.required.push(Clause::Client(id));
        }
        if !filter.tag_ids.is_empty() {
            let tags = filter.tag_ids.iter().copied().collect();
            query.required.push(match filter.tags_operator {
                FilterOperator::And => Clause::AllTags(tags),
                FilterOperator::Or => Clause::AnyTag(tags),
            });
        }
        if filter.favorites_only {
            let favorites = data.favorites.get(&principal.id).cloned().unwrap_or_default();
            query.required.push(Clause::Favorite(favorites));
        }

        query
    }

    pub fn matches(&self, account: &Account, data: &VaultData, now: DateTime<Utc>) -> bool {
        let filters = self.filters.is_empty()
            || match self.operator {
                FilterOperator::And => self.filters.iter().all(|c| c.matches(account, data, now)),
                FilterOperator::Or => self.filters.iter().any(|c| c.matches(account, data, now)),
            };
        filters && self.required.iter().all(|c| c.matches(account, data, now))
    }
}

fn resolve_item(field: FilterField, value: &str, data: &VaultData) -> Clause {
    let user = || data.user_by_login(value).map(|u| u.id);
    let group = || data.group_by_name(value).map(|g| g.id);

    let clause = match field {
        FilterField::Id => value.parse().ok().map(Clause::Id),
        FilterField::User => user().map(Clause::User),
        FilterField::Owner => user().map(Clause::Owner),
        FilterField::Group => group().map(Clause::Group),
        FilterField::MainGroup => group().map(Clause::MainGroup),
        FilterField::File => Some(Clause::File(value.to_lowercase())),
        FilterField::Client => Some(Clause::ClientName(value.to_lowercase())),
        FilterField::Category => Some(Clause::CategoryName(value.to_lowercase())),
        FilterField::Tag => {
            let tags: BTreeSet<u64> = data
                .tags
                .values()
                .filter(|t| t.name.eq_ignore_ascii_case(value))
                .map(|t| t.id)
                .collect();
            (!tags.is_empty()).then_some(Clause::AnyTag(tags))
        }
        FilterField::NameRegex => RegexBuilder::new(value)
            .case_insensitive(true)
            .size_limit(1 << 20)
            .build()
            .ok()
            .map(Clause::NameRegex),
    };

    clause.unwrap_or_else(|| {
        tracing::debug!(?field, value, "Search reference did not resolve");
        Clause::Nothing
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{AccountFile, AccountGrant};
    use crate::items::{Category, Client, Tag};
    use crate::users::{User, UserGroup};
    use chrono::Duration;

    fn user(login: &str, group_id: u64) -> User {
        let now = Utc::now();
        User {
            id: 0,
            name: login.to_string(),
            login: login.to_string(),
            email: None,
            notes: None,
            group_id,
            profile_id: 1,
            password_hash: String::new(),
            is_admin_app: false,
            is_admin_acc: false,
            is_disabled: false,
            is_change_pass: false,
            login_count: 0,
            last_login: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// admin(1)/ops(2) users, Admins(1)/Ops(2) groups, two accounts
    fn fixture() -> VaultData {
        let mut data = VaultData::default();
        data.groups.insert(UserGroup::new("Admins", None));
        data.groups.insert(UserGroup::new("Ops", None));
        data.users.insert(user("admin", 1));
        data.users.insert(user("ops", 2));
        data.categories.insert(Category::new("Web servers", None));
        data.categories.insert(Category::new("Databases", None));
        data.clients.insert(Client::new("ACME", None, false));
        data.tags.insert(Tag::new("prod"));
        data.tags.insert(Tag::new("legacy"));

        let mut mail = Account::blank("Mail server");
        mail.login = "postmaster".to_string();
        mail.category_id = 1;
        mail.client_id = 1;
        mail.owner_id = 1;
        mail.main_group_id = 1;
        mail.tags = [1].into_iter().collect();
        mail.password_expires_at = Some(Utc::now() - Duration::days(1));
        data.accounts.insert(mail);

        let mut db = Account::blank("Billing DB");
        db.url = "db.internal".to_string();
        db.category_id = 2;
        db.client_id = 1;
        db.owner_id = 1;
        db.main_group_id = 1;
        db.users.push(AccountGrant { id: 2, can_edit: false });
        db.tags = [1, 2].into_iter().collect();
        db.is_private_group = true;
        data.accounts.insert(db);

        data.files.insert(AccountFile {
            id: 0,
            account_id: 2,
            name: "schema.sql".to_string(),
            mime: "text/plain".to_string(),
            size: 0,
            content: Vec::new(),
            created_at: Utc::now(),
        });
        data.rebuild_indexes();
        data
    }

    fn principal() -> Principal {
        let mut p = Principal::system();
        p.id = 1;
        p.group_id = 1;
        p
    }

    fn ids(query: &str, data: &VaultData) -> Vec<u64> {
        ids_for(&AccountSearchFilter::query(query), data)
    }

    fn ids_for(filter: &AccountSearchFilter, data: &VaultData) -> Vec<u64> {
        let q = AccountQuery::build(filter, &principal(), data);
        let now = Utc::now();
        data.accounts
            .values()
            .filter(|a| q.matches(a, data, now))
            .map(|a| a.id)
            .collect()
    }

    #[test]
    fn test_empty_query_matches_all() {
        let data = fixture();
        assert_eq!(ids("", &data), vec![1, 2]);
    }

    #[test]
    fn test_free_text() {
        let data = fixture();
        assert_eq!(ids("POSTMASTER", &data), vec![1]);
        assert_eq!(ids("internal", &data), vec![2]);
        assert!(ids("nothing-like-this", &data).is_empty());
    }

    #[test]
    fn test_user_and_owner() {
        let data = fixture();
        assert_eq!(ids("user:ops", &data), vec![2]);
        assert!(ids("owner:ops", &data).is_empty());
        assert_eq!(ids("owner:ADMIN", &data), vec![1, 2]);
        assert!(ids("user:ghost", &data).is_empty());
    }

    #[test]
    fn test_names_files_tags() {
        let data = fixture();
        assert_eq!(ids("category:web", &data), vec![1]);
        assert_eq!(ids("client:acme", &data), vec![1, 2]);
        assert_eq!(ids("file:SCHEMA", &data), vec![2]);
        assert_eq!(ids("tag:legacy", &data), vec![2]);
        assert!(ids("tag:missing", &data).is_empty());
        assert_eq!(ids("maingroup:admins", &data), vec![1, 2]);
    }

    #[test]
    fn test_id_and_regex() {
        let data = fixture();
        assert_eq!(ids("id:2", &data), vec![2]);
        assert!(ids("id:two", &data).is_empty());
        assert_eq!(ids("name_regex:^mail", &data), vec![1]);
        assert!(ids("name_regex:([", &data).is_empty());
    }

    #[test]
    fn test_conditions() {
        let data = fixture();
        assert_eq!(ids("is:expired", &data), vec![1]);
        assert_eq!(ids("not:expired", &data), vec![2]);
        assert_eq!(ids("is:private", &data), vec![2]);
        assert_eq!(ids("not:private", &data), vec![1]);
    }

    #[test]
    fn test_operator() {
        let data = fixture();
        assert!(ids("is:expired tag:legacy", &data).is_empty());
        assert_eq!(ids("is:expired tag:legacy op:or", &data), vec![1, 2]);
        // free text is ANDed regardless of the operator
        assert_eq!(ids("is:expired tag:legacy op:or billing", &data), vec![2]);
    }

    #[test]
    fn test_filter_fields() {
        let data = fixture();
        let mut filter = AccountSearchFilter {
            category_id: Some(2),
            ..Default::default()
        };
        assert_eq!(ids_for(&filter, &data), vec![2]);

        filter.category_id = None;
        filter.tag_ids = vec![1, 2];
        assert_eq!(ids_for(&filter, &data), vec![2]);
        filter.tags_operator = FilterOperator::Or;
        assert_eq!(ids_for(&filter, &data), vec![1, 2]);

        let mut data = data;
        data.favorites.insert(1, [1].into_iter().collect());
        let favorites = AccountSearchFilter {
            favorites_only: true,
            ..Default::default()
        };
        assert_eq!(ids_for(&favorites, &data), vec![1]);
    }
}
