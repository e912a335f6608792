//! Askama HTML templates for the web UI

use askama::Template;

use crate::accounts::{AccountView, FileInfo, HistoryEntry};
use crate::acl::Principal;
use crate::auth::AuthTokenInfo;
use crate::events::EventRecord;
use crate::install::UpgradeStatus;
use crate::links::{LinkSummary, LinkedAccount, PublicLink};
use crate::notifications::Notification;
use crate::plugins::PluginInfo;
use crate::search::AccountSearchItem;
use crate::track::Track;
use crate::users::UserSummary;

/// Flash message for displaying notifications
#[derive(Debug, Clone)]
pub struct FlashMessage {
    pub kind: FlashKind,
    pub message: String,
}

impl FlashMessage {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: FlashKind::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: FlashKind::Error,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum FlashKind {
    Success,
    Error,
}

impl FlashKind {
    pub fn as_class(&self) -> &'static str {
        match self {
            FlashKind::Success => "flash-success",
            FlashKind::Error => "flash-error",
        }
    }
}

/// Header data shared by every logged-in page
#[derive(Debug, Clone)]
pub struct Nav {
    pub site_name: String,
    pub user: String,
    pub csrf_token: String,
    pub unread: usize,
    pub is_admin: bool,
    pub flash: Option<FlashMessage>,
}

/// An entry of a `<select>`
#[derive(Debug, Clone)]
pub struct SelectOption {
    pub id: u64,
    pub name: String,
    pub selected: bool,
}

impl SelectOption {
    pub fn new(id: u64, name: impl Into<String>, selected: bool) -> Self {
        Self {
            id,
            name: name.into(),
            selected,
        }
    }
}

// ============== Login / errors ==============

#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginTemplate {
    pub site_name: String,
    pub error: Option<String>,
}

#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorTemplate {
    pub status: u16,
    pub message: String,
}

#[derive(Template)]
#[template(path = "password.html")]
pub struct PasswordTemplate {
    pub nav: Nav,
    pub forced: bool,
    pub error: Option<String>,
}

// ============== Accounts ==============

/// One search result row
#[derive(Debug, Clone)]
pub struct AccountRow {
    pub id: u64,
    pub name: String,
    pub login: String,
    pub url: String,
    pub category: String,
    pub client: String,
    pub tags: String,
    pub is_favorite: bool,
    pub is_private: bool,
    pub password_expired: bool,
    pub has_public_link: bool,
    pub restricted: bool,
    pub can_view: bool,
    pub can_view_pass: bool,
    pub can_edit: bool,
}

impl From<AccountSearchItem> for AccountRow {
    fn from(item: AccountSearchItem) -> Self {
        Self {
            id: item.id,
            name: item.name,
            login: item.login,
            url: item.url,
            category: item.category,
            client: item.client,
            tags: item.tags.join(", "),
            is_favorite: item.is_favorite,
            is_private: item.is_private || item.is_private_group,
            password_expired: item.password_expired,
            has_public_link: item.has_public_link,
            restricted: item.restricted,
            can_view: item.acl.show_view,
            can_view_pass: item.acl.show_view_pass,
            can_edit: item.acl.show_edit,
        }
    }
}

#[derive(Template)]
#[template(path = "accounts/list.html")]
pub struct AccountsTemplate {
    pub nav: Nav,
    pub query: String,
    pub categories: Vec<SelectOption>,
    pub clients: Vec<SelectOption>,
    pub favorites_only: bool,
    pub accounts: Vec<AccountRow>,
    pub total: usize,
    pub prev_offset: Option<usize>,
    pub next_offset: Option<usize>,
    pub can_create: bool,
    pub can_global: bool,
}

#[derive(Template)]
#[template(path = "accounts/view.html")]
pub struct AccountViewTemplate {
    pub nav: Nav,
    pub account: AccountView,
    pub files: Vec<FileInfo>,
    pub link: Option<PublicLink>,
    pub link_url: String,
}

impl AccountViewTemplate {
    fn grants(list: &[(String, bool)]) -> String {
        list.iter()
            .map(|(name, can_edit)| {
                if *can_edit {
                    format!("{} (edit)", name)
                } else {
                    name.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn shared_users(&self) -> String {
        Self::grants(&self.account.users)
    }

    pub fn shared_groups(&self) -> String {
        Self::grants(&self.account.groups)
    }
}

/// Values of the create/edit form
#[derive(Debug, Clone, Default)]
pub struct AccountFormValues {
    pub name: String,
    pub login: String,
    pub url: String,
    pub notes: String,
    pub tags: String,
    pub is_private: bool,
    pub is_private_group: bool,
    pub expires: String,
}

#[derive(Template)]
#[template(path = "accounts/form.html")]
pub struct AccountFormTemplate {
    pub nav: Nav,
    pub title: String,
    pub action: String,
    pub is_new: bool,
    pub form: AccountFormValues,
    pub categories: Vec<SelectOption>,
    pub clients: Vec<SelectOption>,
    pub error: Option<String>,
}

#[derive(Template)]
#[template(path = "accounts/history.html")]
pub struct HistoryTemplate {
    pub nav: Nav,
    pub title: String,
    pub entries: Vec<HistoryEntry>,
}

#[derive(Template)]
#[template(path = "link.html")]
pub struct PublicLinkTemplate {
    pub site_name: String,
    pub account: Option<LinkedAccount>,
    pub error: Option<String>,
}

#[derive(Template)]
#[template(path = "links.html")]
pub struct LinksTemplate {
    pub nav: Nav,
    pub links: Vec<LinkSummary>,
}

// ============== Categories, clients, tags ==============

#[derive(Debug, Clone)]
pub struct ItemRow {
    pub id: u64,
    pub name: String,
    pub description: String,
}

#[derive(Template)]
#[template(path = "items.html")]
pub struct ItemsTemplate {
    pub nav: Nav,
    pub title: String,
    pub base: String,
    pub has_description: bool,
    pub items: Vec<ItemRow>,
}

// ============== Users, groups, profiles ==============

#[derive(Template)]
#[template(path = "users.html")]
pub struct UsersTemplate {
    pub nav: Nav,
    pub users: Vec<UserSummary>,
    pub groups: Vec<SelectOption>,
    pub profiles: Vec<SelectOption>,
}

#[derive(Debug, Clone)]
pub struct GroupRow {
    pub id: u64,
    pub name: String,
    pub description: String,
    pub members: usize,
}

#[derive(Template)]
#[template(path = "groups.html")]
pub struct GroupsTemplate {
    pub nav: Nav,
    pub groups: Vec<GroupRow>,
}

#[derive(Debug, Clone)]
pub struct ProfileRow {
    pub id: u64,
    pub name: String,
    pub permissions: String,
}

#[derive(Template)]
#[template(path = "profiles.html")]
pub struct ProfilesTemplate {
    pub nav: Nav,
    pub profiles: Vec<ProfileRow>,
    pub permissions: Vec<&'static str>,
}

// ============== Tokens, log, notifications, tracks, plugins ==============

#[derive(Template)]
#[template(path = "tokens.html")]
pub struct TokensTemplate {
    pub nav: Nav,
    pub tokens: Vec<AuthTokenInfo>,
    pub users: Vec<SelectOption>,
    pub permissions: Vec<&'static str>,
    /// Shown once right after creation
    pub new_token: Option<String>,
}

#[derive(Template)]
#[template(path = "eventlog.html")]
pub struct EventLogTemplate {
    pub nav: Nav,
    pub query: String,
    pub total: usize,
    pub events: Vec<EventRecord>,
}

#[derive(Template)]
#[template(path = "notifications.html")]
pub struct NotificationsTemplate {
    pub nav: Nav,
    pub notifications: Vec<Notification>,
}

#[derive(Template)]
#[template(path = "tracks.html")]
pub struct TracksTemplate {
    pub nav: Nav,
    pub tracks: Vec<Track>,
}

#[derive(Template)]
#[template(path = "plugins.html")]
pub struct PluginsTemplate {
    pub nav: Nav,
    pub plugins: Vec<PluginInfo>,
}

// ============== Configuration ==============

#[derive(Template)]
#[template(path = "config.html")]
pub struct ConfigTemplate {
    pub nav: Nav,
    pub upgrade: UpgradeStatus,
    /// A running task to follow
    pub task_id: Option<String>,
    pub exports: Vec<String>,
}

/// Build the shared header for `principal`
pub fn nav(
    site_name: &str,
    principal: &Principal,
    csrf_token: &str,
    unread: usize,
    flash: Option<FlashMessage>,
) -> Nav {
    Nav {
        site_name: site_name.to_string(),
        user: principal.name.clone(),
        csrf_token: csrf_token.to_string(),
        unread,
        is_admin: principal.is_admin(),
        flash,
    }
}
