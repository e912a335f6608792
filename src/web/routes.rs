//! Route handlers for the web UI

use askama::Template;
use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event as SseEvent, KeepAlive, KeepAliveStream, Sse},
        Html, IntoResponse, Redirect, Response,
    },
    Form, Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{Stream, StreamExt};
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::convert::Infallible;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tower_sessions::Session;

use crate::accounts::{AccountError, AccountRequest};
use crate::acl::{AclError, Permission, Principal, UserProfile};
use crate::auth::parse_expiration;
use crate::crypto::verify_password;
use crate::install::{private_dir, InstallError};
use crate::items::{Category, Client, Tag};
use crate::links::LinkError;
use crate::search::{AccountSearchFilter, SortKey, SortOrder};
use crate::server::SyspassApp;
use crate::users::UserRequest;
use crate::{ItemSearch, SyspassError};

use super::api::error_json;
use super::auth::{
    clear_password_change, clear_session, require_csrf, set_authenticated_session, user_agent,
    ClientIp, CsrfForm, RequireUser, CSRF_FIELD,
};
use super::error::WebError;
use super::templates::{
    nav, AccountFormTemplate, AccountFormValues, AccountRow, AccountViewTemplate,
    AccountsTemplate, ConfigTemplate, EventLogTemplate, FlashKind, FlashMessage, GroupRow,
    GroupsTemplate, HistoryTemplate, ItemRow, ItemsTemplate, LinksTemplate, LoginTemplate, Nav,
    NotificationsTemplate, PasswordTemplate, PluginsTemplate, ProfileRow, ProfilesTemplate,
    PublicLinkTemplate, SelectOption, TokensTemplate, TracksTemplate, UsersTemplate,
};

type AppRef = State<Arc<SyspassApp>>;
type PageResult = Result<Response, WebError>;

/// Session key for a one-shot flash message
const FLASH_KEY: &str = "syspass_flash";

fn render<T: Template>(template: T) -> Response {
    Html(template.render().unwrap_or_else(|e| format!("Template error: {}", e))).into_response()
}

async fn set_flash(session: &Session, flash: FlashMessage) {
    let value = (matches!(flash.kind, FlashKind::Success), flash.message);
    if let Err(e) = session.insert(FLASH_KEY, value).await {
        tracing::debug!(error = %e, "Could not store flash message");
    }
}

async fn take_flash(session: &Session) -> Option<FlashMessage> {
    let (ok, message): (bool, String) = session.remove(FLASH_KEY).await.ok().flatten()?;
    Some(if ok {
        FlashMessage::success(message)
    } else {
        FlashMessage::error(message)
    })
}

async fn page_nav(app: &SyspassApp, user: &RequireUser) -> Nav {
    let flash = take_flash(&user.session).await;
    nav(
        &app.config().server.site_name,
        &user.principal,
        &user.csrf_token,
        app.notifications.unread_count(&user.principal),
        flash,
    )
}

/// Flash the outcome of an action and go back to `to`
async fn finish<T, E: std::fmt::Display>(
    session: &Session,
    result: Result<T, E>,
    success: &str,
    to: &str,
) -> Response {
    let flash = match result {
        Ok(_) => FlashMessage::success(success),
        Err(e) => FlashMessage::error(e.to_string()),
    };
    set_flash(session, flash).await;
    Redirect::to(to).into_response()
}

fn checked(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty() && v != "0" && v != "false")
}

fn parse_id(value: &Option<String>) -> Option<u64> {
    value.as_deref().and_then(|v| v.trim().parse().ok())
}

fn parse_date(value: &str) -> Result<Option<DateTime<Utc>>, String> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Some(dt.and_utc()))
        .ok_or_else(|| format!("Invalid date '{}', expected YYYY-MM-DD", value))
}

fn attachment(name: &str, mime: &str, content: Vec<u8>) -> Response {
    let safe: String = name
        .chars()
        .map(|c| if c == '"' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();
    (
        [
            (header::CONTENT_TYPE, mime.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", safe),
            ),
        ],
        Body::from(content),
    )
        .into_response()
}

/// Form with nothing but the CSRF token
#[derive(Deserialize)]
pub struct Empty {}

// ============== Login/Logout ==============

pub async fn login_page(State(app): AppRef) -> impl IntoResponse {
    let template = LoginTemplate {
        site_name: app.config().server.site_name.clone(),
        error: None,
    };
    render(template)
}

#[derive(Deserialize)]
pub struct LoginForm {
    login: String,
    password: String,
}

pub async fn login_submit(
    State(app): AppRef,
    ClientIp(ip): ClientIp,
    session: Session,
    Form(form): Form<LoginForm>,
) -> Response {
    match app.login.login(form.login.trim(), &form.password, ip).await {
        Ok(result) => {
            let principal = &result.principal;
            if set_authenticated_session(
                &session,
                principal.id,
                &principal.login,
                result.must_change_password,
            )
            .await
            .is_ok()
            {
                let to = if result.must_change_password { "/password" } else { "/" };
                return Redirect::to(to).into_response();
            }
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(_) => {
            let template = LoginTemplate {
                site_name: app.config().server.site_name.clone(),
                error: Some("Invalid login or password".to_string()),
            };
            render(template)
        }
    }
}

pub async fn logout(session: Session, CsrfForm(_): CsrfForm<Empty>) -> impl IntoResponse {
    let _ = clear_session(&session).await;
    Redirect::to("/login")
}

pub async fn password_page(State(app): AppRef, user: RequireUser) -> impl IntoResponse {
    let forced = app.users.get(user.principal.id).is_some_and(|u| u.is_change_pass);
    let template = PasswordTemplate {
        nav: page_nav(&app, &user).await,
        forced,
        error: None,
    };
    render(template)
}

#[derive(Deserialize)]
pub struct PasswordForm {
    current: String,
    password: String,
    password_repeat: String,
}

pub async fn password_submit(
    State(app): AppRef,
    user: RequireUser,
    CsrfForm(form): CsrfForm<PasswordForm>,
) -> PageResult {
    let principal = &user.principal;
    let current_ok = app
        .users
        .get(principal.id)
        .is_some_and(|u| verify_password(&form.current, &u.password_hash));

    let error = if !current_ok {
        Some("The current password is wrong".to_string())
    } else if form.password != form.password_repeat {
        Some("The passwords do not match".to_string())
    } else {
        match app.users.update_password(principal, principal.id, &form.password).await {
            Ok(()) => None,
            Err(e) => Some(e.to_string()),
        }
    };

    if let Some(error) = error {
        let forced = app.users.get(principal.id).is_some_and(|u| u.is_change_pass);
        let template = PasswordTemplate {
            nav: page_nav(&app, &user).await,
            forced,
            error: Some(error),
        };
        return Ok(render(template));
    }

    if let Err(status) = clear_password_change(&user.session).await {
        return Ok(status.into_response());
    }
    set_flash(&user.session, FlashMessage::success("Password changed")).await;
    Ok(Redirect::to("/").into_response())
}

// ============== Accounts ==============

#[derive(Deserialize, Default)]
pub struct SearchParams {
    #[serde(default)]
    q: String,
    category: Option<String>,
    client: Option<String>,
    favorites: Option<String>,
    global: Option<String>,
    sort: Option<String>,
    order: Option<String>,
    #[serde(default)]
    offset: usize,
}

impl SearchParams {
    fn filter(&self) -> AccountSearchFilter {
        let sort = match self.sort.as_deref() {
            Some("name") => SortKey::Name,
            Some("category") => SortKey::Category,
            Some("login") => SortKey::Login,
            Some("url") => SortKey::Url,
            Some("client") => SortKey::Client,
            _ => SortKey::Default,
        };
        AccountSearchFilter {
            query: self.q.clone(),
            category_id: parse_id(&self.category),
            client_id: parse_id(&self.client),
            favorites_only: checked(&self.favorites),
            global_search: checked(&self.global),
            sort,
            sort_views: self.sort.as_deref() == Some("views"),
            order: if self.order.as_deref() == Some("desc") {
                SortOrder::Desc
            } else {
                SortOrder::Asc
            },
            offset: self.offset,
            ..Default::default()
        }
    }
}

fn category_options(app: &SyspassApp, selected: Option<u64>) -> Vec<SelectOption> {
    app.categories
        .all()
        .into_iter()
        .map(|c| SelectOption::new(c.id, c.name, Some(c.id) == selected))
        .collect()
}

fn client_options(app: &SyspassApp, principal: &Principal, selected: Option<u64>) -> Vec<SelectOption> {
    app.clients
        .all_for_user(principal, app.config().accounts.full_group_access)
        .into_iter()
        .map(|c| SelectOption::new(c.id, c.name, Some(c.id) == selected))
        .collect()
}

pub async fn accounts_list(
    State(app): AppRef,
    user: RequireUser,
    Query(params): Query<SearchParams>,
) -> impl IntoResponse {
    let principal = &user.principal;
    let filter = params.filter();
    let result = app.search.search(principal, &filter);
    let page_size = app.config().accounts.page_size;

    let template = AccountsTemplate {
        nav: page_nav(&app, &user).await,
        query: params.q.clone(),
        categories: category_options(&app, filter.category_id),
        clients: client_options(&app, principal, filter.client_id),
        favorites_only: filter.favorites_only,
        prev_offset: (params.offset > 0).then(|| params.offset.saturating_sub(page_size)),
        next_offset: (params.offset + page_size < result.total).then_some(params.offset + page_size),
        total: result.total,
        accounts: result.items.into_iter().map(AccountRow::from).collect(),
        can_create: principal.has(Permission::AccountCreate),
        can_global: app.config().accounts.global_search
            && principal.has(Permission::AccountGlobalSearch),
    };
    render(template)
}

pub async fn account_view(State(app): AppRef, user: RequireUser, Path(id): Path<u64>) -> PageResult {
    let principal = &user.principal;
    let account = app.accounts.view(principal, id).await?;
    let files = if account.acl.show_files {
        app.files.list(principal, id)?
    } else {
        Vec::new()
    };
    let link = if account.acl.show_link {
        app.links.get_by_account(id)
    } else {
        None
    };
    let link_url = link
        .as_ref()
        .map(|l| format!("/link/{}", l.hash))
        .unwrap_or_default();

    let template = AccountViewTemplate {
        nav: page_nav(&app, &user).await,
        account,
        files,
        link,
        link_url,
    };
    Ok(render(template))
}

pub async fn account_password(State(app): AppRef, user: RequireUser, Path(id): Path<u64>) -> Response {
    match app.accounts.view_password(&user.principal, id).await {
        Ok(password) => Json(password).into_response(),
        Err(e) => error_json(e.into()),
    }
}

#[derive(Deserialize)]
pub struct AccountForm {
    name: String,
    #[serde(default)]
    login: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    notes: String,
    category_id: u64,
    client_id: u64,
    #[serde(default)]
    tags: String,
    password: Option<String>,
    password_repeat: Option<String>,
    #[serde(default)]
    expires: String,
    is_private: Option<String>,
    is_private_group: Option<String>,
}

impl AccountForm {
    fn values(&self) -> AccountFormValues {
        AccountFormValues {
            name: self.name.clone(),
            login: self.login.clone(),
            url: self.url.clone(),
            notes: self.notes.clone(),
            tags: self.tags.clone(),
            is_private: checked(&self.is_private),
            is_private_group: checked(&self.is_private_group),
            expires: self.expires.clone(),
        }
    }

    /// Tags are given by name, comma separated
    fn request(&self, app: &SyspassApp) -> Result<AccountRequest, String> {
        let tags = self
            .tags
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(|n| {
                app.tags
                    .get_by_name(n)
                    .map(|t| t.id)
                    .ok_or_else(|| format!("Unknown tag '{}'", n))
            })
            .collect::<Result<BTreeSet<u64>, String>>()?;

        Ok(AccountRequest {
            name: self.name.clone(),
            login: self.login.clone(),
            url: self.url.clone(),
            notes: self.notes.clone(),
            category_id: self.category_id,
            client_id: self.client_id,
            password: self.password.clone().filter(|p| !p.is_empty()),
            password_expires_at: parse_date(&self.expires)?,
            is_private: checked(&self.is_private),
            is_private_group: checked(&self.is_private_group),
            tags,
            ..Default::default()
        })
    }
}

async fn form_page(
    app: &SyspassApp,
    user: &RequireUser,
    id: Option<u64>,
    form: AccountFormValues,
    category_id: Option<u64>,
    client_id: Option<u64>,
    error: Option<String>,
) -> Response {
    let (title, action) = match id {
        Some(id) => (format!("Edit {}", form.name), format!("/accounts/{}/edit", id)),
        None => ("New account".to_string(), "/accounts/new".to_string()),
    };
    let template = AccountFormTemplate {
        nav: page_nav(app, user).await,
        title,
        action,
        is_new: id.is_none(),
        categories: category_options(app, category_id),
        clients: client_options(app, &user.principal, client_id),
        form,
        error,
    };
    render(template)
}

pub async fn account_new(State(app): AppRef, user: RequireUser) -> PageResult {
    user.principal.require(Permission::AccountCreate)?;
    Ok(form_page(&app, &user, None, AccountFormValues::default(), None, None, None).await)
}

pub async fn account_create(
    State(app): AppRef,
    user: RequireUser,
    CsrfForm(form): CsrfForm<AccountForm>,
) -> Response {
    let values = form.values();
    let selected = (Some(form.category_id), Some(form.client_id));

    if form.password != form.password_repeat {
        let error = Some("The passwords do not match".to_string());
        return form_page(&app, &user, None, values, selected.0, selected.1, error).await;
    }
    let result = match form.request(&app) {
        Ok(req) => app
            .accounts
            .create(&user.principal, req)
            .await
            .map_err(|e| e.to_string()),
        Err(e) => Err(e),
    };

    match result {
        Ok(id) => {
            set_flash(&user.session, FlashMessage::success("Account created")).await;
            Redirect::to(&format!("/accounts/{}", id)).into_response()
        }
        Err(error) => form_page(&app, &user, None, values, selected.0, selected.1, Some(error)).await,
    }
}

pub async fn account_edit(State(app): AppRef, user: RequireUser, Path(id): Path<u64>) -> PageResult {
    let account = app.accounts.details(&user.principal, id)?;
    if !account.acl.show_edit {
        return Err(AclError::AccountDenied(id).into());
    }
    let values = AccountFormValues {
        name: account.name.clone(),
        login: account.login.clone(),
        url: account.url.clone(),
        notes: account.notes.clone(),
        tags: account.tags.join(", "),
        is_private: account.is_private,
        is_private_group: account.is_private_group,
        expires: account
            .password_expires_at
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
    };
    let (category_id, client_id) = (Some(account.category_id), Some(account.client_id));
    Ok(form_page(&app, &user, Some(id), values, category_id, client_id, None).await)
}

pub async fn account_update(
    State(app): AppRef,
    user: RequireUser,
    Path(id): Path<u64>,
    CsrfForm(form): CsrfForm<AccountForm>,
) -> PageResult {
    // The form does not edit shares; carry the current ones over
    let (users, groups, parent_id) = {
        let data = app.store().read();
        let account = data.accounts.get(id).ok_or(AccountError::NotFound(id))?;
        (account.users.clone(), account.groups.clone(), account.parent_id)
    };

    let result = match form.request(&app) {
        Ok(mut req) => {
            req.password = None;
            req.users = users;
            req.groups = groups;
            req.parent_id = parent_id;
            app.accounts
                .update(&user.principal, id, req)
                .await
                .map_err(|e| e.to_string())
        }
        Err(e) => Err(e),
    };

    Ok(match result {
        Ok(()) => {
            set_flash(&user.session, FlashMessage::success("Account updated")).await;
            Redirect::to(&format!("/accounts/{}", id)).into_response()
        }
        Err(error) => {
            let (category, client) = (Some(form.category_id), Some(form.client_id));
            form_page(&app, &user, Some(id), form.values(), category, client, Some(error)).await
        }
    })
}

#[derive(Deserialize)]
pub struct AccountPasswordForm {
    password: String,
    password_repeat: String,
    #[serde(default)]
    expires: String,
}

pub async fn account_password_update(
    State(app): AppRef,
    user: RequireUser,
    Path(id): Path<u64>,
    CsrfForm(form): CsrfForm<AccountPasswordForm>,
) -> Response {
    let to = format!("/accounts/{}", id);
    if form.password.is_empty() || form.password != form.password_repeat {
        set_flash(&user.session, FlashMessage::error("The passwords do not match")).await;
        return Redirect::to(&to).into_response();
    }
    let result = match parse_date(&form.expires) {
        Ok(expires) => app
            .accounts
            .update_password(&user.principal, id, &form.password, expires)
            .await
            .map_err(|e| e.to_string()),
        Err(e) => Err(e),
    };
    finish(&user.session, result, "Password changed", &to).await
}

pub async fn account_delete(
    State(app): AppRef,
    user: RequireUser,
    Path(id): Path<u64>,
    CsrfForm(_): CsrfForm<Empty>,
) -> Response {
    let result = app.accounts.delete(&user.principal, id).await;
    let to = if result.is_ok() { "/".to_string() } else { format!("/accounts/{}", id) };
    finish(&user.session, result, "Account deleted", &to).await
}

pub async fn account_duplicate(
    State(app): AppRef,
    user: RequireUser,
    Path(id): Path<u64>,
    CsrfForm(_): CsrfForm<Empty>,
) -> Response {
    match app.accounts.duplicate(&user.principal, id).await {
        Ok(copy) => {
            set_flash(&user.session, FlashMessage::success("Account duplicated")).await;
            Redirect::to(&format!("/accounts/{}/edit", copy)).into_response()
        }
        Err(e) => finish::<(), _>(&user.session, Err(e), "", &format!("/accounts/{}", id)).await,
    }
}

pub async fn account_favorite(
    State(app): AppRef,
    user: RequireUser,
    Path(id): Path<u64>,
    CsrfForm(_): CsrfForm<Empty>,
) -> Response {
    let result = app.accounts.toggle_favorite(&user.principal, id).await;
    let message = match result {
        Ok(true) => "Added to favorites",
        _ => "Removed from favorites",
    };
    finish(&user.session, result, message, &format!("/accounts/{}", id)).await
}

pub async fn account_history(State(app): AppRef, user: RequireUser, Path(id): Path<u64>) -> PageResult {
    let account = app.accounts.details(&user.principal, id)?;
    let entries = app.accounts.history(&user.principal, id)?;
    let template = HistoryTemplate {
        nav: page_nav(&app, &user).await,
        title: format!("History of {}", account.name),
        entries,
    };
    Ok(render(template))
}

pub async fn deleted_accounts(State(app): AppRef, user: RequireUser) -> PageResult {
    let entries = app.accounts.deleted_history(&user.principal)?;
    let template = HistoryTemplate {
        nav: page_nav(&app, &user).await,
        title: "Deleted accounts".to_string(),
        entries,
    };
    Ok(render(template))
}

pub async fn history_restore(
    State(app): AppRef,
    user: RequireUser,
    Path(history_id): Path<u64>,
    CsrfForm(_): CsrfForm<Empty>,
) -> Response {
    match app.accounts.restore(&user.principal, history_id).await {
        Ok(id) => {
            set_flash(&user.session, FlashMessage::success("Account restored")).await;
            Redirect::to(&format!("/accounts/{}", id)).into_response()
        }
        Err(e) => finish::<(), _>(&user.session, Err(e), "", "/").await,
    }
}

// ============== Files ==============

pub async fn file_upload(
    State(app): AppRef,
    user: RequireUser,
    Path(id): Path<u64>,
    mut multipart: Multipart,
) -> Response {
    let mut token = String::new();
    let mut upload: Option<(String, String, Vec<u8>)> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return e.into_response(),
        };
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some(CSRF_FIELD) => token = field.text().await.unwrap_or_default(),
            Some("file") => {
                let name = field.file_name().unwrap_or_default().to_string();
                let mime = field.content_type().unwrap_or_default().to_string();
                match field.bytes().await {
                    Ok(bytes) => upload = Some((name, mime, bytes.to_vec())),
                    Err(e) => return e.into_response(),
                }
            }
            _ => {}
        }
    }

    if let Err(rejection) = require_csrf(&user.session, &token).await {
        return rejection;
    }
    let to = format!("/accounts/{}", id);
    let Some((name, mime, content)) = upload else {
        set_flash(&user.session, FlashMessage::error("No file selected")).await;
        return Redirect::to(&to).into_response();
    };
    let result = app.files.upload(&user.principal, id, &name, &mime, content).await;
    finish(&user.session, result, "File uploaded", &to).await
}

pub async fn file_download(State(app): AppRef, user: RequireUser, Path(id): Path<u64>) -> PageResult {
    let file = app.files.download(&user.principal, id).await?;
    Ok(attachment(&file.name, &file.mime, file.content))
}

pub async fn file_delete(
    State(app): AppRef,
    user: RequireUser,
    Path(id): Path<u64>,
    CsrfForm(_): CsrfForm<Empty>,
) -> Response {
    let account_id = app.store().read().files.get(id).map(|f| f.account_id);
    let to = account_id.map(|a| format!("/accounts/{}", a)).unwrap_or_else(|| "/".to_string());
    let result = app.files.delete(&user.principal, id).await;
    finish(&user.session, result, "File deleted", &to).await
}

// ============== Public links ==============

#[derive(Deserialize)]
pub struct LinkForm {
    notify: Option<String>,
}

pub async fn link_create(
    State(app): AppRef,
    user: RequireUser,
    Path(account_id): Path<u64>,
    CsrfForm(form): CsrfForm<LinkForm>,
) -> Response {
    let result = app.links.create(&user.principal, account_id, checked(&form.notify)).await;
    finish(&user.session, result, "Public link created", &format!("/accounts/{}", account_id)).await
}

pub async fn links_list(State(app): AppRef, user: RequireUser) -> PageResult {
    let links = app.links.search(&user.principal, &ItemSearch::all())?.items;
    let template = LinksTemplate {
        nav: page_nav(&app, &user).await,
        links,
    };
    Ok(render(template))
}

fn link_return(app: &SyspassApp, principal: &Principal, id: u64) -> String {
    match app.links.get(id) {
        Some(_) if principal.has(Permission::ManagePublicLinks) => "/links".to_string(),
        Some(link) => format!("/accounts/{}", link.account_id),
        None => "/".to_string(),
    }
}

pub async fn link_refresh(
    State(app): AppRef,
    user: RequireUser,
    Path(id): Path<u64>,
    CsrfForm(_): CsrfForm<Empty>,
) -> Response {
    let to = link_return(&app, &user.principal, id);
    let result = app.links.refresh(&user.principal, id).await;
    finish(&user.session, result, "Public link renewed", &to).await
}

pub async fn link_delete(
    State(app): AppRef,
    user: RequireUser,
    Path(id): Path<u64>,
    CsrfForm(_): CsrfForm<Empty>,
) -> Response {
    let to = link_return(&app, &user.principal, id);
    let result = app.links.delete(&user.principal, id).await;
    finish(&user.session, result, "Public link deleted", &to).await
}

/// Anonymous access through a link hash
pub async fn public_link(
    State(app): AppRef,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    Path(hash): Path<String>,
) -> Response {
    let agent = user_agent(&headers);
    let site_name = app.config().server.site_name.clone();

    match app.links.view_by_hash(&hash, ip, agent.as_deref()).await {
        Ok(account) => render(PublicLinkTemplate {
            site_name,
            account: Some(account),
            error: None,
        }),
        Err(e) => {
            let status = match e {
                LinkError::Expired => StatusCode::GONE,
                LinkError::Disabled => StatusCode::FORBIDDEN,
                LinkError::NotFound => StatusCode::NOT_FOUND,
                _ => {
                    tracing::error!(error = %e, "Public link failed");
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            let template = PublicLinkTemplate {
                site_name,
                account: None,
                error: Some(e.to_string()),
            };
            (status, render(template)).into_response()
        }
    }
}

// ============== Categories, clients, tags ==============

#[derive(Deserialize)]
pub struct ItemForm {
    name: String,
    description: Option<String>,
    is_global: Option<String>,
}

impl ItemForm {
    fn description(&self) -> Option<String> {
        self.description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string)
    }
}

async fn items_page(
    app: &SyspassApp,
    user: &RequireUser,
    title: &str,
    base: &str,
    has_description: bool,
    items: Vec<ItemRow>,
) -> Response {
    let template = ItemsTemplate {
        nav: page_nav(app, user).await,
        title: title.to_string(),
        base: base.to_string(),
        has_description,
        items,
    };
    render(template)
}

pub async fn categories_list(State(app): AppRef, user: RequireUser) -> PageResult {
    let items = app
        .categories
        .search(&user.principal, &ItemSearch::all())?
        .items
        .into_iter()
        .map(|c| ItemRow {
            id: c.id,
            name: c.name,
            description: c.description.unwrap_or_default(),
        })
        .collect();
    Ok(items_page(&app, &user, "Categories", "/categories", true, items).await)
}

pub async fn category_create(
    State(app): AppRef,
    user: RequireUser,
    CsrfForm(form): CsrfForm<ItemForm>,
) -> Response {
    let category = Category::new(&form.name, form.description());
    let result = app.categories.create(&user.principal, category).await;
    finish(&user.session, result, "Category created", "/categories").await
}

pub async fn category_delete(
    State(app): AppRef,
    user: RequireUser,
    Path(id): Path<u64>,
    CsrfForm(_): CsrfForm<Empty>,
) -> Response {
    let result = app.categories.delete(&user.principal, id).await;
    finish(&user.session, result, "Category deleted", "/categories").await
}

pub async fn clients_list(State(app): AppRef, user: RequireUser) -> PageResult {
    let items = app
        .clients
        .search(&user.principal, &ItemSearch::all())?
        .items
        .into_iter()
        .map(|c| ItemRow {
            id: c.id,
            description: match (c.description, c.is_global) {
                (Some(d), true) => format!("{} (global)", d),
                (Some(d), false) => d,
                (None, true) => "(global)".to_string(),
                (None, false) => String::new(),
            },
            name: c.name,
        })
        .collect();
    Ok(items_page(&app, &user, "Clients", "/clients", true, items).await)
}

pub async fn client_create(
    State(app): AppRef,
    user: RequireUser,
    CsrfForm(form): CsrfForm<ItemForm>,
) -> Response {
    let client = Client::new(&form.name, form.description(), checked(&form.is_global));
    let result = app.clients.create(&user.principal, client).await;
    finish(&user.session, result, "Client created", "/clients").await
}

pub async fn client_delete(
    State(app): AppRef,
    user: RequireUser,
    Path(id): Path<u64>,
    CsrfForm(_): CsrfForm<Empty>,
) -> Response {
    let result = app.clients.delete(&user.principal, id).await;
    finish(&user.session, result, "Client deleted", "/clients").await
}

pub async fn tags_list(State(app): AppRef, user: RequireUser) -> PageResult {
    let items = app
        .tags
        .search(&user.principal, &ItemSearch::all())?
        .items
        .into_iter()
        .map(|t| ItemRow {
            id: t.id,
            name: t.name,
            description: String::new(),
        })
        .collect();
    Ok(items_page(&app, &user, "Tags", "/tags", false, items).await)
}

pub async fn tag_create(
    State(app): AppRef,
    user: RequireUser,
    CsrfForm(form): CsrfForm<ItemForm>,
) -> Response {
    let result = app.tags.create(&user.principal, Tag::new(&form.name)).await;
    finish(&user.session, result, "Tag created", "/tags").await
}

pub async fn tag_delete(
    State(app): AppRef,
    user: RequireUser,
    Path(id): Path<u64>,
    CsrfForm(_): CsrfForm<Empty>,
) -> Response {
    let result = app.tags.delete(&user.principal, id).await;
    finish(&user.session, result, "Tag deleted", "/tags").await
}

// ============== Users, groups, profiles ==============

pub async fn users_list(State(app): AppRef, user: RequireUser) -> PageResult {
    let users = app.users.search(&user.principal, &ItemSearch::all())?.items;
    let groups = app
        .groups
        .all()
        .into_iter()
        .map(|g| SelectOption::new(g.id, g.name, false))
        .collect();
    let profiles = app
        .profiles
        .all()
        .into_iter()
        .map(|p| SelectOption::new(p.id, p.name, false))
        .collect();

    let template = UsersTemplate {
        nav: page_nav(&app, &user).await,
        users,
        groups,
        profiles,
    };
    Ok(render(template))
}

#[derive(Deserialize)]
pub struct UserForm {
    name: String,
    login: String,
    email: Option<String>,
    group_id: u64,
    profile_id: u64,
    password: String,
    is_admin_app: Option<String>,
    is_admin_acc: Option<String>,
    is_change_pass: Option<String>,
}

pub async fn user_create(
    State(app): AppRef,
    user: RequireUser,
    CsrfForm(form): CsrfForm<UserForm>,
) -> Response {
    let req = UserRequest {
        name: form.name,
        login: form.login,
        email: form.email.filter(|e| !e.trim().is_empty()),
        notes: None,
        group_id: form.group_id,
        profile_id: form.profile_id,
        password: Some(form.password),
        is_admin_app: checked(&form.is_admin_app),
        is_admin_acc: checked(&form.is_admin_acc),
        is_change_pass: checked(&form.is_change_pass),
    };
    let result = app.users.create(&user.principal, req).await;
    finish(&user.session, result, "User created", "/users").await
}

pub async fn user_toggle(
    State(app): AppRef,
    user: RequireUser,
    Path(id): Path<u64>,
    CsrfForm(_): CsrfForm<Empty>,
) -> Response {
    let disabled = app.users.get(id).is_some_and(|u| u.is_disabled);
    let result = app.users.set_disabled(&user.principal, id, !disabled).await;
    let message = if disabled { "User enabled" } else { "User disabled" };
    finish(&user.session, result, message, "/users").await
}

pub async fn user_delete(
    State(app): AppRef,
    user: RequireUser,
    Path(id): Path<u64>,
    CsrfForm(_): CsrfForm<Empty>,
) -> Response {
    let result = app.users.delete(&user.principal, id).await;
    finish(&user.session, result, "User deleted", "/users").await
}

pub async fn groups_list(State(app): AppRef, user: RequireUser) -> PageResult {
    let groups = app
        .groups
        .search(&user.principal, &ItemSearch::all())?
        .items
        .into_iter()
        .map(|g| GroupRow {
            id: g.id,
            members: g.members.len(),
            name: g.name,
            description: g.description.unwrap_or_default(),
        })
        .collect();
    let template = GroupsTemplate {
        nav: page_nav(&app, &user).await,
        groups,
    };
    Ok(render(template))
}

pub async fn group_create(
    State(app): AppRef,
    user: RequireUser,
    CsrfForm(form): CsrfForm<ItemForm>,
) -> Response {
    let result = app
        .groups
        .create(&user.principal, &form.name, form.description())
        .await;
    finish(&user.session, result, "Group created", "/groups").await
}

pub async fn group_delete(
    State(app): AppRef,
    user: RequireUser,
    Path(id): Path<u64>,
    CsrfForm(_): CsrfForm<Empty>,
) -> Response {
    let result = app.groups.delete(&user.principal, id).await;
    finish(&user.session, result, "Group deleted", "/groups").await
}

fn permission_names() -> Vec<&'static str> {
    Permission::all().iter().map(|p| p.as_str()).collect()
}

pub async fn profiles_list(State(app): AppRef, user: RequireUser) -> PageResult {
    let profiles = app
        .profiles
        .search(&user.principal, &ItemSearch::all())?
        .items
        .into_iter()
        .map(|p| ProfileRow {
            id: p.id,
            permissions: p
                .permissions
                .iter()
                .map(|perm| perm.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            name: p.name,
        })
        .collect();
    let template = ProfilesTemplate {
        nav: page_nav(&app, &user).await,
        profiles,
        permissions: permission_names(),
    };
    Ok(render(template))
}

#[derive(Deserialize)]
pub struct ProfileForm {
    name: String,
    #[serde(default)]
    permissions: String,
}

pub async fn profile_create(
    State(app): AppRef,
    user: RequireUser,
    CsrfForm(form): CsrfForm<ProfileForm>,
) -> Response {
    let result = match Permission::parse_many(&form.permissions) {
        Ok(permissions) => app
            .profiles
            .create(&user.principal, UserProfile::new(form.name.trim(), permissions))
            .await
            .map_err(|e| e.to_string()),
        Err(e) => Err(e),
    };
    finish(&user.session, result, "Profile created", "/profiles").await
}

pub async fn profile_delete(
    State(app): AppRef,
    user: RequireUser,
    Path(id): Path<u64>,
    CsrfForm(_): CsrfForm<Empty>,
) -> Response {
    let result = app.profiles.delete(&user.principal, id).await;
    finish(&user.session, result, "Profile deleted", "/profiles").await
}

// ============== API tokens ==============

async fn tokens_page(app: &SyspassApp, user: &RequireUser, new_token: Option<String>) -> PageResult {
    let principal = &user.principal;
    let tokens = app.tokens.list(principal)?;
    let users = match app.users.search(principal, &ItemSearch::all()) {
        Ok(found) => found
            .items
            .into_iter()
            .map(|u| SelectOption::new(u.id, u.login, u.id == principal.id))
            .collect(),
        Err(_) => vec![SelectOption::new(principal.id, principal.login.clone(), true)],
    };
    let template = TokensTemplate {
        nav: page_nav(app, user).await,
        tokens,
        users,
        permissions: permission_names(),
        new_token,
    };
    Ok(render(template))
}

pub async fn tokens_list(State(app): AppRef, user: RequireUser) -> PageResult {
    tokens_page(&app, &user, None).await
}

#[derive(Deserialize)]
pub struct TokenForm {
    name: String,
    user_id: u64,
    #[serde(default)]
    actions: String,
    #[serde(default)]
    expires: String,
}

pub async fn token_create(
    State(app): AppRef,
    user: RequireUser,
    CsrfForm(form): CsrfForm<TokenForm>,
) -> PageResult {
    let parsed = Permission::parse_many(&form.actions)
        .and_then(|actions| parse_expiration(&form.expires).map(|exp| (actions, exp)));
    let (actions, expires_in) = match parsed {
        Ok(parsed) => parsed,
        Err(e) => return Ok(finish::<(), _>(&user.session, Err(e), "", "/tokens").await),
    };

    match app
        .tokens
        .create(&user.principal, form.user_id, &form.name, actions, expires_in)
        .await
    {
        Ok((token, _)) => tokens_page(&app, &user, Some(token)).await,
        Err(e) => Ok(finish::<(), _>(&user.session, Err(e), "", "/tokens").await),
    }
}

pub async fn token_revoke(
    State(app): AppRef,
    user: RequireUser,
    Path(id): Path<u64>,
    CsrfForm(_): CsrfForm<Empty>,
) -> Response {
    let result = app.tokens.revoke(&user.principal, id).await;
    finish(&user.session, result, "API token revoked", "/tokens").await
}

// ============== Event log ==============

#[derive(Deserialize, Default)]
pub struct LogParams {
    #[serde(default)]
    q: String,
    #[serde(default)]
    offset: usize,
}

pub async fn eventlog(
    State(app): AppRef,
    user: RequireUser,
    Query(params): Query<LogParams>,
) -> PageResult {
    let search = ItemSearch {
        text: Some(params.q.clone()),
        limit: None,
        offset: params.offset,
    };
    let result = app.eventlog.search(&user.principal, &search)?;
    let template = EventLogTemplate {
        nav: page_nav(&app, &user).await,
        query: params.q,
        total: result.total,
        events: result.items,
    };
    Ok(render(template))
}

pub async fn eventlog_clear(
    State(app): AppRef,
    user: RequireUser,
    CsrfForm(_): CsrfForm<Empty>,
) -> Response {
    let result = app.eventlog.clear(&user.principal).await;
    finish(&user.session, result, "Event log cleared", "/eventlog").await
}

// ============== Notifications ==============

pub async fn notifications_list(State(app): AppRef, user: RequireUser) -> impl IntoResponse {
    let template = NotificationsTemplate {
        notifications: app.notifications.for_user(&user.principal),
        nav: page_nav(&app, &user).await,
    };
    render(template)
}

pub async fn notification_read(
    State(app): AppRef,
    user: RequireUser,
    Path(id): Path<u64>,
    CsrfForm(_): CsrfForm<Empty>,
) -> Response {
    let result = app.notifications.mark_read(&user.principal, id).await;
    finish(&user.session, result, "Marked as read", "/notifications").await
}

pub async fn notification_delete(
    State(app): AppRef,
    user: RequireUser,
    Path(id): Path<u64>,
    CsrfForm(_): CsrfForm<Empty>,
) -> Response {
    let result = app.notifications.delete(&user.principal, id).await;
    finish(&user.session, result, "Notification deleted", "/notifications").await
}

// ============== Tracks ==============

pub async fn tracks_list(State(app): AppRef, user: RequireUser) -> PageResult {
    let tracks = app.tracks.list(&user.principal, &ItemSearch::all())?.items;
    let template = TracksTemplate {
        nav: page_nav(&app, &user).await,
        tracks,
    };
    Ok(render(template))
}

pub async fn track_unlock(
    State(app): AppRef,
    user: RequireUser,
    Path(id): Path<u64>,
    CsrfForm(_): CsrfForm<Empty>,
) -> Response {
    let result = app.tracks.unlock(&user.principal, id).await;
    finish(&user.session, result, "Track unlocked", "/tracks").await
}

pub async fn tracks_clear(
    State(app): AppRef,
    user: RequireUser,
    CsrfForm(_): CsrfForm<Empty>,
) -> Response {
    let result = app.tracks.clear(&user.principal).await;
    finish(&user.session, result, "Tracks cleared", "/tracks").await
}

// ============== Plugins ==============

pub async fn plugins_list(State(app): AppRef, user: RequireUser) -> PageResult {
    let plugins = app.plugins.list(&user.principal)?;
    let template = PluginsTemplate {
        nav: page_nav(&app, &user).await,
        plugins,
    };
    Ok(render(template))
}

pub async fn plugin_enable(
    State(app): AppRef,
    user: RequireUser,
    Path(name): Path<String>,
    CsrfForm(_): CsrfForm<Empty>,
) -> Response {
    let result = app.plugins.enable(&user.principal, &name).await;
    finish(&user.session, result, "Plugin enabled", "/plugins").await
}

pub async fn plugin_disable(
    State(app): AppRef,
    user: RequireUser,
    Path(name): Path<String>,
    CsrfForm(_): CsrfForm<Empty>,
) -> Response {
    let result = app.plugins.disable(&user.principal, &name).await;
    finish(&user.session, result, "Plugin disabled", "/plugins").await
}

// ============== Tasks ==============

type TaskStream = Pin<Box<dyn Stream<Item = Result<SseEvent, Infallible>> + Send>>;

/// Server-sent progress of a background task
pub async fn task_status(
    State(app): AppRef,
    user: RequireUser,
    Path(id): Path<String>,
) -> Result<Sse<KeepAliveStream<TaskStream>>, WebError> {
    match app.tasks.info(&id) {
        Ok(info) if info.uid != user.principal.id && !user.principal.is_admin() => {
            return Err(AclError::AdminRequired.into());
        }
        Ok(_) => {}
        // Already finished: only the final status is left
        Err(crate::tasks::TaskError::NotFound(_)) => user.principal.require_admin()?,
        Err(e) => return Err(e.into()),
    }

    let stream: TaskStream = Box::pin(app.tasks.track_status(&id).map(|message| {
        let json = serde_json::to_string(&message).unwrap_or_default();
        Ok(SseEvent::default().event("status").data(json))
    }));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// ============== Configuration ==============

fn exports_dir(app: &SyspassApp) -> PathBuf {
    app.config().storage.exports_dir.clone()
}

fn valid_export_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[derive(Deserialize, Default)]
pub struct ConfigParams {
    task: Option<String>,
}

pub async fn config_page(
    State(app): AppRef,
    user: RequireUser,
    Query(params): Query<ConfigParams>,
) -> PageResult {
    user.principal.require(Permission::ConfigGeneral)?;

    let mut exports = Vec::new();
    if user.principal.has(Permission::ConfigBackup) {
        if let Ok(mut entries) = tokio::fs::read_dir(exports_dir(&app)).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                if let Some(name) = entry.file_name().to_str() {
                    exports.push(name.to_string());
                }
            }
        }
        exports.sort_unstable_by(|a, b| b.cmp(a));
    }

    let template = ConfigTemplate {
        nav: page_nav(&app, &user).await,
        upgrade: app.upgrade.check(),
        task_id: params.task,
        exports,
    };
    Ok(render(template))
}

#[derive(Deserialize)]
pub struct MasterPasswordForm {
    current: String,
    password: String,
    password_repeat: String,
}

pub async fn masterpass_change(
    State(app): AppRef,
    user: RequireUser,
    CsrfForm(form): CsrfForm<MasterPasswordForm>,
) -> PageResult {
    user.principal.require(Permission::ConfigEncryption)?;
    if form.password != form.password_repeat {
        set_flash(&user.session, FlashMessage::error("The passwords do not match")).await;
        return Ok(Redirect::to("/config").into_response());
    }

    let task = app.tasks.create("masterpass", user.principal.id)?;
    let task_id = task.id().to_string();
    let principal = user.principal.clone();
    let worker = app.clone();
    tokio::spawn(async move {
        let current = SecretString::from(form.current);
        let new = SecretString::from(form.password);
        if let Err(e) = worker.masterpass.change(&principal, &current, &new, Some(task)).await {
            tracing::warn!(error = %e, "Master password change failed");
        }
    });

    Ok(Redirect::to(&format!("/config?task={}", task_id)).into_response())
}

#[derive(Deserialize)]
pub struct ExportForm {
    #[serde(default)]
    password: String,
}

pub async fn export_run(
    State(app): AppRef,
    user: RequireUser,
    CsrfForm(form): CsrfForm<ExportForm>,
) -> PageResult {
    user.principal.require(Permission::ConfigBackup)?;

    let dir = exports_dir(&app);
    private_dir(&dir).await.map_err(InstallError::from)?;

    let task = app.tasks.create("export", user.principal.id)?;
    let task_id = task.id().to_string();
    let path = dir.join(format!(
        "syspass-export-{}.json",
        Utc::now().format("%Y%m%d-%H%M%S")
    ));
    let principal = user.principal.clone();
    let worker = app.clone();
    tokio::spawn(async move {
        let password = (!form.password.is_empty()).then(|| SecretString::from(form.password));
        if let Err(e) = worker
            .export
            .export(&principal, &path, password.as_ref(), Some(task))
            .await
        {
            tracing::warn!(error = %e, "Export failed");
        }
    });

    Ok(Redirect::to(&format!("/config?task={}", task_id)).into_response())
}

pub async fn export_download(
    State(app): AppRef,
    user: RequireUser,
    Path(name): Path<String>,
) -> PageResult {
    user.principal.require(Permission::ConfigBackup)?;
    if !valid_export_name(&name) {
        return Err(SyspassError::Task(crate::tasks::TaskError::NotFound(name)).into());
    }
    let content = tokio::fs::read(exports_dir(&app).join(&name))
        .await
        .map_err(|_| SyspassError::Task(crate::tasks::TaskError::NotFound(name.clone())))?;
    Ok(attachment(&name, "application/json", content))
}

pub async fn upgrade_run(
    State(app): AppRef,
    user: RequireUser,
    CsrfForm(_): CsrfForm<Empty>,
) -> Response {
    let result = app.upgrade.run(&user.principal).await;
    finish(&user.session, result, "Upgrade recorded", "/config").await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("").unwrap(), None);
        let date = parse_date("2030-01-31").unwrap().unwrap();
        assert_eq!(date.format("%Y-%m-%d").to_string(), "2030-01-31");
        assert!(parse_date("31/01/2030").is_err());
    }

    #[test]
    fn test_checkbox_values() {
        assert!(checked(&Some("on".to_string())));
        assert!(!checked(&Some(String::new())));
        assert!(!checked(&None));
    }

    #[test]
    fn test_export_names() {
        assert!(valid_export_name("syspass-export-20300101-000000.json"));
        assert!(!valid_export_name("../vault.enc"));
        assert!(!valid_export_name(".hidden"));
        assert!(!valid_export_name("a/b"));
    }

    #[test]
    fn test_search_params_filter() {
        let params = SearchParams {
            q: "user:admin".to_string(),
            category: Some("3".to_string()),
            client: Some(String::new()),
            sort: Some("views".to_string()),
            ..Default::default()
        };
        let filter = params.filter();
        assert_eq!(filter.category_id, Some(3));
        assert_eq!(filter.client_id, None);
        assert!(filter.sort_views);
    }
}
