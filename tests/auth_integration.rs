//! Integration tests for logins and API tokens
//!
//! Tests the full flow: installed vault -> login/token services -> tracks

mod common;

use common::{setup, ADMIN_LOGIN, ADMIN_PASSWORD};
use std::net::{IpAddr, Ipv4Addr};
use syspass::acl::Permission;
use syspass::auth::{authenticate, AuthError};
use syspass::users::UserRequest;
use syspass::ItemSearch;

const IP: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

#[tokio::test]
async fn test_login_with_installed_admin() {
    let t = setup().await;

    let result = t.app.login.login(ADMIN_LOGIN, ADMIN_PASSWORD, IP).await.unwrap();
    assert_eq!(result.principal.login, ADMIN_LOGIN);
    assert!(result.principal.is_admin_app);
    assert!(!result.must_change_password);

    let user = t.app.users.get_by_login(ADMIN_LOGIN).unwrap();
    assert_eq!(user.login_count, 1);
    assert!(user.last_login.is_some());
}

#[tokio::test]
async fn test_failed_login_is_tracked() {
    let t = setup().await;

    let result = t.app.login.login(ADMIN_LOGIN, "wrong-password", IP).await;
    assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    let result = t.app.login.login("nobody", "whatever", IP).await;
    assert!(matches!(result, Err(AuthError::InvalidCredentials)));

    let tracks = t.app.tracks.list(&t.admin, &ItemSearch::all()).unwrap();
    assert_eq!(tracks.total, 2);
    assert!(tracks.items.iter().all(|track| track.ip == IP && track.source == "login"));

    let removed = t.app.tracks.clear(&t.admin).await.unwrap();
    assert_eq!(removed, 2);
}

#[tokio::test]
async fn test_disabled_user_cannot_log_in() {
    let t = setup().await;
    let group_id = t.admin.group_id;
    let profile_id = t.app.profiles.get_by_name("Standard").unwrap().id;

    let id = t
        .app
        .users
        .create(
            &t.admin,
            UserRequest {
                name: "Alice".to_string(),
                login: "alice".to_string(),
                group_id,
                profile_id,
                password: Some("alice-password".to_string()),
                is_change_pass: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let result = t.app.login.login("alice", "alice-password", IP).await.unwrap();
    assert!(result.must_change_password);
    assert!(!result.principal.is_admin());

    t.app.users.set_disabled(&t.admin, id, true).await.unwrap();
    let result = t.app.login.login("alice", "alice-password", IP).await;
    assert!(matches!(result, Err(AuthError::UserDisabled)));
    assert!(t.app.principal(id).is_none());
}

#[tokio::test]
async fn test_token_is_limited_to_its_actions() {
    let t = setup().await;
    let actions = [Permission::AccountView].into_iter().collect();

    let (token, stored) = t
        .app
        .tokens
        .create(&t.admin, t.admin.id, "reader", actions, None)
        .await
        .unwrap();
    assert!(token.starts_with("sp_"));

    let header = format!("Bearer {}", token);
    let auth = authenticate(&t.app.tokens, Some(&header), IP).await.unwrap();
    assert_eq!(auth.token_id, stored.id);
    assert!(auth.can(Permission::AccountView));
    assert!(!auth.can(Permission::AccountDelete));

    let listed = t.app.tokens.list(&t.admin).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].user_login, ADMIN_LOGIN);
    assert!(listed[0].last_used.is_some());
}

#[tokio::test]
async fn test_revoked_and_bogus_tokens_are_rejected() {
    let t = setup().await;
    let actions = [Permission::AccountView].into_iter().collect();
    let (token, stored) = t
        .app
        .tokens
        .create(&t.admin, t.admin.id, "short-lived", actions, None)
        .await
        .unwrap();

    t.app.tokens.revoke(&t.admin, stored.id).await.unwrap();
    let header = format!("Bearer {}", token);
    assert!(matches!(
        authenticate(&t.app.tokens, Some(&header), IP).await,
        Err(AuthError::InvalidToken)
    ));
    assert!(matches!(
        authenticate(&t.app.tokens, Some("Bearer sp_nope"), IP).await,
        Err(AuthError::InvalidToken)
    ));
    assert!(matches!(
        authenticate(&t.app.tokens, None, IP).await,
        Err(AuthError::MissingAuth)
    ));

    // Bad tokens count against the address, under the api source
    let tracks = t.app.tracks.list(&t.admin, &ItemSearch::all()).unwrap();
    assert!(tracks.items.iter().any(|track| track.source == "api"));
}

#[tokio::test]
async fn test_token_creation_requires_permission() {
    let t = setup().await;
    let mut user = t.admin.clone();
    user.is_admin_app = false;
    user.permissions.remove(&Permission::ManageApiTokens);

    let actions = [Permission::AccountView].into_iter().collect();
    let result = t.app.tokens.create(&user, t.admin.id, "nope", actions, None).await;
    assert!(matches!(result, Err(AuthError::Acl(_))));
}
