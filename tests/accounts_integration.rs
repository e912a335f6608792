//! Integration tests for accounts, search, public links and admin tasks

mod common;

use common::{setup, MASTER_PASSWORD};
use secrecy::SecretString;
use std::net::{IpAddr, Ipv4Addr};
use syspass::accounts::{AccountError, AccountRequest, HistoryReason};
use syspass::acl::Principal;
use syspass::install::ExportDocument;
use syspass::links::LinkError;
use syspass::search::AccountSearchFilter;
use syspass::users::UserRequest;

const VISITOR: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7));

#[tokio::test]
async fn test_account_lifecycle() {
    let t = setup().await;
    let id = t.account("web01", "s3cret-pw").await;

    let view = t.app.accounts.view(&t.admin, id).await.unwrap();
    assert_eq!(view.name, "web01");
    assert_eq!(view.category, "Servers");
    assert_eq!(view.client, "ACME");
    assert_eq!(view.owner, "Administrator");

    let password = t.app.accounts.view_password(&t.admin, id).await.unwrap();
    assert_eq!(password.password, "s3cret-pw");
    assert_eq!(password.login, "root");
    let view = t.app.accounts.details(&t.admin, id).unwrap();
    assert_eq!(view.decrypt_count, 1);

    let copy = t.app.accounts.duplicate(&t.admin, id).await.unwrap();
    assert_ne!(copy, id);
    let copied = t.app.accounts.view_password(&t.admin, copy).await.unwrap();
    assert_eq!(copied.password, "s3cret-pw");

    t.app.accounts.delete(&t.admin, id).await.unwrap();
    let result = t.app.accounts.view(&t.admin, id).await;
    assert!(matches!(result, Err(AccountError::NotFound(_))));
}

#[tokio::test]
async fn test_search_by_text_and_field() {
    let t = setup().await;
    t.account("web01", "pw-one-11").await;
    t.account("web02", "pw-two-22").await;
    t.account("db01", "pw-three-33").await;

    let result = t
        .app
        .search
        .search(&t.admin, &AccountSearchFilter::query("web"));
    assert_eq!(result.total, 2);
    assert!(result.items.iter().all(|item| item.name.starts_with("web")));

    let result = t
        .app
        .search
        .search(&t.admin, &AccountSearchFilter::query("client:ACME"));
    assert_eq!(result.total, 3);

    let result = t
        .app
        .search
        .search(&t.admin, &AccountSearchFilter::query("client:Nobody"));
    assert_eq!(result.total, 0);
}

#[tokio::test]
async fn test_private_account_hidden_from_group() {
    let t = setup().await;
    let (category_id, client_id) = t.reference_items().await;
    let profile_id = t.app.profiles.get_by_name("Standard").unwrap().id;
    let bob_id = t
        .app
        .users
        .create(
            &t.admin,
            UserRequest {
                name: "Bob".to_string(),
                login: "bob".to_string(),
                group_id: t.admin.group_id,
                profile_id,
                password: Some("bob-password".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let bob = t.app.principal(bob_id).unwrap();

    let shared = t.account("shared", "team-pass-1").await;
    let private = t
        .app
        .accounts
        .create(
            &t.admin,
            AccountRequest {
                name: "private".to_string(),
                category_id,
                client_id,
                password: Some("mine-only-1".to_string()),
                is_private: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let result = t.app.search.search(&bob, &AccountSearchFilter::default());
    let ids: Vec<u64> = result.items.iter().map(|item| item.id).collect();
    assert_eq!(ids, vec![shared]);

    assert!(t.app.accounts.view(&bob, private).await.is_err());
    assert!(t.app.accounts.view(&bob, shared).await.is_ok());
}

async fn standard_user(t: &common::TestApp, login: &str) -> Principal {
    let profile_id = t.app.profiles.get_by_name("Standard").unwrap().id;
    let id = t
        .app
        .users
        .create(
            &t.admin,
            UserRequest {
                name: login.to_string(),
                login: login.to_string(),
                group_id: t.admin.group_id,
                profile_id,
                password: Some(format!("{}-password", login)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    t.app.principal(id).unwrap()
}

fn linked_request(category_id: u64, client_id: u64, parent_id: Option<u64>) -> AccountRequest {
    AccountRequest {
        name: "linked".to_string(),
        category_id,
        client_id,
        password: Some("unused-own-pw".to_string()),
        parent_id,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_linked_account_uses_parent_password() {
    let t = setup().await;
    let (category_id, client_id) = t.reference_items().await;
    let parent = t.account("parent", "parent-pass-1").await;

    let linked = t
        .app
        .accounts
        .create(&t.admin, linked_request(category_id, client_id, Some(parent)))
        .await
        .unwrap();
    let password = t.app.accounts.view_password(&t.admin, linked).await.unwrap();
    assert_eq!(password.password, "parent-pass-1");

    // A group member who can decrypt the parent may link to it
    let carol = standard_user(&t, "carol").await;
    let own = t
        .app
        .accounts
        .create(&carol, linked_request(category_id, client_id, Some(parent)))
        .await
        .unwrap();
    let password = t.app.accounts.view_password(&carol, own).await.unwrap();
    assert_eq!(password.password, "parent-pass-1");
}

#[tokio::test]
async fn test_cannot_link_to_hidden_parent() {
    let t = setup().await;
    let (category_id, client_id) = t.reference_items().await;
    let secret = t
        .app
        .accounts
        .create(
            &t.admin,
            AccountRequest {
                name: "secret".to_string(),
                category_id,
                client_id,
                password: Some("TOP-SECRET-1".to_string()),
                is_private: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let bob = standard_user(&t, "bob").await;
    assert!(t.app.accounts.view_password(&bob, secret).await.is_err());

    let result = t
        .app
        .accounts
        .create(&bob, linked_request(category_id, client_id, Some(secret)))
        .await;
    assert!(matches!(result, Err(AccountError::Acl(_))));

    // Nor by editing an existing account of his own
    let own = t
        .app
        .accounts
        .create(&bob, linked_request(category_id, client_id, None))
        .await
        .unwrap();
    let result = t
        .app
        .accounts
        .update(&bob, own, linked_request(category_id, client_id, Some(secret)))
        .await;
    assert!(matches!(result, Err(AccountError::Acl(_))));

    let password = t.app.accounts.view_password(&bob, own).await.unwrap();
    assert_eq!(password.password, "unused-own-pw");
}

#[tokio::test]
async fn test_history_and_restore() {
    let t = setup().await;
    let id = t.account("web01", "s3cret-pw").await;
    let original = t.app.accounts.details(&t.admin, id).unwrap();

    t.app
        .accounts
        .update(
            &t.admin,
            id,
            AccountRequest {
                name: "web01-renamed".to_string(),
                login: "admin".to_string(),
                category_id: original.category_id,
                client_id: original.client_id,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let history = t.app.accounts.history(&t.admin, id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].reason, HistoryReason::Modified);
    assert_eq!(history[0].name, "web01");

    let restored = t.app.accounts.restore(&t.admin, history[0].id).await.unwrap();
    assert_eq!(restored, id);
    let view = t.app.accounts.details(&t.admin, id).unwrap();
    assert_eq!(view.name, "web01");
    assert_eq!(view.login, "root");

    // Deleted accounts come back under their old id
    t.app.accounts.delete(&t.admin, id).await.unwrap();
    let deleted = t.app.accounts.deleted_history(&t.admin).unwrap();
    assert_eq!(deleted.len(), 1);
    let restored = t.app.accounts.restore(&t.admin, deleted[0].id).await.unwrap();
    assert_eq!(restored, id);
    assert!(t.app.accounts.details(&t.admin, id).is_ok());
}

#[tokio::test]
async fn test_public_link_view_limit() {
    let t = setup().await;
    let id = t.account("web01", "s3cret-pw").await;

    let link = t.app.links.create(&t.admin, id, true).await.unwrap();
    assert_eq!(link.max_views, 3);
    assert!(matches!(
        t.app.links.create(&t.admin, id, false).await,
        Err(LinkError::AlreadyExists(_))
    ));

    for _ in 0..3 {
        let shown = t
            .app
            .links
            .view_by_hash(&link.hash, VISITOR, Some("curl/8"))
            .await
            .unwrap();
        assert_eq!(shown.name, "web01");
        assert_eq!(shown.password, "s3cret-pw");
    }
    let result = t.app.links.view_by_hash(&link.hash, VISITOR, None).await;
    assert!(matches!(result, Err(LinkError::Expired)));

    let stored = t.app.links.get(link.id).unwrap();
    assert_eq!(stored.total_views, 3);
    assert_eq!(stored.use_info.len(), 3);

    let refreshed = t.app.links.refresh(&t.admin, link.id).await.unwrap();
    assert_ne!(refreshed.hash, link.hash);
    assert!(t
        .app
        .links
        .view_by_hash(&refreshed.hash, VISITOR, None)
        .await
        .is_ok());

    let result = t.app.links.view_by_hash("not-a-hash", VISITOR, None).await;
    assert!(matches!(result, Err(LinkError::NotFound)));
}

#[tokio::test]
async fn test_master_password_change_with_task() {
    let t = setup().await;
    let id = t.account("web01", "s3cret-pw").await;

    let task = t.app.tasks.create("masterpass", t.admin.id).unwrap();
    let task_id = task.id().to_string();
    let changed = t
        .app
        .masterpass
        .change(
            &t.admin,
            &SecretString::from(MASTER_PASSWORD.to_string()),
            &SecretString::from("brand-new-master".to_string()),
            Some(task),
        )
        .await
        .unwrap();
    assert!(changed >= 1);

    let status = t.app.tasks.read_status(&task_id).unwrap().unwrap();
    assert!(status.end);
    assert!(t.app.store().verify_master("brand-new-master"));

    let password = t.app.accounts.view_password(&t.admin, id).await.unwrap();
    assert_eq!(password.password, "s3cret-pw");

    // The same password again is refused
    let result = t
        .app
        .masterpass
        .change(
            &t.admin,
            &SecretString::from("brand-new-master".to_string()),
            &SecretString::from("brand-new-master".to_string()),
            None,
        )
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_plain_export() {
    let t = setup().await;
    t.account("web01", "s3cret-pw").await;
    t.account("db01", "other-pw-1").await;

    let dir = t.app.config().storage.exports_dir.clone();
    syspass::install::private_dir(&dir).await.unwrap();
    let path = dir.join("backup.json");
    let count = t.app.export.export(&t.admin, &path, None, None).await.unwrap();
    assert_eq!(count, 2);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0, "export readable by others: {:o}", mode);
        let mode = std::fs::metadata(&dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0);
    }

    let bytes = std::fs::read(&path).unwrap();
    let document: ExportDocument = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(document.accounts.len(), 2);
    assert_eq!(document.categories.len(), 1);
    assert!(document
        .accounts
        .iter()
        .any(|a| a.name == "web01" && a.password == "s3cret-pw"));
}
