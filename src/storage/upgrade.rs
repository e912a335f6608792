//! Vault schema migrations
//!
//! Migrations run on the decrypted JSON before it is decoded into
//! [`VaultData`](super::VaultData), so old layouts never need to be
//! representable by the current types.

use super::StorageError;
use serde_json::{Map, Value};

/// Schema version written by this build
pub const SCHEMA_VERSION: u32 = 3;

/// A single schema step, from `from` to `from + 1`
pub struct Migration {
    pub from: u32,
    pub description: &'static str,
    pub up: fn(&mut Value) -> Result<(), String>,
}

/// All migrations in order
pub fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            from: 1,
            description: "Rename customers to clients",
            up: rename_customers_to_clients,
        },
        Migration {
            from: 2,
            description: "Merge track ipv4/ipv6 columns into a single ip",
            up: merge_track_addresses,
        },
    ]
}

/// Apply every migration needed to bring `value` from `from` up to
/// [`SCHEMA_VERSION`]. Returns the version reached.
pub fn migrate(value: &mut Value, from: u32) -> Result<u32, StorageError> {
    if from > SCHEMA_VERSION {
        return Err(StorageError::UnsupportedVersion {
            found: from,
            supported: SCHEMA_VERSION,
        });
    }

    let mut version = from;
    for migration in all_migrations() {
        if migration.from != version {
            continue;
        }
        (migration.up)(value).map_err(|reason| StorageError::Migration {
            version: migration.from + 1,
            reason,
        })?;
        tracing::debug!(to = migration.from + 1, "{}", migration.description);
        version = migration.from + 1;
    }

    if version != SCHEMA_VERSION {
        return Err(StorageError::Migration {
            version,
            reason: format!("no migration path from version {}", version),
        });
    }
    Ok(version)
}

fn root(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "vault root is not an object".to_string())
}

fn rename_customers_to_clients(value: &mut Value) -> Result<(), String> {
    let root = root(value)?;
    if let Some(customers) = root.remove("customers") {
        root.insert("clients".to_string(), customers);
    }

    // Accounts referenced their client as customer_id
    if let Some(rows) = root
        .get_mut("accounts")
        .and_then(|t| t.get_mut("rows"))
        .and_then(Value::as_object_mut)
    {
        for account in rows.values_mut() {
            if let Some(obj) = account.as_object_mut() {
                if let Some(id) = obj.remove("customer_id") {
                    obj.insert("client_id".to_string(), id);
                }
            }
        }
    }
    Ok(())
}

fn merge_track_addresses(value: &mut Value) -> Result<(), String> {
    let root = root(value)?;
    let Some(rows) = root
        .get_mut("tracks")
        .and_then(|t| t.get_mut("rows"))
        .and_then(Value::as_object_mut)
    else {
        return Ok(());
    };

    for (id, track) in rows.iter_mut() {
        let obj = track
            .as_object_mut()
            .ok_or_else(|| format!("track {} is not an object", id))?;
        let v4 = obj.remove("ipv4").filter(|v| !v.is_null());
        let v6 = obj.remove("ipv6").filter(|v| !v.is_null());
        if !obj.contains_key("ip") {
            let ip = v4
                .or(v6)
                .ok_or_else(|| format!("track {} has no address", id))?;
            obj.insert("ip".to_string(), ip);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_current_version_is_noop() {
        let mut value = json!({"clients": {"next_id": 0, "rows": {}}});
        let before = value.clone();
        assert_eq!(migrate(&mut value, SCHEMA_VERSION).unwrap(), SCHEMA_VERSION);
        assert_eq!(value, before);
    }

    #[test]
    fn test_migrates_from_v1() {
        let mut value = json!({
            "customers": {"next_id": 1, "rows": {"1": {"id": 1, "name": "ACME"}}},
            "accounts": {"next_id": 1, "rows": {"1": {"id": 1, "customer_id": 1}}},
            "tracks": {"next_id": 2, "rows": {
                "1": {"id": 1, "ipv4": "10.0.0.1", "ipv6": null},
                "2": {"id": 2, "ipv4": null, "ipv6": "::1"}
            }}
        });

        assert_eq!(migrate(&mut value, 1).unwrap(), 3);
        assert!(value.get("customers").is_none());
        assert_eq!(value["clients"]["rows"]["1"]["name"], "ACME");
        assert_eq!(value["accounts"]["rows"]["1"]["client_id"], 1);
        assert_eq!(value["tracks"]["rows"]["1"]["ip"], "10.0.0.1");
        assert_eq!(value["tracks"]["rows"]["2"]["ip"], "::1");
        assert!(value["tracks"]["rows"]["1"].get("ipv4").is_none());
    }

    #[test]
    fn test_track_without_address_fails() {
        let mut value = json!({"tracks": {"next_id": 1, "rows": {"1": {"id": 1}}}});
        assert!(matches!(
            migrate(&mut value, 2),
            Err(StorageError::Migration { version: 3, .. })
        ));
    }

    #[test]
    fn test_newer_vault_rejected() {
        let mut value = json!({});
        assert!(matches!(
            migrate(&mut value, SCHEMA_VERSION + 1),
            Err(StorageError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn test_unknown_old_version_rejected() {
        let mut value = json!({});
        assert!(migrate(&mut value, 0).is_err());
    }
}
