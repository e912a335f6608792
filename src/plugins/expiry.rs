//! Built-in plugin: tell users about expired account passwords at login

use super::{Plugin, PluginContext, PluginError};
use crate::events::Event;
use async_trait::async_trait;
use chrono::Utc;

pub struct ExpiryNotifier;

impl ExpiryNotifier {
    pub const NAME: &'static str = "expiry-notifier";

    pub fn new() -> Self {
        Self
    }
}

impl Default for ExpiryNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for ExpiryNotifier {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn events(&self) -> Vec<&str> {
        vec!["login.success"]
    }

    async fn on_event(&self, event: &Event, ctx: &PluginContext) -> Result<(), PluginError> {
        let Some(user_id) = event.user_id else {
            return Ok(());
        };

        let now = Utc::now();
        let expired: Vec<String> = ctx
            .store()
            .read()
            .accounts
            .values()
            .filter(|a| a.owner_id == user_id && a.is_expired(now))
            .map(|a| a.name.clone())
            .collect();
        if expired.is_empty() {
            return Ok(());
        }

        // One reminder per user per day
        let today = now.date_naive().to_string();
        let mut data = ctx.get_data();
        if !data.is_object() {
            data = serde_json::json!({});
        }
        let key = user_id.to_string();
        if data.get(&key).and_then(|v| v.as_str()) == Some(today.as_str()) {
            return Ok(());
        }

        let description = format!(
            "{} account password(s) have expired: {}",
            expired.len(),
            expired.join(", ")
        );
        ctx.notify(user_id, description).await?;

        data[key] = serde_json::Value::String(today);
        ctx.set_data(data).await?;
        tracing::debug!(user_id, expired = expired.len(), "Expired password reminder sent");
        Ok(())
    }
}
