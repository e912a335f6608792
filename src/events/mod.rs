//! Application events
//!
//! Services describe what happened as an [`Event`] and hand it to the
//! [`EventDispatcher`], which fans it out to every attached
//! [`EventReceiver`] interested in that event name. The audit log,
//! notifications, tracing output and plugins are all receivers.

mod eventlog;
mod logger;

pub use eventlog::{EventLevel, EventLogService, EventRecord, EventlogReceiver};
pub use logger::TracingReceiver;

use crate::acl::Principal;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventError {
    #[error("Receiver {receiver} failed: {reason}")]
    Receiver { receiver: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),
}

/// Human-readable payload of an event
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventMessage {
    pub description: Vec<String>,
    pub details: Vec<(String, String)>,
}

impl EventMessage {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: vec![description.into()],
            details: Vec::new(),
        }
    }

    pub fn add_description(mut self, description: impl Into<String>) -> Self {
        self.description.push(description.into());
        self
    }

    pub fn add_detail(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.details.push((key.into(), value.to_string()));
        self
    }

    pub fn detail(&self, key: &str) -> Option<&str> {
        self.details
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Single-line rendering used by the event log
    pub fn compose(&self) -> String {
        let mut out = self.description.join("; ");
        for (key, value) in &self.details {
            if !out.is_empty() {
                out.push_str(" | ");
            }
            out.push_str(key);
            out.push_str(": ");
            out.push_str(value);
        }
        out
    }
}

/// Something that happened, e.g. `create.account` or `login.fail`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    /// Component that raised it
    pub source: String,
    pub message: EventMessage,
    pub user_id: Option<u64>,
    pub login: Option<String>,
    pub ip: Option<IpAddr>,
    pub time: DateTime<Utc>,
}

impl Event {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            message: EventMessage::default(),
            user_id: None,
            login: None,
            ip: None,
            time: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: EventMessage) -> Self {
        self.message = message;
        self
    }

    /// Attribute the event to a user. The CLI principal (id 0) stays anonymous.
    pub fn by(mut self, principal: &Principal) -> Self {
        if principal.id != 0 {
            self.user_id = Some(principal.id);
        }
        self.login = Some(principal.login.clone());
        self
    }

    pub fn from_ip(mut self, ip: IpAddr) -> Self {
        self.ip = Some(ip);
        self
    }

    /// Warnings are failures and lockouts
    pub fn is_warning(&self) -> bool {
        self.name.starts_with("track.") || self.name.ends_with(".fail")
    }
}

/// Which events a receiver wants
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    All,
    /// Exact names, or prefixes written as `track.*`
    Only(Vec<String>),
}

impl EventFilter {
    /// An empty list means everything
    pub fn from_list(names: &[String]) -> Self {
        if names.is_empty() {
            EventFilter::All
        } else {
            EventFilter::Only(names.to_vec())
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Only(names) => names.iter().any(|pattern| {
                match pattern.strip_suffix(".*") {
                    Some(prefix) => name
                        .strip_prefix(prefix)
                        .is_some_and(|rest| rest.starts_with('.')),
                    None => pattern == name,
                }
            }),
        }
    }
}

/// A subscriber to application events
#[async_trait]
pub trait EventReceiver: Send + Sync {
    /// Unique receiver name, used to detach it
    fn name(&self) -> &str;

    fn events(&self) -> EventFilter;

    async fn receive(&self, event: &Event) -> Result<(), EventError>;
}

/// Fans events out to receivers
#[derive(Default)]
pub struct EventDispatcher {
    receivers: RwLock<Vec<Arc<dyn EventReceiver>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a receiver, replacing any with the same name
    pub fn attach(&self, receiver: Arc<dyn EventReceiver>) {
        let mut receivers = self.receivers.write();
        receivers.retain(|r| r.name() != receiver.name());
        tracing::debug!(receiver = receiver.name(), "Event receiver attached");
        receivers.push(receiver);
    }

    pub fn detach(&self, name: &str) -> bool {
        let mut receivers = self.receivers.write();
        let before = receivers.len();
        receivers.retain(|r| r.name() != name);
        before != receivers.len()
    }

    pub fn receiver_names(&self) -> Vec<String> {
        self.receivers
            .read()
            .iter()
            .map(|r| r.name().to_string())
            .collect()
    }

    /// Deliver an event. Receiver failures are logged and never reach the
    /// caller.
    pub async fn dispatch(&self, event: Event) {
        let receivers: Vec<_> = self
            .receivers
            .read()
            .iter()
            .filter(|r| r.events().matches(&event.name))
            .cloned()
            .collect();

        for receiver in receivers {
            if let Err(e) = receiver.receive(&event).await {
                tracing::warn!(
                    receiver = receiver.name(),
                    event = %event.name,
                    error = %e,
                    "Event receiver failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        name: String,
        filter: EventFilter,
        seen: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn new(name: &str, filter: EventFilter) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                filter,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl EventReceiver for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn events(&self) -> EventFilter {
            self.filter.clone()
        }

        async fn receive(&self, event: &Event) -> Result<(), EventError> {
            self.seen.lock().push(event.name.clone());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl EventReceiver for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn events(&self) -> EventFilter {
            EventFilter::All
        }

        async fn receive(&self, _event: &Event) -> Result<(), EventError> {
            Err(EventError::Receiver {
                receiver: "failing".to_string(),
                reason: "boom".to_string(),
            })
        }
    }

    #[test]
    fn test_filter_matching() {
        let filter = EventFilter::Only(vec!["login.fail".to_string(), "track.*".to_string()]);
        assert!(filter.matches("login.fail"));
        assert!(filter.matches("track.delay"));
        assert!(!filter.matches("tracking"));
        assert!(!filter.matches("login.success"));
        assert_eq!(EventFilter::from_list(&[]), EventFilter::All);
    }

    #[test]
    fn test_message_compose() {
        let msg = EventMessage::new("Account created")
            .add_detail("Name", "mail")
            .add_detail("Id", 4);
        assert_eq!(msg.compose(), "Account created | Name: mail | Id: 4");
        assert_eq!(msg.detail("Id"), Some("4"));
    }

    #[tokio::test]
    async fn test_dispatch_respects_filters() {
        let dispatcher = EventDispatcher::new();
        let all = Recorder::new("all", EventFilter::All);
        let tracks = Recorder::new("tracks", EventFilter::Only(vec!["track.*".to_string()]));
        dispatcher.attach(all.clone());
        dispatcher.attach(tracks.clone());
        dispatcher.attach(Arc::new(Failing));

        dispatcher.dispatch(Event::new("track.add", "track")).await;
        dispatcher.dispatch(Event::new("login.success", "auth")).await;

        assert_eq!(*all.seen.lock(), vec!["track.add", "login.success"]);
        assert_eq!(*tracks.seen.lock(), vec!["track.add"]);
    }

    #[tokio::test]
    async fn test_attach_replaces_and_detach() {
        let dispatcher = EventDispatcher::new();
        dispatcher.attach(Recorder::new("r", EventFilter::All));
        dispatcher.attach(Recorder::new("r", EventFilter::All));
        assert_eq!(dispatcher.receiver_names(), vec!["r"]);
        assert!(dispatcher.detach("r"));
        assert!(!dispatcher.detach("r"));
    }
}
