use super::{Event, EventError, EventFilter, EventReceiver};
use async_trait::async_trait;

/// Mirrors every event into the tracing output
#[derive(Debug, Default)]
pub struct TracingReceiver;

#[async_trait]
impl EventReceiver for TracingReceiver {
    fn name(&self) -> &str {
        "tracing"
    }

    fn events(&self) -> EventFilter {
        EventFilter::All
    }

    async fn receive(&self, event: &Event) -> Result<(), EventError> {
        let login = event.login.as_deref().unwrap_or("-");
        let ip = event.ip.map(|ip| ip.to_string()).unwrap_or_default();
        let message = event.message.compose();

        if event.is_warning() {
            tracing::warn!(event = %event.name, source = %event.source, user = login, ip = %ip, "{}", message);
        } else {
            tracing::info!(event = %event.name, source = %event.source, user = login, ip = %ip, "{}", message);
        }
        Ok(())
    }
}
