//! Fan-out of change notifications to connected listeners.
//!
//! Events go onto a tokio broadcast channel. When `notifications.relay_url` is set, a
//! relay task forwards every event as JSON to that webhook.

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use taller_core::notify::{NotificationError, NotificationEvent, NotificationSink};

const RELAY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TopicEvent {
    pub topic: String,
    pub event: NotificationEvent,
}

#[derive(Clone)]
pub struct EventHub {
    sender: broadcast::Sender<TopicEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TopicEvent> {
        self.sender.subscribe()
    }

    pub fn subscribers(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Forwards every event to `url` until the hub is dropped.
    pub fn spawn_relay(&self, url: String) -> JoinHandle<()> {
        let mut receiver = self.subscribe();
        let client = Client::new();
        info!(event_name = "notify.relay_started", url = %url, "notification relay started");

        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(published) => relay(&client, &url, &published).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            event_name = "notify.relay_lagged",
                            skipped,
                            "notification relay fell behind, events dropped"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

async fn relay(client: &Client, url: &str, published: &TopicEvent) {
    let outcome = client
        .post(url)
        .timeout(RELAY_TIMEOUT)
        .json(published)
        .send()
        .await
        .and_then(|response| response.error_for_status());

    if let Err(error) = outcome {
        warn!(
            event_name = "notify.relay_failed",
            topic = %published.topic,
            event_id = %published.event.event_id,
            error = %error,
            "notification relay request failed"
        );
    }
}

impl NotificationSink for EventHub {
    fn publish(&self, topic: &str, event: NotificationEvent) -> Result<(), NotificationError> {
        let published = TopicEvent { topic: topic.to_owned(), event };
        // No listener is not a failure; the event simply has nobody to reach.
        if self.sender.send(published).is_err() {
            debug!(event_name = "notify.no_subscribers", topic, "event published without listeners");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use taller_core::notify::{
        EventKind, NotificationEvent, NotificationSink, TOPIC_QUOTES, TOPIC_SERVICES,
    };

    use super::EventHub;

    #[tokio::test]
    async fn subscribers_receive_events_with_their_topic() {
        let hub = EventHub::new(8);
        let mut receiver = hub.subscribe();

        hub.publish(
            TOPIC_SERVICES,
            NotificationEvent::new(EventKind::Created, "servicio", 1, "SRV25-00001", &json!({})),
        )
        .expect("publish");
        hub.publish(
            TOPIC_QUOTES,
            NotificationEvent::status_changed("presupuesto", 2, "PRE25-00002", "ENVIADO", &json!({})),
        )
        .expect("publish");

        let first = receiver.recv().await.expect("first event");
        let second = receiver.recv().await.expect("second event");
        assert_eq!(first.topic, TOPIC_SERVICES);
        assert_eq!(first.event.kind, EventKind::Created);
        assert_eq!(second.topic, TOPIC_QUOTES);
        assert_eq!(second.event.previous_status.as_deref(), Some("ENVIADO"));
    }

    #[test]
    fn publishing_without_listeners_succeeds() {
        let hub = EventHub::new(4);
        assert_eq!(hub.subscribers(), 0);

        let result = hub.publish(
            TOPIC_SERVICES,
            NotificationEvent::new(EventKind::Deleted, "servicio", 3, "SRV25-00003", &json!({})),
        );

        assert!(result.is_ok());
    }
}
