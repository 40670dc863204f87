use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const TOPIC_SERVICES: &str = "/topic/servicios";
pub const TOPIC_QUOTES: &str = "/topic/presupuestos";
pub const TOPIC_WORK_ORDERS: &str = "/topic/ordenes-trabajo";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "CREADO")]
    Created,
    #[serde(rename = "ACTUALIZADO")]
    Updated,
    #[serde(rename = "ESTADO_CAMBIADO")]
    StatusChanged,
    #[serde(rename = "ELIMINADO")]
    Deleted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREADO",
            Self::Updated => "ACTUALIZADO",
            Self::StatusChanged => "ESTADO_CAMBIADO",
            Self::Deleted => "ELIMINADO",
        }
    }
}

/// Change notice pushed to connected clients. `payload` is the list-view projection of
/// the entity after the change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub event_id: String,
    pub kind: EventKind,
    pub entity: String,
    pub entity_id: i64,
    pub number: String,
    pub previous_status: Option<String>,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new<P: Serialize>(
        kind: EventKind,
        entity: impl Into<String>,
        entity_id: i64,
        number: impl Into<String>,
        payload: &P,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            kind,
            entity: entity.into(),
            entity_id,
            number: number.into(),
            previous_status: None,
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
            occurred_at: Utc::now(),
        }
    }

    pub fn status_changed<P: Serialize>(
        entity: impl Into<String>,
        entity_id: i64,
        number: impl Into<String>,
        previous_status: &str,
        payload: &P,
    ) -> Self {
        let mut event = Self::new(EventKind::StatusChanged, entity, entity_id, number, payload);
        event.previous_status = Some(previous_status.to_owned());
        event
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NotificationError {
    #[error("no subscriber accepted the event on {topic}")]
    Undelivered { topic: String },
    #[error("notification transport failed: {0}")]
    Transport(String),
}

pub trait NotificationSink: Send + Sync {
    fn publish(&self, topic: &str, event: NotificationEvent) -> Result<(), NotificationError>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct PublishedNotification {
    pub topic: String,
    pub event: NotificationEvent,
}

#[derive(Clone, Default)]
pub struct InMemoryNotificationSink {
    events: Arc<Mutex<Vec<PublishedNotification>>>,
}

impl InMemoryNotificationSink {
    pub fn published(&self) -> Vec<PublishedNotification> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn on_topic(&self, topic: &str) -> Vec<NotificationEvent> {
        self.published()
            .into_iter()
            .filter(|published| published.topic == topic)
            .map(|published| published.event)
            .collect()
    }
}

impl NotificationSink for InMemoryNotificationSink {
    fn publish(&self, topic: &str, event: NotificationEvent) -> Result<(), NotificationError> {
        let published = PublishedNotification { topic: topic.to_owned(), event };
        match self.events.lock() {
            Ok(mut events) => events.push(published),
            Err(poisoned) => poisoned.into_inner().push(published),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::notify::{
        EventKind, InMemoryNotificationSink, NotificationEvent, NotificationSink, TOPIC_QUOTES,
        TOPIC_SERVICES,
    };

    #[test]
    fn in_memory_sink_keeps_topic_and_previous_status() {
        let sink = InMemoryNotificationSink::default();
        sink.publish(
            TOPIC_QUOTES,
            NotificationEvent::status_changed(
                "presupuesto",
                7,
                "PRE25-00007",
                "ENVIADO",
                &json!({ "estado": "APROBADO" }),
            ),
        )
        .expect("in-memory publish");
        sink.publish(
            TOPIC_SERVICES,
            NotificationEvent::new(EventKind::Created, "servicio", 1, "SRV25-00001", &json!({})),
        )
        .expect("in-memory publish");

        let quotes = sink.on_topic(TOPIC_QUOTES);
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].kind, EventKind::StatusChanged);
        assert_eq!(quotes[0].previous_status.as_deref(), Some("ENVIADO"));
        assert_eq!(quotes[0].payload["estado"], "APROBADO");
        assert_eq!(sink.published().len(), 2);
    }

    #[test]
    fn event_kind_serializes_to_wire_names() {
        let encoded = serde_json::to_string(&EventKind::StatusChanged).expect("serialize");
        assert_eq!(encoded, "\"ESTADO_CAMBIADO\"");
        assert_eq!(EventKind::Deleted.as_str(), "ELIMINADO");
    }
}
