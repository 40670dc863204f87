use std::sync::Arc;

use taller_core::domain::quote::Quote;
use taller_core::domain::service::Service;
use taller_core::domain::work_order::WorkOrder;
use taller_core::notify::{
    EventKind, NotificationEvent, NotificationSink, TOPIC_QUOTES, TOPIC_SERVICES,
    TOPIC_WORK_ORDERS,
};

/// Events collected while a transaction is open, published once it commits.
#[derive(Debug, Default)]
pub struct Outbox {
    pending: Vec<(&'static str, NotificationEvent)>,
}

impl Outbox {
    pub fn push(&mut self, topic: &'static str, event: NotificationEvent) {
        self.pending.push((topic, event));
    }

    pub fn service(&mut self, kind: EventKind, service: &Service) {
        self.push(
            TOPIC_SERVICES,
            NotificationEvent::new(
                kind,
                "servicio",
                service.id.0,
                &service.number,
                &service.summary(),
            ),
        );
    }

    pub fn service_status(&mut self, service: &Service, previous: &str) {
        self.push(
            TOPIC_SERVICES,
            NotificationEvent::status_changed(
                "servicio",
                service.id.0,
                &service.number,
                previous,
                &service.summary(),
            ),
        );
    }

    pub fn quote(&mut self, kind: EventKind, quote: &Quote) {
        self.push(
            TOPIC_QUOTES,
            NotificationEvent::new(
                kind,
                "presupuesto",
                quote.id.0,
                &quote.number,
                &quote.summary(),
            ),
        );
    }

    pub fn quote_status(&mut self, quote: &Quote, previous: &str) {
        self.push(
            TOPIC_QUOTES,
            NotificationEvent::status_changed(
                "presupuesto",
                quote.id.0,
                &quote.number,
                previous,
                &quote.summary(),
            ),
        );
    }

    pub fn work_order(&mut self, kind: EventKind, order: &WorkOrder) {
        self.push(
            TOPIC_WORK_ORDERS,
            NotificationEvent::new(
                kind,
                "orden_trabajo",
                order.id.0,
                &order.number,
                &order.summary(),
            ),
        );
    }

    pub fn work_order_status(&mut self, order: &WorkOrder, previous: &str) {
        self.push(
            TOPIC_WORK_ORDERS,
            NotificationEvent::status_changed(
                "orden_trabajo",
                order.id.0,
                &order.number,
                previous,
                &order.summary(),
            ),
        );
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[derive(Clone)]
pub struct Notifier {
    sink: Arc<dyn NotificationSink>,
}

impl Notifier {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }

    /// Publishes everything in `outbox`. Failures are logged; committed data stays.
    pub fn flush(&self, outbox: Outbox) {
        for (topic, event) in outbox.pending {
            let entity = event.entity.clone();
            let entity_id = event.entity_id;
            let kind = event.kind.as_str();
            if let Err(error) = self.sink.publish(topic, event) {
                tracing::warn!(
                    event_name = "notify.publish_failed",
                    topic,
                    entity = %entity,
                    entity_id,
                    kind,
                    error = %error,
                    "change notification was not delivered"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use taller_core::notify::{
        EventKind, InMemoryNotificationSink, NotificationError, NotificationEvent,
        NotificationSink, TOPIC_QUOTES, TOPIC_SERVICES,
    };

    use super::{Notifier, Outbox};

    struct RefusingSink;

    impl NotificationSink for RefusingSink {
        fn publish(&self, topic: &str, _event: NotificationEvent) -> Result<(), NotificationError> {
            Err(NotificationError::Undelivered { topic: topic.to_owned() })
        }
    }

    fn event(number: &str) -> NotificationEvent {
        NotificationEvent::new(EventKind::Updated, "presupuesto", 1, number, &json!({}))
    }

    #[test]
    fn flush_publishes_in_order() {
        let sink = InMemoryNotificationSink::default();
        let notifier = Notifier::new(Arc::new(sink.clone()));
        let mut outbox = Outbox::default();
        outbox.push(TOPIC_QUOTES, event("PRE25-00001"));
        outbox.push(TOPIC_SERVICES, event("SRV25-00001"));
        assert_eq!(outbox.len(), 2);

        notifier.flush(outbox);

        let published = sink.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].topic, TOPIC_QUOTES);
        assert_eq!(published[1].event.number, "SRV25-00001");
    }

    #[test]
    fn sink_failures_do_not_panic() {
        let notifier = Notifier::new(Arc::new(RefusingSink));
        let mut outbox = Outbox::default();
        outbox.push(TOPIC_QUOTES, event("PRE25-00001"));
        notifier.flush(outbox);
    }
}
