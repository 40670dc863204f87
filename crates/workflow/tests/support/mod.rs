#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;

use taller_core::auth::{Principal, Role};
use taller_core::delivery::{PlainTextReceiptRenderer, RecordingMailer};
use taller_core::domain::quote::{LineDraft, PriceVariant, Quote};
use taller_core::domain::service::{IntakeType, Service, ServiceId};
use taller_core::domain::token::{ApprovalToken, TokenAction};
use taller_core::notify::{InMemoryNotificationSink, NotificationSink};
use taller_db::{connect_with_settings, migrations, DbPool};
use taller_workflow::{QuoteDraft, SentQuote, ServiceIntake, Workshop, WorkshopSettings};

pub const BASE_URL: &str = "https://taller.example.com";

pub struct Harness {
    pub workshop: Workshop,
    pub sink: InMemoryNotificationSink,
    pub mailer: RecordingMailer,
}

pub async fn pool() -> DbPool {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("run migrations");
    pool
}

pub async fn harness() -> Harness {
    harness_with(RecordingMailer::default()).await
}

pub async fn harness_with(mailer: RecordingMailer) -> Harness {
    let sink = InMemoryNotificationSink::default();
    let workshop = workshop_with(Arc::new(sink.clone()), mailer.clone()).await;
    Harness { workshop, sink, mailer }
}

pub async fn workshop_with(sink: Arc<dyn NotificationSink>, mailer: RecordingMailer) -> Workshop {
    Workshop::new(
        pool().await,
        sink,
        Arc::new(mailer),
        Arc::new(PlainTextReceiptRenderer),
        WorkshopSettings::new(format!("{BASE_URL}/")),
    )
}

/// A workshop over a migrated database file in `dir`, served by several pooled connections.
pub async fn file_workshop(dir: &Path, connections: u32) -> Workshop {
    let url = format!("sqlite://{}", dir.join("taller.db").display());
    let pool = connect_with_settings(&url, connections, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("run migrations");
    Workshop::new(
        pool,
        Arc::new(InMemoryNotificationSink::default()),
        Arc::new(RecordingMailer::default()),
        Arc::new(PlainTextReceiptRenderer),
        WorkshopSettings::new(BASE_URL),
    )
}

pub fn staff(role: Role) -> Principal {
    let username = match role {
        Role::Admin => "admin",
        Role::Technician => "tecnico",
        Role::Receptionist => "recepcion",
    };
    Principal { username: username.to_owned(), role, employee_id: 7 }
}

pub fn number(prefix: &str, sequence: u32) -> String {
    format!("{prefix}{:02}-{sequence:05}", Utc::now().year() % 100)
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub fn intake() -> ServiceIntake {
    ServiceIntake {
        client_id: 41,
        equipment_id: 52,
        intake_type: IntakeType::Counter,
        problem_description: Some("no enciende".to_owned()),
        intake_signature: Some("firma-cliente".to_owned()),
        original_service_id: None,
        visit_fee: None,
        visit_fee_paid: false,
        received_on: today(),
        expected_return_on: Some(today() + Duration::days(7)),
    }
}

pub fn warranty_intake(original: ServiceId) -> ServiceIntake {
    ServiceIntake { original_service_id: Some(original), ..intake() }
}

pub fn quote_draft() -> QuoteDraft {
    QuoteDraft {
        diagnosis: Some("fuente quemada".to_owned()),
        labor: Decimal::new(5_000, 2),
        requested_on: Some(today()),
        expires_on: Some(today() + Duration::days(10)),
        show_original: true,
        show_alternative: true,
    }
}

pub fn line(description: &str, quantity: u32, original: i64, alternative: Option<i64>) -> LineDraft {
    LineDraft {
        description: description.to_owned(),
        quantity,
        original_price: Decimal::new(original, 2),
        alternative_price: alternative.map(|price| Decimal::new(price, 2)),
    }
}

/// Registers a service and takes one quote with a single two-unit line all the way to
/// ENVIADO. Totals: 250.00 original, 210.00 alternative.
pub async fn sent_quote(harness: &Harness) -> (Service, SentQuote) {
    let workshop = &harness.workshop;
    let reception = staff(Role::Receptionist);
    let technician = staff(Role::Technician);

    let service = workshop.register_service(&reception, intake()).await.expect("register");
    let quote = workshop
        .create_quote(&technician, service.id, quote_draft())
        .await
        .expect("create quote");
    workshop
        .add_quote_line(&technician, quote.id, line("fuente", 2, 10_000, Some(8_000)))
        .await
        .expect("add line");
    workshop.start_quote(&technician, quote.id).await.expect("start");
    workshop.mark_quote_ready(&technician, quote.id).await.expect("ready");
    let sent = workshop
        .send_quote(&technician, quote.id, "cliente@example.com")
        .await
        .expect("send");
    (service, sent)
}

pub async fn token_for(
    workshop: &Workshop,
    quote: &Quote,
    action: TokenAction,
    variant: Option<PriceVariant>,
) -> ApprovalToken {
    workshop
        .tokens_for_quote(quote.id)
        .await
        .expect("tokens")
        .into_iter()
        .find(|token| token.action == action && token.variant == variant)
        .expect("token for action and variant")
}

/// Runs a full repair so the returned service is TERMINADO.
pub async fn finished_service(harness: &Harness) -> Service {
    let workshop = &harness.workshop;
    let technician = staff(Role::Technician);
    let (service, sent) = sent_quote(harness).await;
    let approve = token_for(workshop, &sent.quote, TokenAction::Approve, Some(PriceVariant::Original)).await;
    workshop.confirm_with_token(&approve.token, None).await.expect("approve");
    let order = workshop.create_work_order(&technician, sent.quote.id).await.expect("order");
    workshop.start_work_order(&technician, order.id).await.expect("start order");
    workshop.finish_work_order(&technician, order.id).await.expect("finish order");
    workshop.get_service(service.id).await.expect("service")
}
