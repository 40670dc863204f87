//! Work orders: created from an approved quote (or an accepted warranty claim) and
//! driven PENDIENTE -> EN_PROGRESO -> TERMINADA, echoing each step into the service.

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::SqliteConnection;

use taller_core::auth::Principal;
use taller_core::domain::part::PartId;
use taller_core::domain::quote::{QuoteId, QuoteStatus};
use taller_core::domain::work_order::{WorkOrder, WorkOrderId, WorkOrderStatus};
use taller_core::errors::{ApplicationError, DomainError};
use taller_core::flows::{
    Lifecycle, ServiceEvent, ServiceStatusMachine, WorkOrderEvent, WorkOrderStatusMachine,
};
use taller_core::notify::EventKind;
use taller_core::numbering::{current_year, DocumentKind};
use taller_db::repositories::{
    part as part_store, quote as quote_store, sequence, service as service_store,
    work_order as work_order_store,
};

use crate::notify::Outbox;
use crate::services::ensure_active;
use crate::{commit, Workshop};

async fn load_order(
    conn: &mut SqliteConnection,
    id: WorkOrderId,
) -> Result<WorkOrder, ApplicationError> {
    work_order_store::find(conn, id)
        .await?
        .ok_or_else(|| ApplicationError::not_found("work_order", id.0))
}

impl Workshop {
    /// Opens the single work order of an approved quote, priced at the accepted variant.
    pub async fn create_work_order(
        &self,
        actor: &Principal,
        quote_id: QuoteId,
    ) -> Result<WorkOrder, ApplicationError> {
        let now = Utc::now();
        let mut tx = self.begin().await?;

        let quote = quote_store::find(&mut tx, quote_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("quote", quote_id.0))?;
        if quote.status != QuoteStatus::Approved {
            return Err(ApplicationError::invalid_state(format!(
                "quote {} is {}; only approved quotes become work orders",
                quote.number,
                quote.status.as_str()
            )));
        }
        let service = service_store::find(&mut tx, quote.service_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("service", quote.service_id.0))?;
        ensure_active(&service)?;
        if let Some(existing) = work_order_store::find_by_quote(&mut tx, quote_id).await? {
            return Err(ApplicationError::invalid_state(format!(
                "quote {} already has work order {}",
                quote.number, existing.number
            )));
        }
        let parts_total = quote.confirmed_amount().ok_or_else(|| {
            DomainError::InvariantViolation(format!(
                "approved quote {} has no confirmed amount",
                quote.number
            ))
        })?;

        let number =
            sequence::next_number(&mut tx, DocumentKind::WorkOrder, current_year(now)).await?;
        let mut order = WorkOrder {
            id: WorkOrderId(0),
            number,
            service_id: quote.service_id,
            quote_id: Some(quote.id),
            employee_id: actor.employee_id,
            parts_total,
            extras_total: Decimal::ZERO,
            extras_notes: None,
            no_cost: false,
            status: WorkOrderStatus::Pending,
            created_at: now,
            started_at: None,
            finished_at: None,
            lines: Vec::new(),
        };
        order.id = work_order_store::insert(&mut tx, &order).await?;

        let mut outbox = Outbox::default();
        outbox.work_order(EventKind::Created, &order);
        commit(tx).await?;
        self.notifier.flush(outbox);

        tracing::info!(
            event_name = "work_orders.created",
            work_order = %order.number,
            quote = %quote.number,
            parts_total = %order.parts_total,
            "work order created"
        );
        Ok(order)
    }

    pub async fn get_work_order(&self, id: WorkOrderId) -> Result<WorkOrder, ApplicationError> {
        let mut conn = self.read().await?;
        load_order(&mut conn, id).await
    }

    /// Repair begins; the service moves to EN_REPARACION.
    pub async fn start_work_order(
        &self,
        actor: &Principal,
        id: WorkOrderId,
    ) -> Result<WorkOrder, ApplicationError> {
        self.advance_order(actor, id, WorkOrderEvent::Start, ServiceEvent::RepairStarted).await
    }

    /// Repair done; the service moves to TERMINADO and its return date is stamped.
    pub async fn finish_work_order(
        &self,
        actor: &Principal,
        id: WorkOrderId,
    ) -> Result<WorkOrder, ApplicationError> {
        self.advance_order(actor, id, WorkOrderEvent::Finish, ServiceEvent::RepairFinished).await
    }

    async fn advance_order(
        &self,
        actor: &Principal,
        id: WorkOrderId,
        event: WorkOrderEvent,
        service_event: ServiceEvent,
    ) -> Result<WorkOrder, ApplicationError> {
        let now = Utc::now();
        let mut tx = self.begin().await?;

        let mut order = load_order(&mut tx, id).await?;
        let outcome = WorkOrderStatusMachine
            .transition(&order.status, &event)
            .map_err(DomainError::from)?;
        let mut service = service_store::find(&mut tx, order.service_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("service", order.service_id.0))?;
        ensure_active(&service)?;
        let moved = ServiceStatusMachine
            .transition(&service.status, &service_event)
            .map_err(DomainError::from)?;

        work_order_store::transition(&mut tx, id, outcome.from, outcome.to, now).await?;
        service_store::transition(&mut tx, service.id, moved.from, moved.to, now).await?;
        order.status = outcome.to;
        match outcome.to {
            WorkOrderStatus::InProgress => order.started_at = Some(now),
            WorkOrderStatus::Finished => order.finished_at = Some(now),
            WorkOrderStatus::Pending => {}
        }
        service.enter(moved.to, now);

        let mut outbox = Outbox::default();
        outbox.work_order_status(&order, outcome.from.as_str());
        outbox.service_status(&service, moved.from.as_str());
        commit(tx).await?;
        self.notifier.flush(outbox);

        tracing::info!(
            event_name = "work_orders.advanced",
            work_order = %order.number,
            service = %service.number,
            to = order.status.as_str(),
            service_status = service.status.as_str(),
            user = %actor.username,
            "work order status changed"
        );
        Ok(order)
    }

    /// Records a part used in the repair.
    pub async fn add_work_order_line(
        &self,
        actor: &Principal,
        id: WorkOrderId,
        part_id: PartId,
        quantity: u32,
        comment: Option<String>,
    ) -> Result<WorkOrder, ApplicationError> {
        if quantity == 0 {
            return Err(ApplicationError::validation("part quantity must be at least 1"));
        }
        let mut tx = self.begin().await?;
        let order = load_order(&mut tx, id).await?;
        if order.status == WorkOrderStatus::Finished {
            return Err(ApplicationError::invalid_state(format!(
                "work order {} is finished",
                order.number
            )));
        }
        let part = part_store::find(&mut tx, part_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("part", part_id.0))?;
        if !part.active {
            return Err(ApplicationError::validation(format!("part {} is inactive", part.code)));
        }

        work_order_store::insert_line(&mut tx, id, part_id, quantity, comment.as_deref()).await?;
        let order = load_order(&mut tx, id).await?;

        let mut outbox = Outbox::default();
        outbox.work_order(EventKind::Updated, &order);
        commit(tx).await?;
        self.notifier.flush(outbox);

        tracing::debug!(
            event_name = "work_orders.line_added",
            work_order = %order.number,
            part = %part.code,
            quantity,
            user = %actor.username,
            "part recorded on work order"
        );
        Ok(order)
    }

    /// Charges found during the repair on top of the quoted amount.
    pub async fn update_extras(
        &self,
        actor: &Principal,
        id: WorkOrderId,
        extras_total: Decimal,
        extras_notes: Option<String>,
    ) -> Result<WorkOrder, ApplicationError> {
        if extras_total < Decimal::ZERO {
            return Err(ApplicationError::validation("extras cannot be negative"));
        }
        let mut tx = self.begin().await?;
        let mut order = load_order(&mut tx, id).await?;
        if order.status == WorkOrderStatus::Finished {
            return Err(ApplicationError::invalid_state(format!(
                "work order {} is finished",
                order.number
            )));
        }
        work_order_store::update_extras(&mut tx, id, extras_total, extras_notes.as_deref()).await?;
        order.extras_total = extras_total;
        order.extras_notes = extras_notes;

        let mut outbox = Outbox::default();
        outbox.work_order(EventKind::Updated, &order);
        commit(tx).await?;
        self.notifier.flush(outbox);

        tracing::info!(
            event_name = "work_orders.extras_updated",
            work_order = %order.number,
            extras_total = %order.extras_total,
            final_total = %order.final_total(),
            user = %actor.username,
            "work order extras updated"
        );
        Ok(order)
    }
}
