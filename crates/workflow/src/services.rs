//! Service intake, edits, soft deletion and warranty evaluation.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use taller_core::auth::{Principal, Role};
use taller_core::delivery::{EmailMessage, ServiceReceipt};
use taller_core::domain::service::{
    IntakeType, Service, ServiceId, ServiceStatus, WarrantyEvaluation,
};
use taller_core::domain::work_order::{WorkOrder, WorkOrderId, WorkOrderStatus};
use taller_core::errors::{ApplicationError, DomainError};
use taller_core::flows::{Lifecycle, ServiceEvent, ServiceStatusMachine};
use taller_core::notify::EventKind;
use taller_core::numbering::{current_year, DocumentKind};
use taller_core::warranty;
use taller_db::repositories::{
    quote as quote_store, sequence, service as service_store, work_order as work_order_store,
};

use crate::notify::Outbox;
use crate::{commit, integration, tokens, Workshop};

/// What the front desk records when equipment comes in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceIntake {
    pub client_id: i64,
    pub equipment_id: i64,
    pub intake_type: IntakeType,
    pub problem_description: Option<String>,
    pub intake_signature: Option<String>,
    /// Set for a warranty redo of a finished service.
    pub original_service_id: Option<ServiceId>,
    pub visit_fee: Option<Decimal>,
    pub visit_fee_paid: bool,
    pub received_on: NaiveDate,
    pub expected_return_on: Option<NaiveDate>,
}

impl ServiceIntake {
    fn validate(&self) -> Result<(), DomainError> {
        check_visit_fee(self.visit_fee)?;
        check_return_date(self.received_on, self.expected_return_on)
    }
}

/// Staff edits to an existing service. `None` leaves a field as it is.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDetailsUpdate {
    pub problem_description: Option<String>,
    pub intake_signature: Option<String>,
    pub conformity_signature: Option<String>,
    pub visit_fee: Option<Decimal>,
    pub visit_fee_paid: Option<bool>,
    pub expected_return_on: Option<NaiveDate>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarrantyDecision {
    /// Whether the technician found the failure covered (same fault, no misuse).
    pub conditions_met: bool,
    pub notes: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarrantyOutcome {
    pub service: Service,
    /// The no-cost work order opened when the claim is accepted.
    pub work_order: Option<WorkOrder>,
}

impl WarrantyOutcome {
    pub fn accepted(&self) -> bool {
        self.work_order.is_some()
    }
}

/// Deleted services take no further quotes, decisions or repair steps.
pub(crate) fn ensure_active(service: &Service) -> Result<(), ApplicationError> {
    if service.active {
        Ok(())
    } else {
        Err(ApplicationError::invalid_state(format!(
            "service {} has been deleted",
            service.number
        )))
    }
}

fn check_visit_fee(fee: Option<Decimal>) -> Result<(), DomainError> {
    if fee.is_some_and(|fee| fee < Decimal::ZERO) {
        return Err(DomainError::Validation("visit fee cannot be negative".to_string()));
    }
    Ok(())
}

fn check_return_date(
    received_on: NaiveDate,
    expected_return_on: Option<NaiveDate>,
) -> Result<(), DomainError> {
    match expected_return_on {
        Some(expected) if expected < received_on => Err(DomainError::Validation(format!(
            "expected return {expected} is before the intake date {received_on}"
        ))),
        _ => Ok(()),
    }
}

impl Workshop {
    pub async fn register_service(
        &self,
        actor: &Principal,
        intake: ServiceIntake,
    ) -> Result<Service, ApplicationError> {
        intake.validate()?;
        let now = Utc::now();
        let mut tx = self.begin().await?;

        let mut status = ServiceStatus::Received;
        if let Some(original_id) = intake.original_service_id {
            let original = service_store::find(&mut tx, original_id)
                .await?
                .ok_or_else(|| ApplicationError::not_found("service", original_id.0))?;
            let in_window = warranty::check_original(&original, now)?;
            status = ServiceStatusMachine
                .transition(&status, &ServiceEvent::WarrantyIntake)
                .map_err(DomainError::from)?
                .to;
            tracing::debug!(
                event_name = "services.warranty_intake",
                original = %original.number,
                in_window,
                "warranty claim registered against finished service"
            );
        }

        let number = sequence::next_number(&mut tx, DocumentKind::Service, current_year(now)).await?;
        let mut service = Service {
            id: ServiceId(0),
            number,
            client_id: intake.client_id,
            equipment_id: intake.equipment_id,
            received_by: actor.employee_id,
            intake_type: intake.intake_type,
            problem_description: intake.problem_description,
            intake_signature: intake.intake_signature,
            conformity_signature: None,
            is_warranty: intake.original_service_id.is_some(),
            original_service_id: intake.original_service_id,
            warranty: WarrantyEvaluation::default(),
            visit_fee: intake.visit_fee,
            visit_fee_paid: intake.visit_fee_paid,
            status,
            created_at: now,
            received_on: intake.received_on,
            expected_return_on: intake.expected_return_on,
            actual_return_at: None,
            active: true,
        };
        service.check_warranty_link()?;
        service.id = service_store::insert(&mut tx, &service).await?;

        let mut outbox = Outbox::default();
        outbox.service(EventKind::Created, &service);
        commit(tx).await?;
        self.notifier.flush(outbox);

        tracing::info!(
            event_name = "services.registered",
            service = %service.number,
            status = service.status.as_str(),
            received_by = actor.employee_id,
            "service registered"
        );
        Ok(service)
    }

    pub async fn get_service(&self, id: ServiceId) -> Result<Service, ApplicationError> {
        let mut conn = self.read().await?;
        service_store::find(&mut conn, id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("service", id.0))
    }

    pub async fn list_services(
        &self,
        status: Option<ServiceStatus>,
        active: Option<bool>,
    ) -> Result<Vec<Service>, ApplicationError> {
        let mut conn = self.read().await?;
        Ok(service_store::list(&mut conn, status, active).await?)
    }

    pub async fn update_service_details(
        &self,
        actor: &Principal,
        id: ServiceId,
        update: ServiceDetailsUpdate,
    ) -> Result<Service, ApplicationError> {
        check_visit_fee(update.visit_fee)?;
        let mut tx = self.begin().await?;
        let mut service = service_store::find(&mut tx, id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("service", id.0))?;
        ensure_active(&service)?;

        if let Some(description) = update.problem_description {
            service.problem_description = Some(description);
        }
        if let Some(signature) = update.intake_signature {
            service.intake_signature = Some(signature);
        }
        if let Some(signature) = update.conformity_signature {
            service.conformity_signature = Some(signature);
        }
        if let Some(fee) = update.visit_fee {
            service.visit_fee = Some(fee);
        }
        if let Some(paid) = update.visit_fee_paid {
            service.visit_fee_paid = paid;
        }
        if let Some(expected) = update.expected_return_on {
            check_return_date(service.received_on, Some(expected))?;
            service.expected_return_on = Some(expected);
        }
        service_store::update_details(&mut tx, &service).await?;

        let mut outbox = Outbox::default();
        outbox.service(EventKind::Updated, &service);
        commit(tx).await?;
        self.notifier.flush(outbox);

        tracing::info!(
            event_name = "services.updated",
            service = %service.number,
            user = %actor.username,
            "service details updated"
        );
        Ok(service)
    }

    /// Soft delete. The row stays for the numbering sequence and history.
    pub async fn deactivate_service(
        &self,
        actor: &Principal,
        id: ServiceId,
    ) -> Result<Service, ApplicationError> {
        actor.require_any(&[Role::Admin, Role::Receptionist])?;
        let mut tx = self.begin().await?;
        let mut service = service_store::find(&mut tx, id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("service", id.0))?;
        if !service_store::deactivate(&mut tx, id).await? {
            return Err(ApplicationError::invalid_state(format!(
                "service {} is already deleted",
                service.number
            )));
        }
        service.active = false;

        let mut voided = 0;
        for quote in quote_store::for_service(&mut tx, id).await? {
            if !quote.status.is_decided() {
                voided += tokens::invalidate_prior(&mut tx, quote.id).await?;
            }
        }

        let mut outbox = Outbox::default();
        outbox.service(EventKind::Deleted, &service);
        commit(tx).await?;
        self.notifier.flush(outbox);

        tracing::info!(
            event_name = "services.deactivated",
            service = %service.number,
            voided_links = voided,
            user = %actor.username,
            "service deleted"
        );
        Ok(service)
    }

    /// Settles a warranty claim. An accepted claim opens a no-cost work order in the same
    /// transaction; a denied one closes the service as rejected.
    pub async fn evaluate_warranty(
        &self,
        actor: &Principal,
        id: ServiceId,
        decision: WarrantyDecision,
    ) -> Result<WarrantyOutcome, ApplicationError> {
        actor.require_any(&[Role::Admin, Role::Technician])?;
        let now = Utc::now();
        let mut tx = self.begin().await?;

        let mut service = service_store::find(&mut tx, id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("service", id.0))?;
        ensure_active(&service)?;
        let original_id = service.original_service_id.ok_or_else(|| {
            ApplicationError::invalid_state(format!(
                "service {} is not a warranty claim",
                service.number
            ))
        })?;
        let original = service_store::find(&mut tx, original_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("service", original_id.0))?;

        let in_window = warranty::check_original(&original, now)?;
        let eligible = in_window && decision.conditions_met;
        let event =
            if eligible { ServiceEvent::WarrantyConfirmed } else { ServiceEvent::WarrantyDenied };
        let outcome = ServiceStatusMachine
            .transition(&service.status, &event)
            .map_err(DomainError::from)?;

        let evaluation = WarrantyEvaluation {
            in_window: Some(in_window),
            conditions_met: Some(decision.conditions_met),
            evaluated_by: Some(actor.employee_id),
            notes: decision.notes,
            evaluated_at: Some(now),
        };
        service_store::record_warranty_evaluation(&mut tx, id, &evaluation).await?;
        service_store::transition(&mut tx, id, outcome.from, outcome.to, now).await?;
        service.warranty = evaluation;
        service.enter(outcome.to, now);

        let mut outbox = Outbox::default();
        outbox.service_status(&service, outcome.from.as_str());

        let work_order = if eligible {
            let number =
                sequence::next_number(&mut tx, DocumentKind::WorkOrder, current_year(now)).await?;
            let mut order = WorkOrder {
                id: WorkOrderId(0),
                number,
                service_id: service.id,
                quote_id: None,
                employee_id: actor.employee_id,
                parts_total: Decimal::ZERO,
                extras_total: Decimal::ZERO,
                extras_notes: None,
                no_cost: true,
                status: WorkOrderStatus::Pending,
                created_at: now,
                started_at: None,
                finished_at: None,
                lines: Vec::new(),
            };
            order.id = work_order_store::insert(&mut tx, &order).await?;
            outbox.work_order(EventKind::Created, &order);
            Some(order)
        } else {
            None
        };

        commit(tx).await?;
        self.notifier.flush(outbox);

        tracing::info!(
            event_name = "services.warranty_evaluated",
            service = %service.number,
            original = %original.number,
            in_window,
            conditions_met = decision.conditions_met,
            accepted = eligible,
            "warranty claim evaluated"
        );
        Ok(WarrantyOutcome { service, work_order })
    }

    /// Renders the intake receipt and emails it to `to` as an attachment.
    pub async fn send_service_receipt(
        &self,
        id: ServiceId,
        to: &str,
    ) -> Result<(), ApplicationError> {
        let service = self.get_service(id).await?;
        let receipt = ServiceReceipt::from_service(&service, Utc::now());
        let document = self.receipts.render_service_receipt(&receipt).await.map_err(integration)?;

        let message = EmailMessage {
            to: to.to_owned(),
            subject: format!("Comprobante de servicio {}", service.number),
            body_text: format!(
                "Adjuntamos el comprobante de recepción del servicio {}.",
                service.number
            ),
            body_html: None,
            attachment: Some(document.into()),
        };
        self.mailer.send(message).await.map_err(integration)?;

        tracing::info!(
            event_name = "services.receipt_sent",
            service = %service.number,
            "service receipt emailed"
        );
        Ok(())
    }
}
