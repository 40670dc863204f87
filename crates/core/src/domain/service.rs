use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceStatus {
    #[serde(rename = "RECIBIDO")]
    Received,
    #[serde(rename = "ESPERANDO_EVALUACION_GARANTIA")]
    AwaitingWarrantyEvaluation,
    #[serde(rename = "PRESUPUESTADO")]
    Quoted,
    #[serde(rename = "APROBADO")]
    Approved,
    #[serde(rename = "EN_REPARACION")]
    InRepair,
    #[serde(rename = "TERMINADO")]
    Finished,
    #[serde(rename = "RECHAZADO")]
    Rejected,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "RECIBIDO",
            Self::AwaitingWarrantyEvaluation => "ESPERANDO_EVALUACION_GARANTIA",
            Self::Quoted => "PRESUPUESTADO",
            Self::Approved => "APROBADO",
            Self::InRepair => "EN_REPARACION",
            Self::Finished => "TERMINADO",
            Self::Rejected => "RECHAZADO",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "RECIBIDO" => Some(Self::Received),
            "ESPERANDO_EVALUACION_GARANTIA" => Some(Self::AwaitingWarrantyEvaluation),
            "PRESUPUESTADO" => Some(Self::Quoted),
            "APROBADO" => Some(Self::Approved),
            "EN_REPARACION" => Some(Self::InRepair),
            "TERMINADO" => Some(Self::Finished),
            "RECHAZADO" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Rejected)
    }
}

/// How the equipment reached the shop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntakeType {
    #[serde(rename = "MOSTRADOR")]
    Counter,
    #[serde(rename = "DOMICILIO")]
    HomeVisit,
}

impl IntakeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "MOSTRADOR",
            Self::HomeVisit => "DOMICILIO",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "MOSTRADOR" => Some(Self::Counter),
            "DOMICILIO" => Some(Self::HomeVisit),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarrantyEvaluation {
    pub in_window: Option<bool>,
    pub conditions_met: Option<bool>,
    pub evaluated_by: Option<i64>,
    pub notes: Option<String>,
    pub evaluated_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub number: String,
    pub client_id: i64,
    pub equipment_id: i64,
    pub received_by: i64,
    pub intake_type: IntakeType,
    pub problem_description: Option<String>,
    pub intake_signature: Option<String>,
    pub conformity_signature: Option<String>,
    pub is_warranty: bool,
    pub original_service_id: Option<ServiceId>,
    pub warranty: WarrantyEvaluation,
    pub visit_fee: Option<Decimal>,
    pub visit_fee_paid: bool,
    pub status: ServiceStatus,
    pub created_at: DateTime<Utc>,
    pub received_on: NaiveDate,
    pub expected_return_on: Option<NaiveDate>,
    pub actual_return_at: Option<DateTime<Utc>>,
    pub active: bool,
}

impl Service {
    /// Warranty redo services always point at the service they redo; regular ones never do.
    pub fn check_warranty_link(&self) -> Result<(), DomainError> {
        match (self.is_warranty, self.original_service_id) {
            (true, None) => Err(DomainError::Validation(
                "a warranty service must reference its original service".to_string(),
            )),
            (false, Some(_)) => Err(DomainError::Validation(
                "only warranty services may reference an original service".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Moves the service to `next`, stamping the real return date on completion.
    pub fn enter(&mut self, next: ServiceStatus, at: DateTime<Utc>) {
        if next == ServiceStatus::Finished {
            self.actual_return_at = Some(at);
        }
        self.status = next;
    }

    pub fn summary(&self) -> ServiceSummary {
        ServiceSummary {
            id: self.id,
            number: self.number.clone(),
            client_id: self.client_id,
            equipment_id: self.equipment_id,
            status: self.status,
            is_warranty: self.is_warranty,
            received_on: self.received_on,
            actual_return_at: self.actual_return_at,
            active: self.active,
        }
    }
}

/// List-view projection broadcast with service events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSummary {
    pub id: ServiceId,
    pub number: String,
    pub client_id: i64,
    pub equipment_id: i64,
    pub status: ServiceStatus,
    pub is_warranty: bool,
    pub received_on: NaiveDate,
    pub actual_return_at: Option<DateTime<Utc>>,
    pub active: bool,
}
