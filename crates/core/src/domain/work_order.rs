use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::part::PartId;
use crate::domain::quote::QuoteId;
use crate::domain::service::ServiceId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkOrderId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkOrderLineId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkOrderStatus {
    #[serde(rename = "PENDIENTE")]
    Pending,
    #[serde(rename = "EN_PROGRESO")]
    InProgress,
    #[serde(rename = "TERMINADA")]
    Finished,
}

impl WorkOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDIENTE",
            Self::InProgress => "EN_PROGRESO",
            Self::Finished => "TERMINADA",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDIENTE" => Some(Self::Pending),
            "EN_PROGRESO" => Some(Self::InProgress),
            "TERMINADA" => Some(Self::Finished),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkOrderLine {
    pub id: WorkOrderLineId,
    pub work_order_id: WorkOrderId,
    pub part_id: PartId,
    pub quantity: u32,
    pub comment: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkOrder {
    pub id: WorkOrderId,
    pub number: String,
    pub service_id: ServiceId,
    pub quote_id: Option<QuoteId>,
    pub employee_id: i64,
    pub parts_total: Decimal,
    pub extras_total: Decimal,
    pub extras_notes: Option<String>,
    pub no_cost: bool,
    pub status: WorkOrderStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub lines: Vec<WorkOrderLine>,
}

impl WorkOrder {
    /// What the client pays. Warranty work is always free.
    pub fn final_total(&self) -> Decimal {
        if self.no_cost {
            Decimal::ZERO
        } else {
            self.parts_total + self.extras_total
        }
    }

    pub fn repair_days(&self) -> i64 {
        match (self.started_at, self.finished_at) {
            (Some(started), Some(finished)) => (finished - started).num_days(),
            _ => 0,
        }
    }

    pub fn summary(&self) -> WorkOrderSummary {
        WorkOrderSummary {
            id: self.id,
            number: self.number.clone(),
            service_id: self.service_id,
            quote_id: self.quote_id,
            status: self.status,
            no_cost: self.no_cost,
            final_total: self.final_total(),
            repair_days: self.repair_days(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkOrderSummary {
    pub id: WorkOrderId,
    pub number: String,
    pub service_id: ServiceId,
    pub quote_id: Option<QuoteId>,
    pub status: WorkOrderStatus,
    pub no_cost: bool,
    pub final_total: Decimal,
    pub repair_days: i64,
}
