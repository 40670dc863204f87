use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    Service,
    Quote,
    WorkOrder,
}

impl FlowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Quote => "quote",
            Self::WorkOrder => "work_order",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceEvent {
    WarrantyIntake,
    QuoteCreated,
    QuoteApproved,
    QuoteRejected,
    WarrantyConfirmed,
    WarrantyDenied,
    RepairStarted,
    RepairFinished,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteEvent {
    Start,
    MarkReady,
    Send,
    /// Content edited after sending; the quote returns to LISTO.
    Revise,
    Approve,
    Reject,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkOrderEvent {
    Start,
    Finish,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionOutcome<S, E> {
    pub from: S,
    pub to: S,
    pub event: E,
}

impl<S: PartialEq, E> TransitionOutcome<S, E> {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}
