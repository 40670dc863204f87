use thiserror::Error;

use crate::domain::quote::QuoteStatus;
use crate::domain::service::ServiceStatus;
use crate::domain::work_order::WorkOrderStatus;
use crate::flows::states::{
    FlowKind, QuoteEvent, ServiceEvent, TransitionOutcome, WorkOrderEvent,
};

/// A closed status graph. Implementations are pure: they never touch storage, so a
/// rejected transition cannot have modified anything.
pub trait Lifecycle {
    type State: Copy + PartialEq + std::fmt::Debug;
    type Event: Copy + std::fmt::Debug;

    fn kind(&self) -> FlowKind;
    fn initial_state(&self) -> Self::State;
    fn transition(
        &self,
        current: &Self::State,
        event: &Self::Event,
    ) -> Result<TransitionOutcome<Self::State, Self::Event>, FlowTransitionError>;

    fn can_apply(&self, current: &Self::State, event: &Self::Event) -> bool {
        self.transition(current, event).is_ok()
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid {flow} transition from {state} using event {event}")]
    InvalidTransition { flow: &'static str, state: String, event: String },
}

impl FlowTransitionError {
    fn invalid<S: std::fmt::Debug, E: std::fmt::Debug>(kind: FlowKind, state: &S, event: &E) -> Self {
        Self::InvalidTransition {
            flow: kind.as_str(),
            state: format!("{state:?}"),
            event: format!("{event:?}"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ServiceStatusMachine;

impl Lifecycle for ServiceStatusMachine {
    type State = ServiceStatus;
    type Event = ServiceEvent;

    fn kind(&self) -> FlowKind {
        FlowKind::Service
    }

    fn initial_state(&self) -> ServiceStatus {
        ServiceStatus::Received
    }

    fn transition(
        &self,
        current: &ServiceStatus,
        event: &ServiceEvent,
    ) -> Result<TransitionOutcome<ServiceStatus, ServiceEvent>, FlowTransitionError> {
        use ServiceEvent::{
            QuoteApproved, QuoteCreated, QuoteRejected, RepairFinished, RepairStarted,
            WarrantyConfirmed, WarrantyDenied, WarrantyIntake,
        };
        use ServiceStatus::{
            Approved, AwaitingWarrantyEvaluation, Finished, InRepair, Quoted, Received, Rejected,
        };

        let to = match (current, event) {
            (Received, WarrantyIntake) => AwaitingWarrantyEvaluation,
            (Received, QuoteCreated) | (Quoted, QuoteCreated) => Quoted,
            (Quoted, QuoteApproved) => Approved,
            (Quoted, QuoteRejected) => Rejected,
            (AwaitingWarrantyEvaluation, WarrantyConfirmed) => Approved,
            (AwaitingWarrantyEvaluation, WarrantyDenied) => Rejected,
            (Approved, RepairStarted) => InRepair,
            (InRepair, RepairFinished) => Finished,
            _ => return Err(FlowTransitionError::invalid(self.kind(), current, event)),
        };

        Ok(TransitionOutcome { from: *current, to, event: *event })
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct QuoteStatusMachine;

impl Lifecycle for QuoteStatusMachine {
    type State = QuoteStatus;
    type Event = QuoteEvent;

    fn kind(&self) -> FlowKind {
        FlowKind::Quote
    }

    fn initial_state(&self) -> QuoteStatus {
        QuoteStatus::Pending
    }

    fn transition(
        &self,
        current: &QuoteStatus,
        event: &QuoteEvent,
    ) -> Result<TransitionOutcome<QuoteStatus, QuoteEvent>, FlowTransitionError> {
        use QuoteEvent::{Approve, MarkReady, Reject, Revise, Send, Start};
        use QuoteStatus::{Approved, InProgress, Pending, Ready, Rejected, Sent};

        let to = match (current, event) {
            (Pending, Start) => InProgress,
            (InProgress, MarkReady) => Ready,
            (Ready, Send) | (Sent, Send) => Sent,
            (Sent, Revise) => Ready,
            (Sent, Approve) => Approved,
            (Sent, Reject) => Rejected,
            _ => return Err(FlowTransitionError::invalid(self.kind(), current, event)),
        };

        Ok(TransitionOutcome { from: *current, to, event: *event })
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct WorkOrderStatusMachine;

impl Lifecycle for WorkOrderStatusMachine {
    type State = WorkOrderStatus;
    type Event = WorkOrderEvent;

    fn kind(&self) -> FlowKind {
        FlowKind::WorkOrder
    }

    fn initial_state(&self) -> WorkOrderStatus {
        WorkOrderStatus::Pending
    }

    fn transition(
        &self,
        current: &WorkOrderStatus,
        event: &WorkOrderEvent,
    ) -> Result<TransitionOutcome<WorkOrderStatus, WorkOrderEvent>, FlowTransitionError> {
        let to = match (current, event) {
            (WorkOrderStatus::Pending, WorkOrderEvent::Start) => WorkOrderStatus::InProgress,
            (WorkOrderStatus::InProgress, WorkOrderEvent::Finish) => WorkOrderStatus::Finished,
            _ => return Err(FlowTransitionError::invalid(self.kind(), current, event)),
        };

        Ok(TransitionOutcome { from: *current, to, event: *event })
    }
}
