pub mod engine;
pub mod states;

pub use engine::{
    FlowTransitionError, Lifecycle, QuoteStatusMachine, ServiceStatusMachine,
    WorkOrderStatusMachine,
};
pub use states::{FlowKind, QuoteEvent, ServiceEvent, TransitionOutcome, WorkOrderEvent};
