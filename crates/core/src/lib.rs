pub mod auth;
pub mod config;
pub mod delivery;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod notify;
pub mod numbering;
pub mod pricing;
pub mod warranty;

pub use auth::{Principal, Role, SessionClaims, SessionRevocations};
pub use delivery::{EmailMessage, Mailer, ReceiptRenderer, ServiceReceipt};
pub use domain::part::{Part, PartId};
pub use domain::quote::{
    ConfirmationChannel, LineDraft, PriceVariant, Quote, QuoteId, QuoteLine, QuoteLineId,
    QuoteStatus,
};
pub use domain::service::{IntakeType, Service, ServiceId, ServiceStatus};
pub use domain::token::{ApprovalToken, TokenAction, TokenGrant, TokenRejection};
pub use domain::work_order::{WorkOrder, WorkOrderId, WorkOrderLine, WorkOrderStatus};
pub use errors::{ApplicationError, DomainError, ErrorKind, InterfaceError};
pub use notify::{NotificationEvent, NotificationSink};
pub use numbering::DocumentKind;
