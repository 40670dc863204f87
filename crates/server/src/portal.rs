//! Public quote approval routes, reached from the links mailed to clients.
//!
//! - `GET  /publico/presupuestos/{token}`            show the quote behind a link
//! - `POST /publico/presupuestos/{token}/confirmar`  apply the link's decision
//!
//! No session is required: the single-use token is the credential. Any token problem
//! answers 410 with the same message so a caller cannot tell the cases apart.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use taller_core::errors::{ApplicationError, InterfaceError};
use taller_workflow::{PublicDecision, QuotePreview, Workshop};

#[derive(Clone)]
pub struct PortalState {
    workshop: Arc<Workshop>,
}

impl PortalState {
    pub fn new(workshop: Arc<Workshop>) -> Self {
        Self { workshop }
    }
}

#[derive(Debug, Serialize)]
pub struct PortalError {
    pub error: String,
    pub correlation_id: String,
}

type PortalResult<T> = Result<Json<T>, (StatusCode, Json<PortalError>)>;

pub fn router(workshop: Arc<Workshop>) -> Router {
    Router::new()
        .route("/publico/presupuestos/{token}", get(preview_quote))
        .route("/publico/presupuestos/{token}/confirmar", post(confirm_decision))
        .with_state(PortalState::new(workshop))
}

pub async fn preview_quote(
    Path(token): Path<String>,
    State(state): State<PortalState>,
) -> PortalResult<QuotePreview> {
    state.workshop.preview_token(&token).await.map(Json).map_err(portal_error)
}

pub async fn confirm_decision(
    Path(token): Path<String>,
    State(state): State<PortalState>,
    headers: HeaderMap,
) -> PortalResult<PublicDecision> {
    let ip = client_ip(&headers);
    let decision =
        state.workshop.confirm_with_token(&token, ip.as_deref()).await.map_err(portal_error)?;

    info!(
        event_name = "portal.decision_confirmed",
        quote = %decision.quote_number,
        action = decision.action.as_str(),
        "client decision accepted through portal"
    );
    Ok(Json(decision))
}

/// First hop of `x-forwarded-for`, then `x-real-ip`.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };
    forwarded.or_else(real_ip).map(ToOwned::to_owned)
}

fn portal_error(error: ApplicationError) -> (StatusCode, Json<PortalError>) {
    let correlation_id = Uuid::new_v4().simple().to_string();
    let interface = error.into_interface(correlation_id.clone());

    let status = match &interface {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
        InterfaceError::Gone { .. } => StatusCode::GONE,
        InterfaceError::Forbidden { .. } => StatusCode::FORBIDDEN,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(
            event_name = "portal.request_failed",
            correlation_id = %correlation_id,
            error = %interface,
            "public approval request failed"
        );
    }

    (
        status,
        Json(PortalError { error: interface.user_message().to_string(), correlation_id }),
    )
}
