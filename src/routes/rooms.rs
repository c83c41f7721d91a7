use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use axum_valid::Valid;
use validator::Validate;

use crate::{
    dto::session::{RoomPath, SessionRequest, SessionResponse},
    error::AppError,
    services::session_service,
    state::{SharedState, tickets::Ticket},
};

/// Issue a session token for a room member. Development only: enabled by
/// `devSessionIssuing`, and the name is taken on trust.
#[utoipa::path(
    post,
    path = "/rooms/{key}/sessions",
    tag = "rooms",
    params(RoomPath),
    request_body = SessionRequest,
    responses(
        (status = 200, description = "Token issued", body = SessionResponse),
        (status = 400, description = "Invalid room key or name"),
        (status = 403, description = "Session issuing is disabled"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn create_session(
    State(state): State<SharedState>,
    Path(path): Path<RoomPath>,
    Valid(Json(payload)): Valid<Json<SessionRequest>>,
) -> Result<Json<SessionResponse>, AppError> {
    path.validate()?;
    Ok(Json(
        session_service::issue_session(&state, path.key, payload).await?,
    ))
}

/// List the ticket queue of a room.
#[utoipa::path(
    get,
    path = "/rooms/{key}/tickets",
    tag = "rooms",
    params(RoomPath),
    responses(
        (status = 200, description = "Tickets in display order", body = [Ticket]),
        (status = 404, description = "Unknown room")
    )
)]
pub async fn list_tickets(
    State(state): State<SharedState>,
    Path(path): Path<RoomPath>,
) -> Result<Json<Vec<Ticket>>, AppError> {
    path.validate()?;
    Ok(Json(session_service::ticket_queue(&state, &path.key).await?))
}

/// Configure the room routes subtree.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/rooms/{key}/sessions", post(create_session))
        .route("/rooms/{key}/tickets", get(list_tickets))
}
