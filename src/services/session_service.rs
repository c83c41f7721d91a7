use tracing::{debug, info};

use crate::{
    dao::storage::StorageError,
    dto::session::{SessionRequest, SessionResponse},
    error::ServiceError,
    state::{SharedState, tickets::Ticket},
};

/// Issue a session token for `request.name` in `room`.
///
/// Development stand-in for an identity provider: the requested name is not
/// authenticated, so this is refused unless `devSessionIssuing` is enabled.
/// The room does not need to exist yet; it is created when the first socket joins.
pub async fn issue_session(
    state: &SharedState,
    room: String,
    request: SessionRequest,
) -> Result<SessionResponse, ServiceError> {
    if !state.config().dev_session_issuing() {
        debug!(room = %room, "session issuing is disabled");
        return Err(ServiceError::Forbidden(
            "session issuing is disabled on this server".into(),
        ));
    }
    let ttl = state.config().session_ttl();
    let token = state
        .store()
        .issue_session_token(&room, &request.name, ttl)
        .await?;
    info!(room = %room, user = %request.name, "issued session token");
    Ok(SessionResponse::new(room, request.name, token))
}

/// Ticket queue of a room as stored by the repository.
pub async fn ticket_queue(state: &SharedState, room: &str) -> Result<Vec<Ticket>, ServiceError> {
    state.store().get_ticket_queue(room).await.map_err(|err| match err {
        StorageError::MissingRoom(room) => ServiceError::NotFound(format!("room `{room}`")),
        other => ServiceError::from(other),
    })
}
