use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use axum_valid::Valid;

use crate::{dto::session::WsConnectParams, services::websocket_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/ws",
    tag = "sockets",
    params(WsConnectParams),
    responses(
        (status = 101, description = "Switching protocols to WebSocket"),
        (status = 400, description = "Invalid room, name or token parameter")
    )
)]
/// Upgrade the HTTP connection into a room member WebSocket session.
///
/// The token is checked by the room once the socket is open; an invalid or
/// expired token closes the socket with code 4003.
pub async fn ws_handler(
    State(state): State<SharedState>,
    Valid(Query(params)): Valid<Query<WsConnectParams>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| websocket_service::handle_socket(state, socket, params))
}

/// Configure the WebSocket endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/ws", get(ws_handler))
}
