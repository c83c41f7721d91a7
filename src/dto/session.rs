//! DTOs for session-token issuance and the WebSocket handshake.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::{
    dao::room_store::SessionToken,
    dto::validation::{validate_room_key, validate_user_name},
    state::history::format_timestamp_ms,
};

/// Room addressed by a REST path.
#[derive(Debug, Deserialize, IntoParams, Validate)]
#[into_params(parameter_in = Path)]
pub struct RoomPath {
    /// Room key.
    #[validate(custom(function = "validate_room_key"))]
    pub key: String,
}

/// Request a session token for a member of a room.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SessionRequest {
    /// Display name; matched case-insensitively against existing members.
    #[validate(custom(function = "validate_user_name"))]
    pub name: String,
}

/// Token to present when opening the room WebSocket.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    /// Room the token is bound to.
    pub room: String,
    /// Member name the token is bound to.
    pub name: String,
    /// Opaque token for the `/ws` handshake.
    pub token: String,
    /// RFC 3339 expiry.
    pub expires_at: String,
}

impl SessionResponse {
    /// Wrap an issued token for the response body.
    pub fn new(room: String, name: String, token: SessionToken) -> Self {
        Self {
            room,
            name,
            token: token.token,
            expires_at: format_timestamp_ms(token.expires_at_ms),
        }
    }
}

/// Query string of `GET /ws`.
#[derive(Debug, Deserialize, IntoParams, Validate)]
#[into_params(parameter_in = Query)]
pub struct WsConnectParams {
    /// Room key.
    #[validate(custom(function = "validate_room_key"))]
    pub room: String,
    /// Member name the token was issued for.
    #[validate(custom(function = "validate_user_name"))]
    pub name: String,
    /// Session token from `POST /rooms/{key}/sessions`.
    #[validate(length(min = 1, max = 128))]
    pub token: String,
}
