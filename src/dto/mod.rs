/// Health check payloads.
pub mod health;
/// Session-token requests and WebSocket handshake parameters.
pub mod session;
/// Per-member room snapshot sent on join.
pub mod snapshot;
/// Custom validators for room keys and member names.
pub mod validation;
/// WebSocket commands and events.
pub mod ws;
