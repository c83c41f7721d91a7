/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Per-room actor owning state, sockets and transactions.
pub mod room_coordinator;
/// Room key to coordinator registry.
pub mod room_manager;
/// Session-token issuance and room lookups.
pub mod session_service;
/// WebSocket connection and message handling service.
pub mod websocket_service;
