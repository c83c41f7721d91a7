//! Library crate for planning-poker-back, exposing modules for the binary and integration tests.

/// Runtime configuration loaded from JSON.
pub mod config;
/// Room repository and storage errors.
pub mod dao;
/// Wire types for REST and WebSocket clients.
pub mod dto;
/// Service and HTTP error types.
pub mod error;
/// HTTP routes.
pub mod routes;
/// Room coordination and request services.
pub mod services;
/// Room domain state and its transitions.
pub mod state;
