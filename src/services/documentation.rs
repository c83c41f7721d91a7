use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the planning-poker backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::rooms::create_session,
        crate::routes::rooms::list_tickets,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::session::SessionRequest,
            crate::dto::session::SessionResponse,
            crate::state::tickets::Ticket,
            crate::state::tickets::TicketStatus,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "rooms", description = "Session tokens and room data"),
        (name = "sockets", description = "WebSocket connection of room members"),
    )
)]
/// OpenAPI document of the HTTP surface.
pub struct ApiDoc;
