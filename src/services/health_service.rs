use tracing::{debug, warn};

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report `ok` while the room repository answers, `degraded` otherwise.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    debug!(rooms = state.rooms().active_rooms(), "health check");
    match state.store().health_check().await {
        Ok(()) => HealthResponse::ok(),
        Err(err) => {
            warn!(error = %err, "storage health check failed");
            HealthResponse::degraded()
        }
    }
}
