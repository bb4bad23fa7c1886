pub mod health;
pub mod hub;

use axum::Router;
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::config::Config;
use crate::AppState;

pub fn router(config: &Config) -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(crate::gateway::server::router(config.handshake_timeout))
        .nest("/api/v1", hub::router())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        hub::get_stats,
        hub::list_online,
        hub::list_history,
        hub::get_message,
    ),
    components(
        schemas(
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            crate::gateway::events::HubMessage,
            crate::gateway::events::MessageType,
            crate::gateway::events::MessageStatus,
            crate::gateway::events::OnlineUser,
            crate::gateway::stats::StatsSnapshot,
            health::HealthResponse,
            hub::OnlineSession,
            hub::OnlineUsersResponse,
            hub::HistoryResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Hub", description = "Live connection, presence and history queries"),
    )
)]
pub struct ApiDoc;
