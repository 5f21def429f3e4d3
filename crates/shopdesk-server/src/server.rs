use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use shopdesk_messenger::WebhookHandler;
use shopdesk_store::items::Item;
use shopdesk_store::users::User;
use shopdesk_store::{Database, EntityRegistry, Repository};
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;

/// Server configuration.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Mount point for the API routes; `/health` stays at the root.
    pub api_prefix: String,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            api_prefix: "/api/v1".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub items: Repository<Item>,
    pub users: Repository<User>,
    pub webhook: WebhookHandler,
    pub verify_token: Arc<str>,
}

impl AppState {
    pub fn new(
        db: Database,
        registry: Arc<EntityRegistry>,
        webhook: WebhookHandler,
        verify_token: &str,
    ) -> Self {
        Self {
            items: Repository::new(db.clone(), Arc::clone(&registry)),
            users: Repository::new(db, registry),
            webhook,
            verify_token: Arc::from(verify_token),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState, api_prefix: &str, request_timeout_secs: u64) -> Router {
    let api = Router::new()
        .route("/items", get(handlers::list_items).post(handlers::create_item))
        .route(
            "/items/{id}",
            get(handlers::get_item)
                .put(handlers::update_item)
                .patch(handlers::patch_item)
                .delete(handlers::delete_item),
        )
        .route("/items/{id}/clone", post(handlers::clone_item))
        .route("/users", get(handlers::list_users))
        .route("/users/{id}", get(handlers::get_user))
        .route(
            "/webhook",
            get(handlers::verify_webhook).post(handlers::receive_webhook),
        );

    let prefix = api_prefix.trim_end_matches('/');
    let router = Router::new().route("/health", get(handlers::health));
    let router = if prefix.is_empty() {
        router.merge(api)
    } else {
        router.nest(prefix, api)
    };

    router
        .with_state(state)
        .layer(TimeoutLayer::new(Duration::from_secs(request_timeout_secs)))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind the listener and serve in the background.
pub async fn start(config: ServerConfig, state: AppState) -> Result<ServerHandle, std::io::Error> {
    let router = build_router(state, &config.api_prefix, config.request_timeout_secs);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(
        port = local_addr.port(),
        prefix = %config.api_prefix,
        "Shopdesk server started"
    );

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "server stopped");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server_handle,
    })
}

/// Handle returned by `start()`; dropping it does not stop the server.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_state;

    async fn start_local(api_prefix: &str) -> (ServerHandle, String) {
        let (state, _) = test_state();
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            api_prefix: api_prefix.to_string(),
            request_timeout_secs: 5,
        };
        let handle = start(config, state).await.unwrap();
        let base = format!("http://127.0.0.1:{}", handle.port);
        (handle, base)
    }

    #[tokio::test]
    async fn health_answers_on_an_ephemeral_port() {
        let (handle, base) = start_local("/api/v1").await;
        assert_ne!(handle.port, 0);

        let health: serde_json::Value = reqwest::get(format!("{base}/health"))
            .await
            .unwrap()
            .error_for_status()
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health, serde_json::json!({"status": "healthy"}));
    }

    #[tokio::test]
    async fn prefix_is_applied_to_api_routes() {
        let (_handle, base) = start_local("/shop/").await;

        let page: serde_json::Value = reqwest::get(format!("{base}/shop/items"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(page["total"], 0);

        let unprefixed = reqwest::get(format!("{base}/items")).await.unwrap();
        assert_eq!(unprefixed.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[test]
    fn build_router_with_empty_prefix() {
        let (state, _) = test_state();
        let _router = build_router(state, "", 5);
    }
}
