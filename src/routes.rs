use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::{middleware, Router};
use std::sync::Arc;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

use crate::auth::accounts;
use crate::auth::middleware::JwtSecret;
use crate::channels::crud as channel_crud;
use crate::chat::{dm, messages};
use crate::files::MAX_UPLOAD_BYTES;
use crate::notify;
use crate::state::AppState;
use crate::users::profile;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Rate limiting: 5 requests per minute per IP on auth endpoints
    // Uses PeerIpKeyExtractor which reads from ConnectInfo<SocketAddr>
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(12) // 1 token every 12 seconds = 5 per minute
            .burst_size(5) // Allow burst of 5
            .finish()
            .expect("Failed to build governor config"),
    );
    let governor_limiter = governor_config.limiter().clone();

    // Spawn background task to clean up rate limiter state
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            governor_limiter.retain_recent();
        }
    });

    // Auth routes with rate limiting
    let auth_routes = Router::new()
        .route("/api/auth/register", axum::routing::post(accounts::register))
        .route("/api/auth/login", axum::routing::post(accounts::login))
        .layer(GovernorLayer {
            config: governor_config,
        });

    // SSO return leg: identity asserted by the fronting auth proxy,
    // so this stays outside the rate-limited password endpoints.
    let sso_routes =
        Router::new().route("/auth/sso/callback", axum::routing::get(accounts::sso_callback));

    // Authenticated routes (JWT required — Claims extractor validates token)
    let user_routes = Router::new()
        .route("/api/users/profile", axum::routing::get(profile::get_profile))
        .route("/api/users/profile", axum::routing::put(profile::update_profile))
        .route("/api/users", axum::routing::get(profile::list_users));

    let channel_routes = Router::new()
        .route("/api/channels", axum::routing::get(channel_crud::list_channels))
        .route("/api/channels", axum::routing::post(channel_crud::create_channel))
        .route(
            "/api/channels/{id}/join",
            axum::routing::post(channel_crud::join_channel),
        )
        .route(
            "/api/channels/{id}/messages",
            axum::routing::get(messages::get_channel_messages),
        )
        .route(
            "/api/channels/{id}/messages",
            axum::routing::post(messages::create_channel_message),
        );

    // Note: /api/messages/unread and /conversations MUST come before
    // /api/messages/{id}/... to avoid path param conflicts.
    let message_routes = Router::new()
        .route("/api/messages/unread", axum::routing::get(dm::get_unread_counts))
        .route(
            "/api/messages/conversations",
            axum::routing::get(dm::get_conversations),
        )
        .route(
            "/api/messages/private/{user_id}",
            axum::routing::get(dm::get_private_messages),
        )
        .route(
            "/api/messages/private/{user_id}",
            axum::routing::post(dm::create_private_message),
        )
        .route(
            "/api/messages/private/{user_id}/thread",
            axum::routing::post(dm::private_thread_reply),
        )
        .route(
            "/api/messages/{id}/thread",
            axum::routing::get(messages::get_thread),
        )
        .route(
            "/api/messages/{id}/thread/reply",
            axum::routing::post(messages::thread_reply),
        );

    let notification_routes = Router::new()
        .route("/api/notifications", axum::routing::get(notify::list_notifications))
        .route(
            "/api/notifications/read",
            axum::routing::put(notify::mark_notifications_read),
        );

    // WebSocket endpoint (auth via query param, not JWT header)
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    // Uploaded files, served statically
    let uploads_dir = std::path::Path::new(&state.data_dir).join("uploads");

    // CORS: the frontend origin only; bearer auth needs no credentials
    let cors = match state.frontend_origin.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any),
        Err(_) => CorsLayer::permissive(),
    };

    Router::new()
        .merge(auth_routes)
        .merge(sso_routes)
        .merge(user_routes)
        .merge(channel_routes)
        .merge(message_routes)
        .merge(notification_routes)
        .merge(ws_routes)
        .merge(health)
        .nest_service("/uploads", ServeDir::new(uploads_dir))
        // Uploads go through message/profile bodies — allow 10 MB + form overhead
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + 64 * 1024))
        .layer(cors)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
