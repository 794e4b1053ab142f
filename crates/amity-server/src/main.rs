use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use amity_api::auth::{self, AppState, AppStateInner};
use amity_api::friends;
use amity_api::messages;
use amity_api::middleware::require_auth;
use amity_gateway::connection::{self, Gateway};
use amity_gateway::registry::ConnectionRegistry;
use amity_gateway::router::MessageRouter;
use amity_gateway::session::SessionStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "amity=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let db_path = std::env::var("AMITY_DB_PATH").unwrap_or_else(|_| "amity.db".into());
    let host = std::env::var("AMITY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("AMITY_PORT")
        .unwrap_or_else(|_| "5000".into())
        .parse()?;
    let session_ttl_hours: i64 = std::env::var("AMITY_SESSION_TTL_HOURS")
        .unwrap_or_else(|_| "24".into())
        .parse()?;

    // Init database
    let db = Arc::new(amity_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let sessions = SessionStore::new(db.clone());
    let registry = ConnectionRegistry::new();
    let router = MessageRouter::new(db.clone(), registry.clone());

    let state: AppState = Arc::new(AppStateInner {
        db,
        sessions,
        registry,
        router,
        session_ttl: chrono::Duration::hours(session_ttl_hours),
    });

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/check", get(auth::check))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/auth/bio", put(auth::update_bio))
        .route("/auth/password", put(auth::update_password))
        .route("/users", get(friends::list_users))
        .route("/friend-request", post(friends::send_friend_request))
        .route("/friend-requests", get(friends::list_friend_requests))
        .route("/friend-request/{request_id}", put(friends::respond_friend_request))
        .route("/friends", get(friends::list_friends))
        .route("/messages/{friend_id}", get(messages::get_private_messages))
        .route("/messages/{friend_id}", post(messages::send_private_message))
        .route("/global", get(messages::get_global_messages))
        .route("/global", post(messages::send_global_message))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state.clone());

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Amity server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let gateway = Gateway {
        db: state.db.clone(),
        sessions: state.sessions.clone(),
        registry: state.registry.clone(),
        router: state.router.clone(),
    };
    ws.on_upgrade(move |socket| connection::handle_connection(socket, gateway))
}
