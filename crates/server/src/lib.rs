//! Convo Chat Server Library
//!
//! Realtime chat backend: JWT auth, one-to-one and group conversations,
//! persistent message history, WebSocket room fan-out, and AI-assisted
//! text features.

pub mod ai;
pub mod auth;
pub mod config;
pub mod ctx;
pub mod db;
pub mod directory;
pub mod error;
pub mod handlers;
pub mod models;
pub mod realtime;
pub mod store;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use ai::{DisabledGenerator, GenAiGenerator, TextAssist, TextGenerator};
use auth::middleware::mw_require_auth;
use auth::AuthManager;
use config::{AppState, ServerConfig};
use directory::ConversationDirectory;
use handlers::{
    conversation_messages, conversation_summary, create_group, create_one_to_one,
    get_conversation, grammar_correct, join_group, list_conversations, list_groups, login, me,
    quick_replies, refresh, register, send_message,
};
use realtime::{ws_handler, RoomRegistry};
use store::MessageStore;

pub async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        // Already set, ignore
    }

    info!("=== Convo Server ===");

    let config = ServerConfig::from_env();
    info!("Database: {:?}", config.database_path);

    let pool = db::connect(&config.database_path).await?;

    let auth_manager = Arc::new(AuthManager::new(pool.clone(), &config.jwt_secret).await?);
    let directory = Arc::new(ConversationDirectory::new(pool.clone()).await?);
    let message_store = Arc::new(MessageStore::new(pool).await?);
    let rooms = Arc::new(RoomRegistry::new());

    let generator: Arc<dyn TextGenerator> = if config.ai_enabled {
        Arc::new(GenAiGenerator::new(config.genai_model.clone()))
    } else {
        info!("[Assist] AI features disabled");
        Arc::new(DisabledGenerator)
    };
    let assist = Arc::new(TextAssist::new(generator, message_store.clone()));

    let app_state = AppState {
        auth: auth_manager,
        directory,
        store: message_store,
        rooms,
        assist,
    };

    let app = build_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Full route table. Everything below the middleware line needs a bearer
/// token; the WebSocket authenticates itself via its token query param.
pub fn build_router(app_state: AppState) -> Router {
    let protected = Router::new()
        .route("/auth/refresh", post(refresh))
        .route("/auth/me", get(me))
        .route("/conversations/1to1", post(create_one_to_one))
        .route("/conversations/group", post(create_group))
        .route("/conversations", get(list_conversations))
        .route("/conversations/groups", get(list_groups))
        .route("/conversations/group/join", post(join_group))
        .route("/conversations/{id}", get(get_conversation))
        .route("/messages", post(send_message))
        .route("/messages/{conversation_id}", get(conversation_messages))
        .route("/ai/quick-replies", post(quick_replies))
        .route("/ai/grammar-correct", post(grammar_correct))
        .route("/ai/summary/{conversation_id}", get(conversation_summary))
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            mw_require_auth,
        ));

    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_check))
        .merge(protected)
        .with_state(app_state)
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

async fn health_check() -> &'static str {
    "OK - Convo Chat Server"
}
