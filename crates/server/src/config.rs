//! Server configuration and shared state

use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;

use crate::ai::TextAssist;
use crate::auth::AuthManager;
use crate::directory::ConversationDirectory;
use crate::realtime::RoomRegistry;
use crate::store::MessageStore;

/// Process configuration, read once from the environment at startup.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Listen port
    pub port: u16,
    /// SQLite database file
    pub database_path: PathBuf,
    /// HS256 signing secret for access and refresh tokens
    pub jwt_secret: String,
    /// Model passed to the genai client
    pub genai_model: String,
    /// AI assist features can be switched off entirely
    pub ai_enabled: bool,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(5000);

        let database_path = std::env::var("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("convo.sqlite"));

        let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| {
            warn!("JWT_SECRET not set, using development default");
            "defaultsecret".to_string()
        });

        let genai_model =
            std::env::var("GENAI_MODEL").unwrap_or_else(|_| "gpt-3.5-turbo".to_string());

        Self {
            port,
            database_path,
            jwt_secret,
            genai_model,
            ai_enabled: std::env::var("DISABLE_AI").is_err(),
        }
    }
}

/// App state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthManager>,
    pub directory: Arc<ConversationDirectory>,
    pub store: Arc<MessageStore>,
    pub rooms: Arc<RoomRegistry>,
    pub assist: Arc<TextAssist>,
}
