//! HTTP handlers

pub mod ai;
pub mod auth;
pub mod conversations;
pub mod messages;

// Auth handlers
pub use auth::{login, me, refresh, register};

// Conversation handlers
pub use conversations::{
    create_group, create_one_to_one, get_conversation, join_group, list_conversations,
    list_groups,
};

// Message handlers
pub use messages::{conversation_messages, send_message};

// AI assist handlers
pub use ai::{conversation_summary, grammar_correct, quick_replies};
