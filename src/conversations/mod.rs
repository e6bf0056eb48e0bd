//! Conversation history, outbound messaging and delivery tracking.

pub mod classify;
pub mod compose;
pub mod handlers;
pub mod service;
pub mod store;
pub mod thread;
pub mod types;

pub use handlers::configure_conversations_routes;
pub use service::{ConversationError, ConversationService};
