//! Duologue - a streaming relay for two-sided AI conversations.
//!
//! A browser front end stages a dialogue between two personas (`ai_left`
//! and `ai_right`). Each turn is posted to `/chat`, turned into a chat
//! completion request for an OpenAI-compatible backend and relayed back
//! as server-sent events.

pub mod config;
pub mod error;
pub mod handlers;
pub mod llm;
pub mod prompt;
pub mod relay;
pub mod server;
