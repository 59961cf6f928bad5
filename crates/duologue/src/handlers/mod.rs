//! HTTP request handlers.

mod chat;
mod health;
mod settings;

pub use chat::{ChatBody, chat};
pub use health::{livez, readyz};
pub use settings::{ChatSettings, ConfigResponse, get_config};
