pub mod chat;
pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod history;
pub mod logging;
pub mod markdown;
pub mod prompts;
pub mod session;
pub mod stream;
pub mod web_server;

pub use client::{ChatMessage, Chunk, CompletionBackend, DeepSeekClient, Role};
pub use config::{AppConfig, ConfigArgs};
pub use error::{AnalystError, Result};
pub use session::{ExchangeOutcome, Session, StopSignal};
