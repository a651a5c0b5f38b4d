// Defaults resolved once from the environment. CLI flags in `config` override them.

use std::env;

/// Environment variable holding the API credential. Never defaulted.
pub const API_KEY_ENV: &str = "DEEPSEEK_API_KEY";

/// Log strings longer than this many characters are cut and suffixed with [`ELLIPSIS`].
pub const LOG_TRUNCATE_CHARS: usize = 500;
/// Collapsed history entries show at most this many characters of the news text.
pub const HISTORY_PREVIEW_CHARS: usize = 200;
pub const ELLIPSIS: &str = "...";

/// Daily generation log files are named `stock_analysis.YYYY-MM-DD.log`.
pub const GENERATION_LOG_PREFIX: &str = "stock_analysis";
pub const GENERATION_LOG_SUFFIX: &str = "log";
/// Tracing target carrying one JSON generation record per event.
pub const GENERATION_TARGET: &str = "generation";

pub const DEFAULT_PORT: u16 = 9900;

lazy_static::lazy_static! {
    pub static ref DEEPSEEK_BASE_URL: String = env::var("DEEPSEEK_BASE_URL").unwrap_or_else(|_| "https://api.deepseek.com".to_string());
    pub static ref DEEPSEEK_MODEL: String = env::var("DEEPSEEK_MODEL").unwrap_or_else(|_| "deepseek-reasoner".to_string());
    pub static ref LOG_DIR: String = env::var("ANALYST_LOG_DIR").unwrap_or_else(|_| "logs".to_string());
    pub static ref TEMPLATE_DIR: String = env::var("ANALYST_TEMPLATE_DIR").unwrap_or_else(|_| "templates".to_string());
    pub static ref STATIC_DIR: String = env::var("ANALYST_STATIC_DIR").unwrap_or_else(|_| "static".to_string());
}
