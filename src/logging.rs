//! Tracing setup and the structured generation log.
//!
//! Every finished model call produces one JSON line on the `generation` target.
//! That target is written bare to a daily file under the log directory and is
//! mirrored to the console together with ordinary diagnostics.

use std::path::Path;
use std::time::Duration;

use chrono::Local;
use serde::Serialize;
use tracing::{error, info, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::constants::{
    ELLIPSIS, GENERATION_LOG_PREFIX, GENERATION_LOG_SUFFIX, GENERATION_TARGET, LOG_TRUNCATE_CHARS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Success,
    CriticalError,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelParameters {
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationLog {
    pub timestamp: String,
    pub step: String,
    pub input: String,
    pub output: String,
    pub reasoning: String,
    pub model_parameters: ModelParameters,
    pub duration_seconds: f64,
    pub status: LogStatus,
}

impl GenerationLog {
    pub fn new(
        step: &str,
        input: &str,
        output: &str,
        reasoning: &str,
        model: &str,
        duration: Duration,
        status: LogStatus,
    ) -> Self {
        Self {
            timestamp: Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            step: step.to_string(),
            input: truncate_for_log(input),
            output: truncate_for_log(output),
            reasoning: truncate_for_log(reasoning),
            model_parameters: ModelParameters { model: model.to_string() },
            duration_seconds: duration.as_secs_f64(),
            status,
        }
    }

    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Writes the record to the generation target. Failures are reported, never raised.
    pub fn emit(&self) {
        match self.to_json_line() {
            Ok(line) => info!(target: GENERATION_TARGET, "{}", line),
            Err(e) => error!(step = %self.step, "Failed to log generation: {}", e),
        }
    }
}

/// Keeps the first 500 characters and appends `...` when anything was cut.
pub fn truncate_for_log(text: &str) -> String {
    truncate_chars(text, LOG_TRUNCATE_CHARS)
}

pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}{}", &text[..cut], ELLIPSIS),
        None => text.to_string(),
    }
}

/// Installs the console and daily-file layers. Keep the guard alive for the
/// lifetime of the process or buffered lines are lost.
pub fn init_tracing(log_dir: &Path) -> std::io::Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(GENERATION_LOG_PREFIX)
        .filename_suffix(GENERATION_LOG_SUFFIX)
        .build(log_dir)
        .map_err(std::io::Error::other)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Reads log level from RUST_LOG (e.g., RUST_LOG=info,stock_news_analyst=debug)
    let console_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = tracing_subscriber::fmt::layer().with_filter(console_filter);

    let generation_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .without_time()
        .with_level(false)
        .with_target(false)
        .with_filter(Targets::new().with_target(GENERATION_TARGET, Level::INFO));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(generation_layer)
        .init();

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_strings_are_unchanged() {
        let exact: String = "a".repeat(500);
        assert_eq!(truncate_for_log(&exact), exact);
        assert_eq!(truncate_for_log(""), "");
    }

    #[test]
    fn test_long_strings_are_cut_by_characters() {
        let long: String = "股".repeat(501);
        let truncated = truncate_for_log(&long);
        assert_eq!(truncated.chars().count(), 503);
        assert!(truncated.starts_with(&"股".repeat(500)));
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn test_record_json_shape() {
        let record = GenerationLog::new(
            "impact_analysis",
            "新闻",
            "利好",
            "",
            "deepseek-reasoner",
            Duration::from_millis(1500),
            LogStatus::Success,
        );
        let value: serde_json::Value = serde_json::from_str(&record.to_json_line().unwrap()).unwrap();
        assert_eq!(value["step"], "impact_analysis");
        assert_eq!(value["input"], "新闻");
        assert_eq!(value["output"], "利好");
        assert_eq!(value["reasoning"], "");
        assert_eq!(value["model_parameters"]["model"], "deepseek-reasoner");
        assert_eq!(value["duration_seconds"], 1.5);
        assert_eq!(value["status"], "success");
        assert!(value["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_json_line_keeps_non_ascii() {
        let record = GenerationLog::new("app_startup", "应用启动", "boom", "", "m", Duration::ZERO, LogStatus::CriticalError);
        let line = record.to_json_line().unwrap();
        assert!(line.contains("应用启动"));
        assert!(line.contains("\"critical_error\""));
        assert!(!line.contains('\n'));
    }
}
