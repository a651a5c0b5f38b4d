use std::env;
use std::path::PathBuf;

use crate::constants::{self, API_KEY_ENV};
use crate::error::{AnalystError, Result};
use crate::prompts::AnalysisPipeline;

/// Command-line overrides shared by every subcommand.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    #[arg(long, help = "Chat completion base URL (default: $DEEPSEEK_BASE_URL or https://api.deepseek.com).")]
    pub base_url: Option<String>,
    #[arg(long, help = "Model identifier (default: $DEEPSEEK_MODEL or deepseek-reasoner).")]
    pub model: Option<String>,
    #[arg(long, help = "Directory for daily generation logs.")]
    pub log_dir: Option<PathBuf>,
    #[arg(long, help = "Directory holding index.html.")]
    pub template_dir: Option<PathBuf>,
    #[arg(long, help = "Only resend the last N messages as context on follow-up questions.")]
    pub max_context_messages: Option<usize>,
    #[arg(long, help = "JSON file describing the analysis steps run for the first message.")]
    pub pipeline: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub log_dir: PathBuf,
    pub template_dir: PathBuf,
    pub static_dir: PathBuf,
    /// `None` resends the whole conversation on every follow-up.
    pub max_context_messages: Option<usize>,
    pub pipeline: AnalysisPipeline,
}

impl AppConfig {
    /// Resolves the configuration, failing before any request if the API key is missing.
    pub fn from_env(args: ConfigArgs) -> Result<Self> {
        let api_key = env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or(AnalystError::MissingApiKey)?;

        let pipeline = match &args.pipeline {
            Some(path) => AnalysisPipeline::from_json_file(path)?,
            None => AnalysisPipeline::default(),
        };

        Ok(Self {
            api_key,
            base_url: args.base_url.unwrap_or_else(|| constants::DEEPSEEK_BASE_URL.clone()),
            model: args.model.unwrap_or_else(|| constants::DEEPSEEK_MODEL.clone()),
            log_dir: args.log_dir.unwrap_or_else(|| PathBuf::from(constants::LOG_DIR.as_str())),
            template_dir: args
                .template_dir
                .unwrap_or_else(|| PathBuf::from(constants::TEMPLATE_DIR.as_str())),
            static_dir: PathBuf::from(constants::STATIC_DIR.as_str()),
            max_context_messages: args.max_context_messages,
            pipeline,
        })
    }

    /// Configuration for tests and embedding, without touching the environment.
    pub fn with_api_key(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: constants::DEEPSEEK_MODEL.clone(),
            log_dir: PathBuf::from(constants::LOG_DIR.as_str()),
            template_dir: PathBuf::from(constants::TEMPLATE_DIR.as_str()),
            static_dir: PathBuf::from(constants::STATIC_DIR.as_str()),
            max_context_messages: None,
            pipeline: AnalysisPipeline::default(),
        }
    }
}
