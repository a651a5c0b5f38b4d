//! Prompt templates and the step sequence run for the first message of a conversation.
//!
//! The pipeline is plain data: each step carries its own system preamble and a
//! minijinja template. Step 0 receives the news text as `input`; every later step
//! is sent after the full transcript of the steps before it.

use std::collections::HashSet;
use std::path::Path;

use minijinja::{context, Environment};
use serde::{Deserialize, Serialize};

use crate::client::ChatMessage;
use crate::error::{AnalystError, Result};

const IMPACT_TEMPLATE: &str = r#"
你是一位专业的金融分析师和A股市场专家。你的任务是分析新闻对A股市场的影响。

当用户提供新闻内容时，请给出以下分析结论：

1. 利好：
- 利好原因
- 受益行业
- 相关A股上市公司

2. 利空：
- 利空原因
- 受损行业

注意，如果新闻对A股影响不明显，请直接说明"影响有限"。

新闻内容：

{{ input }}
"#;

const RISK_TEMPLATE: &str = r#"
你是一位资深的风险分析师。现在需要你基于刚才的新闻对前期分析的利好行业和公司进行风险提示。

请从行业、公司及时间（短期和中长期）维度进行风险分析：

注意，保持客观专业，避免过度悲观；风险分析要有针对性，避免泛泛而谈；如果认为某项风险特别重要，请用"⚠️"标注

如果前期分析显示"影响有限"，则直接回复"无需进行风险分析"。
"#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStep {
    /// Step name used in generation logs and history lookups.
    pub tag: String,
    /// Markdown heading shown above this step's output.
    pub heading: String,
    pub system_preamble: String,
    pub template: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisPipeline {
    pub steps: Vec<PipelineStep>,
}

impl Default for AnalysisPipeline {
    fn default() -> Self {
        Self {
            steps: vec![
                PipelineStep {
                    tag: "impact_analysis".to_string(),
                    heading: "📊 利好分析".to_string(),
                    system_preamble: "你是一位专业的金融分析师和A股市场专家。".to_string(),
                    template: IMPACT_TEMPLATE.to_string(),
                },
                PipelineStep {
                    tag: "risk_analysis".to_string(),
                    heading: "⚠️ 风险提示".to_string(),
                    system_preamble: "你是一位资深的风险分析师。".to_string(),
                    template: RISK_TEMPLATE.to_string(),
                },
            ],
        }
    }
}

impl AnalysisPipeline {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let pipeline: Self = serde_json::from_str(&raw)?;
        pipeline.validate()?;
        Ok(pipeline)
    }

    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(AnalystError::Pipeline("at least one step is required".to_string()));
        }
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.tag.as_str()) {
                return Err(AnalystError::Pipeline(format!("duplicate step tag '{}'", step.tag)));
            }
        }
        Ok(())
    }

    /// Renders every step's user prompt against the news text.
    pub fn render_prompts(&self, news: &str) -> Result<Vec<String>> {
        let mut env = Environment::new();
        env.set_keep_trailing_newline(true);
        self.steps
            .iter()
            .map(|step| -> Result<String> { Ok(env.render_str(&step.template, context! { input => news })?) })
            .collect()
    }

    /// Builds the request for step `index` given the rendered prompts and the
    /// answers of all earlier steps.
    pub fn messages_for_step(&self, index: usize, prompts: &[String], answers: &[String]) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(&self.steps[index].system_preamble)];
        for (prompt, answer) in prompts.iter().zip(answers).take(index) {
            messages.push(ChatMessage::user(prompt));
            messages.push(ChatMessage::assistant(answer));
        }
        messages.push(ChatMessage::user(&prompts[index]));
        messages
    }

    /// Combines the step answers into the single assistant message kept in the conversation.
    pub fn summarize(&self, answers: &[String]) -> String {
        self.steps
            .iter()
            .zip(answers)
            .map(|(step, answer)| format!("### {}\n\n{}", step.heading, answer))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Text recorded as a step's input: the transcript without the system preamble.
pub fn logged_input(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .filter(|m| !m.role.is_system())
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
