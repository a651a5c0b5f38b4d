use chrono::Local;
use serde::Serialize;

use crate::constants::HISTORY_PREVIEW_CHARS;
use crate::logging::truncate_chars;
use crate::markdown::render_markdown;
use crate::stream::format_reasoning_as_quote;

/// Output of one pipeline step as kept in history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisSection {
    pub tag: String,
    pub heading: String,
    pub analysis: String,
    pub reasoning: String,
}

/// A completed first-message analysis. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryRecord {
    pub timestamp: String,
    pub news: String,
    pub sections: Vec<AnalysisSection>,
}

impl HistoryRecord {
    pub fn new(news: impl Into<String>, sections: Vec<AnalysisSection>) -> Self {
        Self {
            timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            news: news.into(),
            sections,
        }
    }

    pub fn section(&self, tag: &str) -> Option<&AnalysisSection> {
        self.sections.iter().find(|s| s.tag == tag)
    }

    pub fn impact_analysis(&self) -> Option<&str> {
        self.section("impact_analysis").map(|s| s.analysis.as_str())
    }

    pub fn impact_reasoning(&self) -> Option<&str> {
        self.section("impact_analysis").map(|s| s.reasoning.as_str())
    }

    pub fn risk_analysis(&self) -> Option<&str> {
        self.section("risk_analysis").map(|s| s.analysis.as_str())
    }

    pub fn risk_reasoning(&self) -> Option<&str> {
        self.section("risk_analysis").map(|s| s.reasoning.as_str())
    }
}

pub fn news_preview(news: &str) -> String {
    truncate_chars(news, HISTORY_PREVIEW_CHARS)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionView {
    pub heading: String,
    pub reasoning_quote: String,
    pub analysis: String,
    pub reasoning_html: String,
    pub analysis_html: String,
}

/// One row of the history browser: a collapsed preview plus the full expansion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntryView {
    /// 1-based position, most recent first.
    pub number: usize,
    pub timestamp: String,
    pub preview: String,
    pub sections: Vec<SectionView>,
}

pub fn history_view(history: &[HistoryRecord]) -> Vec<HistoryEntryView> {
    history
        .iter()
        .rev()
        .enumerate()
        .map(|(i, record)| HistoryEntryView {
            number: i + 1,
            timestamp: record.timestamp.clone(),
            preview: news_preview(&record.news),
            sections: record
                .sections
                .iter()
                .map(|s| {
                    let reasoning_quote = format_reasoning_as_quote(&s.reasoning);
                    SectionView {
                        heading: s.heading.clone(),
                        reasoning_html: render_markdown(&reasoning_quote),
                        reasoning_quote,
                        analysis_html: render_markdown(&s.analysis),
                        analysis: s.analysis.clone(),
                    }
                })
                .collect(),
        })
        .collect()
}
