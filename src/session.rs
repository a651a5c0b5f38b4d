//! Per-user conversation state and the two exchange handlers.
//!
//! A [`Session`] is owned by exactly one client connection (or one terminal)
//! and is driven by one call stack at a time. The only thing shared with the
//! outside is the [`StopSignal`], so a stop button can be honored while an
//! exchange is streaming.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::client::{ChatMessage, CompletionBackend};
use crate::config::AppConfig;
use crate::error::{AnalystError, Result};
use crate::history::{history_view, AnalysisSection, HistoryEntryView, HistoryRecord};
use crate::logging::{GenerationLog, LogStatus};
use crate::prompts::logged_input;
use crate::stream::{accumulate, Renderer, StreamOutcome};

const CONVERSATION_STEP: &str = "conversation";

/// Cooperative stop flag. Each exchange gets a fresh token; raising it cancels
/// only the exchange currently in flight.
#[derive(Clone, Default)]
pub struct StopSignal {
    current: Arc<Mutex<CancellationToken>>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a fresh token and returns it.
    pub fn reset(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = token.clone();
        token
    }

    pub fn raise(&self) {
        self.token().cancel();
    }

    pub fn token(&self) -> CancellationToken {
        self.current.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_raised(&self) -> bool {
        self.token().is_cancelled()
    }
}

#[derive(Debug, Clone)]
pub struct SessionState {
    pub messages: Vec<ChatMessage>,
    pub is_first_message: bool,
    pub history: Vec<HistoryRecord>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self { messages: Vec::new(), is_first_message: true, history: Vec::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// Every pipeline step finished; the summary was appended and recorded in history.
    Analysis { summary: String },
    /// The first-message pipeline was stopped; nothing was committed.
    AnalysisCancelled,
    /// A follow-up answer was appended, possibly cut short by a stop.
    Conversation { response: String, cancelled: bool },
}

pub struct Session {
    id: Uuid,
    backend: Arc<dyn CompletionBackend>,
    config: Arc<AppConfig>,
    state: SessionState,
    stop: StopSignal,
}

impl Session {
    pub fn new(backend: Arc<dyn CompletionBackend>, config: Arc<AppConfig>) -> Self {
        Self {
            id: Uuid::new_v4(),
            backend,
            config,
            state: SessionState::default(),
            stop: StopSignal::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.state.messages
    }

    pub fn history(&self) -> &[HistoryRecord] {
        &self.state.history
    }

    pub fn is_first_message(&self) -> bool {
        self.state.is_first_message
    }

    pub fn history_view(&self) -> Vec<HistoryEntryView> {
        history_view(&self.state.history)
    }

    /// Handle for the stop button; clone it into whatever observes user input.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Clears the conversation. History survives.
    pub fn new_conversation(&mut self) {
        info!(session = %self.id, "Starting new conversation");
        self.state.messages.clear();
        self.state.is_first_message = true;
    }

    #[instrument(skip_all, fields(session = %self.id))]
    pub async fn send(&mut self, text: &str, renderer: &mut dyn Renderer) -> Result<ExchangeOutcome> {
        if text.trim().is_empty() {
            return Err(AnalystError::EmptyInput);
        }
        let cancel = self.stop.reset();
        if self.state.is_first_message {
            self.handle_first_message(text, &cancel, renderer).await
        } else {
            self.handle_regular_message(text, &cancel, renderer).await
        }
    }

    async fn handle_first_message(
        &mut self,
        news: &str,
        cancel: &CancellationToken,
        renderer: &mut dyn Renderer,
    ) -> Result<ExchangeOutcome> {
        let config = Arc::clone(&self.config);
        let pipeline = &config.pipeline;
        let prompts = pipeline.render_prompts(news)?;
        let mut answers: Vec<String> = Vec::with_capacity(pipeline.steps.len());
        let mut sections = Vec::with_capacity(pipeline.steps.len());

        for (index, step) in pipeline.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            renderer.section_started(index, &step.heading);
            let messages = pipeline.messages_for_step(index, &prompts, &answers);
            let outcome = self.run_step(&step.tag, &messages, &logged_input(&messages), cancel, renderer).await?;
            if outcome.cancelled {
                break;
            }
            sections.push(AnalysisSection {
                tag: step.tag.clone(),
                heading: step.heading.clone(),
                analysis: outcome.answer.clone(),
                reasoning: outcome.reasoning,
            });
            answers.push(outcome.answer);
        }

        if cancel.is_cancelled() || sections.len() < pipeline.steps.len() {
            info!(completed_steps = sections.len(), "Analysis stopped, discarding partial output");
            return Ok(ExchangeOutcome::AnalysisCancelled);
        }

        let summary = pipeline.summarize(&answers);
        self.state.messages.push(ChatMessage::user(news));
        self.state.messages.push(ChatMessage::assistant(summary.clone()));
        self.state.history.push(HistoryRecord::new(news, sections));
        self.state.is_first_message = false;
        Ok(ExchangeOutcome::Analysis { summary })
    }

    async fn handle_regular_message(
        &mut self,
        text: &str,
        cancel: &CancellationToken,
        renderer: &mut dyn Renderer,
    ) -> Result<ExchangeOutcome> {
        let prior = &self.state.messages;
        let start = match self.config.max_context_messages {
            Some(limit) => prior.len().saturating_sub(limit),
            None => 0,
        };
        let mut messages = prior[start..].to_vec();
        messages.push(ChatMessage::user(text));

        let outcome = self.run_step(CONVERSATION_STEP, &messages, text, cancel, renderer).await?;
        if outcome.cancelled {
            warn!(chars = outcome.answer.chars().count(), "Follow-up stopped, keeping partial response");
        }

        self.state.messages.push(ChatMessage::user(text));
        self.state.messages.push(ChatMessage::assistant(outcome.answer.clone()));
        Ok(ExchangeOutcome::Conversation { response: outcome.answer, cancelled: outcome.cancelled })
    }

    /// One streamed request: open, accumulate, log.
    ///
    /// A step stopped before it processed any chunk is not logged.
    async fn run_step(
        &self,
        step: &str,
        messages: &[ChatMessage],
        input: &str,
        cancel: &CancellationToken,
        renderer: &mut dyn Renderer,
    ) -> Result<StreamOutcome> {
        if cancel.is_cancelled() {
            return Ok(StreamOutcome { cancelled: true, ..Default::default() });
        }

        let model = &self.config.model;
        let started = Instant::now();
        info!(step, "Requesting completion");
        let stream = self.backend.stream_chat(model, messages).await?;
        let outcome = accumulate(stream, cancel, renderer).await?;
        let duration = started.elapsed();

        if !outcome.cancelled || outcome.chunks > 0 {
            GenerationLog::new(
                step,
                input,
                &outcome.answer,
                &outcome.reasoning,
                model,
                duration,
                LogStatus::Success,
            )
            .emit();
        }
        info!(step, chunks = outcome.chunks, cancelled = outcome.cancelled, elapsed = ?duration, "Completion finished");
        Ok(outcome)
    }
}
