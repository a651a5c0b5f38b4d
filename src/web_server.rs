use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
    serve, Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use minijinja::{path_loader, Environment};
use minijinja_autoreload::AutoReloader;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info, warn, Instrument};

use crate::client::{ChatMessage, CompletionBackend, Role};
use crate::config::AppConfig;
use crate::history::HistoryEntryView;
use crate::markdown::render_markdown;
use crate::session::{ExchangeOutcome, Session};
use crate::stream::Renderer;

/// Commands sent by the browser over `/ws`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    Send { text: String },
    Stop,
    NewConversation,
}

/// Events pushed to the browser over `/ws`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Info { message: String },
    Conversation { messages: Vec<MessageView>, is_first_message: bool },
    History { entries: Vec<HistoryEntryView> },
    ExchangeStarted { analysis: bool },
    SectionStarted { index: usize, heading: String },
    Reasoning { section: usize, html: String },
    Answer { section: usize, html: String },
    ExchangeFinished { outcome: &'static str },
    Error { message: String },
}

/// A committed conversation message with its content rendered for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageView {
    pub role: Role,
    pub content: String,
    pub html: String,
}

impl From<&ChatMessage> for MessageView {
    fn from(message: &ChatMessage) -> Self {
        Self { role: message.role, content: message.content.clone(), html: render_markdown(&message.content) }
    }
}

// Shared application state. Conversation state is per connection, never here.
#[derive(Clone)]
pub struct AppState {
    templates: Arc<AutoReloader>,
    backend: Arc<dyn CompletionBackend>,
    config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(backend: Arc<dyn CompletionBackend>, config: Arc<AppConfig>) -> Self {
        let templates = create_minijinja_env(config.template_dir.clone());
        Self { templates: Arc::new(templates), backend, config }
    }
}

// Minijinja Environment setup
fn create_minijinja_env(template_dir: PathBuf) -> AutoReloader {
    AutoReloader::new(move |notifier| {
        let mut env = Environment::new();
        env.set_loader(path_loader(&template_dir));
        notifier.watch_path(&template_dir, true);
        Ok(env)
    })
}

async fn index_handler(State(state): State<AppState>) -> Result<Html<String>, (StatusCode, Html<String>)> {
    state
        .templates
        .acquire_env()
        .and_then(|env| {
            env.get_template("index.html").and_then(|tmpl| {
                let context = minijinja::context! {
                    title => "A股新闻分析助手",
                    model => state.config.model.as_str(),
                };
                tmpl.render(context)
            })
        })
        .map(Html)
        .map_err(|e| {
            error!("Failed to get or render template: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, Html(format!("Internal Server Error: {}", e)))
        })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("WebSocket connection upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Streams re-rendered text of the running exchange to one browser.
struct SocketRenderer {
    events: mpsc::UnboundedSender<ServerEvent>,
    section: usize,
}

impl Renderer for SocketRenderer {
    fn section_started(&mut self, index: usize, heading: &str) {
        self.section = index;
        let _ = self.events.send(ServerEvent::SectionStarted { index, heading: heading.to_string() });
    }

    fn reasoning(&mut self, quoted: &str) {
        let _ = self.events.send(ServerEvent::Reasoning { section: self.section, html: render_markdown(quoted) });
    }

    fn answer(&mut self, text: &str) {
        let _ = self.events.send(ServerEvent::Answer { section: self.section, html: render_markdown(text) });
    }
}

fn outcome_label(outcome: &ExchangeOutcome) -> &'static str {
    match outcome {
        ExchangeOutcome::Analysis { .. } => "analysis",
        ExchangeOutcome::AnalysisCancelled => "analysis_cancelled",
        ExchangeOutcome::Conversation { cancelled: false, .. } => "conversation",
        ExchangeOutcome::Conversation { cancelled: true, .. } => "conversation_cancelled",
    }
}

fn send_snapshot(session: &Session, events: &mpsc::UnboundedSender<ServerEvent>) {
    let _ = events.send(ServerEvent::Conversation {
        messages: session.messages().iter().map(MessageView::from).collect(),
        is_first_message: session.is_first_message(),
    });
    let _ = events.send(ServerEvent::History { entries: session.history_view() });
}

/// Processes queued commands one at a time; exchanges never overlap within a session.
async fn run_session(
    mut session: Session,
    mut commands: mpsc::UnboundedReceiver<ClientCommand>,
    events: mpsc::UnboundedSender<ServerEvent>,
) {
    send_snapshot(&session, &events);

    while let Some(command) = commands.recv().await {
        match command {
            ClientCommand::Send { text } => {
                if text.trim().is_empty() {
                    continue;
                }
                let _ = events.send(ServerEvent::ExchangeStarted { analysis: session.is_first_message() });
                let mut renderer = SocketRenderer { events: events.clone(), section: 0 };
                match session.send(&text, &mut renderer).await {
                    Ok(outcome) => {
                        let _ = events.send(ServerEvent::ExchangeFinished { outcome: outcome_label(&outcome) });
                    }
                    Err(e) => {
                        error!("Exchange failed: {}", e);
                        let _ = events.send(ServerEvent::Error { message: format!("处理失败: {}", e) });
                        let _ = events.send(ServerEvent::ExchangeFinished { outcome: "error" });
                    }
                }
                send_snapshot(&session, &events);
            }
            ClientCommand::NewConversation => {
                session.new_conversation();
                send_snapshot(&session, &events);
            }
            // Stop is applied by the socket reader; a queued one has nothing left to stop.
            ClientCommand::Stop => {}
        }
    }
}

// Handle individual WebSocket connections
async fn handle_socket(socket: WebSocket, state: AppState) {
    let session = Session::new(state.backend.clone(), state.config.clone());
    let session_id = session.id();
    let stop = session.stop_signal();
    let span = tracing::info_span!("ws", session = %session_id);
    info!(parent: &span, "New WebSocket connection established");

    let (mut sink, mut incoming) = socket.split();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ServerEvent>();
    let (command_tx, command_rx) = mpsc::unbounded_channel::<ClientCommand>();

    let writer = tokio::spawn(
        async move {
            while let Some(event) = event_rx.recv().await {
                match serde_json::to_string(&event) {
                    Ok(json) => {
                        if sink.send(Message::Text(json)).await.is_err() {
                            warn!("WebSocket client disconnected or send error");
                            break;
                        }
                    }
                    Err(e) => error!("Failed to serialize server event: {}", e),
                }
            }
        }
        .instrument(span.clone()),
    );

    let _ = event_tx.send(ServerEvent::Info { message: "已连接".to_string() });
    let session_task = tokio::spawn(run_session(session, command_rx, event_tx).instrument(span.clone()));

    while let Some(Ok(msg)) = incoming.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                Ok(ClientCommand::Stop) => {
                    info!(parent: &span, "Stop requested");
                    stop.raise();
                }
                Ok(command) => {
                    if command_tx.send(command).is_err() {
                        break;
                    }
                }
                Err(e) => warn!(parent: &span, "Ignoring malformed client command: {}", e),
            },
            Message::Binary(_) => warn!(parent: &span, "Received unexpected binary message from client"),
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => {
                info!(parent: &span, "Client requested WebSocket close");
                break;
            }
        }
    }

    // Abandon any in-flight exchange at its next chunk and let the tasks drain.
    stop.raise();
    drop(command_tx);
    if let Err(e) = session_task.await {
        error!(parent: &span, "Session task failed: {:?}", e);
    }
    let _ = writer.await;
    info!(parent: &span, "WebSocket connection closed");
}

pub fn build_router(state: AppState) -> Router {
    let static_files_service = ServeDir::new(&state.config.static_dir).not_found_service(tower::service_fn(|_| async {
        Ok::<_, Infallible>((StatusCode::NOT_FOUND, "Not Found").into_response())
    }));

    Router::new()
        .route("/", get(index_handler))
        .route("/ws", get(ws_handler))
        .nest_service("/static", static_files_service)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_web_server(port: u16, state: AppState) -> Result<()> {
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Web server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;

    serve(listener, app.into_make_service()).await.context("Web server failed")?;

    Ok(())
}
