use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::{Chunk, ChunkStream};
use crate::error::Result;

/// Receives re-rendered text after every chunk.
pub trait Renderer: Send {
    fn section_started(&mut self, _index: usize, _heading: &str) {}

    /// Full reasoning so far, already formatted as a blockquote.
    fn reasoning(&mut self, quoted: &str);

    /// Full answer so far, verbatim.
    fn answer(&mut self, text: &str);
}

/// Renderer that discards everything, for callers that only need the final text.
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn reasoning(&mut self, _quoted: &str) {}
    fn answer(&mut self, _text: &str) {}
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamOutcome {
    pub reasoning: String,
    pub answer: String,
    /// Chunks taken off the stream and applied.
    pub chunks: usize,
    pub cancelled: bool,
}

/// Prefixes every line with `> ` so reasoning renders as a Markdown blockquote.
pub fn format_reasoning_as_quote(reasoning: &str) -> String {
    if reasoning.is_empty() {
        return String::new();
    }
    reasoning
        .split('\n')
        .map(|line| format!("> {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Drains `stream` into a [`StreamOutcome`], re-rendering on every chunk.
///
/// The token is checked once per received chunk. Once it is cancelled the
/// remaining chunks are left unread and whatever was accumulated is returned.
pub async fn accumulate(
    mut stream: ChunkStream,
    cancel: &CancellationToken,
    renderer: &mut dyn Renderer,
) -> Result<StreamOutcome> {
    let mut outcome = StreamOutcome::default();

    while let Some(chunk) = stream.next().await {
        if cancel.is_cancelled() {
            debug!(chunks = outcome.chunks, "Stop requested, abandoning stream");
            outcome.cancelled = true;
            break;
        }
        match chunk? {
            Chunk::Reasoning(text) => {
                outcome.reasoning.push_str(&text);
                renderer.reasoning(&format_reasoning_as_quote(&outcome.reasoning));
            }
            Chunk::Answer(text) => {
                outcome.answer.push_str(&text);
                renderer.answer(&outcome.answer);
            }
            Chunk::Empty => {}
        }
        outcome.chunks += 1;
    }

    Ok(outcome)
}
