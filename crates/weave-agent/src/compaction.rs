//! Conversation compaction
//!
//! When a conversation grows past the configured window, older history is
//! summarized into a single context message and spliced back in so that the
//! live window stays small. The message the current loop iteration is
//! anchored to always survives the splice.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use weave_ai::{Message, MessageId, ModelClient, ModelRequest, ModelResponse};

use crate::error::{Error, Result};
use crate::estimate::{HeuristicCounter, TokenCounter, estimate_tokens};
use crate::events::AgentEvent;
use crate::state::AgentState;

/// Configuration for context compaction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    /// Whether compaction is enabled
    pub enabled: bool,
    /// Compact once the history is estimated above this many tokens
    pub window_size: u32,
    /// Never compact with this many human messages or fewer
    pub min_human_messages: usize,
    /// Message budget of the window kept after compaction
    pub window_max_messages: usize,
    /// Token budget of the window kept after compaction
    pub window_max_tokens: u32,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_size: 64000,
            min_human_messages: 2,
            window_max_messages: 16,
            window_max_tokens: 2048,
        }
    }
}

/// Result of splicing a summary into a message sequence
#[derive(Debug, Clone)]
pub struct WindowUpdate {
    /// The rewritten sequence
    pub messages: Vec<Message>,
    /// Id the caller's anchor message now goes by
    pub start_id: MessageId,
    /// First message of the new live window (the summary)
    pub window_start_id: MessageId,
}

/// Walk newest to oldest under a message and token budget.
///
/// Returns the oldest human or assistant message that still fit, or `None`
/// when none did (for example when the newest message alone is over budget).
pub fn find_window_boundary(
    messages: &[Message],
    max_messages: usize,
    max_tokens: u32,
) -> Option<MessageId> {
    let mut messages_left = max_messages;
    let mut tokens_left = max_tokens;
    let mut boundary = None;

    for message in messages.iter().rev() {
        let tokens = estimate_tokens(message);
        if messages_left == 0 || tokens > tokens_left {
            break;
        }
        messages_left -= 1;
        tokens_left -= tokens;
        if message.is_anchor() {
            boundary = Some(message.id().clone());
        }
    }

    boundary
}

/// Whether `messages` should be compacted.
///
/// A conversation with `min_human_messages` or fewer human turns is never
/// compacted, whatever its size.
pub fn should_compact(
    messages: &[Message],
    counter: &dyn TokenCounter,
    config: &CompactionConfig,
) -> bool {
    if !config.enabled {
        return false;
    }
    let humans = messages.iter().filter(|m| m.is_human()).count();
    if humans <= config.min_human_messages {
        return false;
    }
    counter.count(messages) > config.window_size
}

/// Where a summary lands relative to the anchor message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Splice {
    /// Nothing fits: append the summary and a copy of the newest anchor
    Append,
    /// Anchor is inside the window: summary goes right before it
    BeforeStart,
    /// Anchor is older than the window: summary and an anchor copy go at the boundary
    AtBoundary(usize),
}

impl Splice {
    fn plan(messages: &[Message], start_idx: usize, config: &CompactionConfig) -> Self {
        let boundary = find_window_boundary(
            messages,
            config.window_max_messages,
            config.window_max_tokens,
        )
        .and_then(|id| messages.iter().position(|m| *m.id() == id));

        match boundary {
            None => Splice::Append,
            Some(boundary_idx) if start_idx >= boundary_idx => Splice::BeforeStart,
            Some(boundary_idx) => Splice::AtBoundary(boundary_idx),
        }
    }

    /// Index the summary is inserted at; everything before it leaves the window
    fn summary_index(self, len: usize, start_idx: usize) -> usize {
        match self {
            Splice::Append => len,
            Splice::BeforeStart => start_idx,
            Splice::AtBoundary(boundary_idx) => boundary_idx,
        }
    }
}

fn position_of(messages: &[Message], id: &MessageId) -> Result<usize> {
    messages
        .iter()
        .position(|m| m.id() == id)
        .ok_or_else(|| Error::Compaction(format!("start message {} not found", id)))
}

/// Splice `summary` into `messages` so the live window starts with it.
///
/// `start_id` stays resolvable in the returned sequence, either as the
/// original message or through the fresh copy reported in
/// [`WindowUpdate::start_id`].
pub fn update_window(
    messages: &[Message],
    summary: Message,
    start_id: &MessageId,
    config: &CompactionConfig,
) -> Result<WindowUpdate> {
    let start_idx = position_of(messages, start_id)?;
    let window_start_id = summary.id().clone();
    let mut out = messages.to_vec();

    let start_id = match Splice::plan(messages, start_idx, config) {
        Splice::Append => {
            // Nothing fits: keep a live anchor after the summary anyway.
            let anchor = messages
                .iter()
                .rev()
                .find(|m| m.is_anchor())
                .unwrap_or(&messages[start_idx]);
            out.push(summary);
            out.push(anchor.with_fresh_id());
            start_id.clone()
        }
        Splice::BeforeStart => {
            out.insert(start_idx, summary);
            start_id.clone()
        }
        Splice::AtBoundary(boundary_idx) => {
            let copy = messages[start_idx].with_fresh_id();
            let copy_id = copy.id().clone();
            out.insert(boundary_idx, copy);
            out.insert(boundary_idx, summary);
            copy_id
        }
    };

    Ok(WindowUpdate {
        messages: out,
        start_id,
        window_start_id,
    })
}

/// A compacted state and the id its anchor message now goes by
#[derive(Debug, Clone)]
pub struct CompactionOutcome {
    pub state: AgentState,
    pub start_id: MessageId,
}

const SUMMARIZATION_SYSTEM_PROMPT: &str = "\
You are a specialized summarization model. Your summary replaces the original \
messages in the assistant's context, so it must keep everything needed to continue \
the conversation.";

const SUMMARIZATION_PROMPT: &str = "\
Summarize the conversation below. Cover:

1. **Goal**: What is the user trying to find out or get done?
2. **Findings**: Which tools were called and what did they return?
3. **Open Questions**: What is still unanswered?
4. **Critical Context**: Constraints, preferences or identifiers that must not be lost.

Be thorough but concise.

<conversation>
{conversation}
</conversation>";

const MAX_RESULT_CHARS: usize = 2000;
const MAX_ARG_CHARS: usize = 100;

/// Summarizes history through the model and splices the summary in
pub struct Compactor {
    config: CompactionConfig,
    model: Arc<dyn ModelClient>,
    counter: Arc<dyn TokenCounter>,
    events: Option<broadcast::Sender<AgentEvent>>,
}

impl Compactor {
    pub fn new(config: CompactionConfig, model: Arc<dyn ModelClient>) -> Self {
        Self {
            config,
            model,
            counter: Arc::new(HeuristicCounter),
            events: None,
        }
    }

    /// Use a provider-specific token counter
    pub fn with_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    pub fn with_events(mut self, tx: broadcast::Sender<AgentEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Compact `state` if its live window is over budget.
    ///
    /// Returns `Ok(None)` when no compaction was needed.
    pub async fn compact(
        &self,
        state: &AgentState,
        start_id: &MessageId,
    ) -> Result<Option<CompactionOutcome>> {
        let live = state.live_messages();
        if !should_compact(live, self.counter.as_ref(), &self.config) {
            return Ok(None);
        }

        // Summarize exactly what the splice pushes out of the window.
        let start_idx = position_of(live, start_id)?;
        let cut =
            Splice::plan(live, start_idx, &self.config).summary_index(live.len(), start_idx);
        let to_summarize = &live[..cut];
        let only_previous_summary = to_summarize.len() == 1
            && state.window_start.as_ref() == Some(to_summarize[0].id());
        if to_summarize.is_empty() || only_previous_summary {
            return Ok(None);
        }

        let tokens_before = self.counter.count(live);
        self.emit(AgentEvent::CompactionStart { tokens_before });
        tracing::debug!(
            tokens_before,
            summarized = to_summarize.len(),
            "compacting conversation"
        );

        let summary = self.summarize(to_summarize).await?;
        let summary = Message::context_injection(format!(
            "<context-summary>\n{}\n</context-summary>",
            summary
        ));
        let update = update_window(live, summary, start_id, &self.config)?;

        let mut next = state.clone();
        next.messages.truncate(state.messages.len() - live.len());
        next.messages.extend(update.messages);
        next.window_start = Some(update.window_start_id);

        let tokens_after = self.counter.count(next.live_messages());
        self.emit(AgentEvent::CompactionEnd {
            tokens_before,
            tokens_after,
        });
        tracing::debug!(tokens_before, tokens_after, "compaction finished");

        Ok(Some(CompactionOutcome {
            state: next,
            start_id: update.start_id,
        }))
    }

    async fn summarize(&self, messages: &[Message]) -> Result<String> {
        let prompt =
            SUMMARIZATION_PROMPT.replace("{conversation}", &serialize_messages_for_summary(messages));
        let request = ModelRequest {
            system_prompt: Some(SUMMARIZATION_SYSTEM_PROMPT.to_string()),
            messages: vec![Message::human(prompt)],
            tools: vec![],
        };

        match self.model.call(request).await? {
            ModelResponse::FinalText { text } if !text.trim().is_empty() => Ok(text),
            ModelResponse::FinalText { .. } => {
                Err(Error::Compaction("summarizer returned an empty summary".into()))
            }
            ModelResponse::ToolCalls { .. } => {
                Err(Error::Compaction("summarizer answered with tool calls".into()))
            }
        }
    }
}

/// Serialize messages to plain text for the summarization prompt.
///
/// A transcript format keeps the model from trying to continue the conversation.
fn serialize_messages_for_summary(messages: &[Message]) -> String {
    let mut out = String::new();

    for message in messages {
        match message {
            Message::Human { text, .. } if !text.is_empty() => {
                out.push_str("[User]: ");
                out.push_str(text);
                out.push('\n');
            }
            Message::Assistant {
                text, tool_calls, ..
            } => {
                if !text.is_empty() {
                    out.push_str("[Assistant]: ");
                    out.push_str(text);
                    out.push('\n');
                }
                if !tool_calls.is_empty() {
                    let calls: Vec<String> = tool_calls
                        .iter()
                        .map(|c| format!("{}({})", c.name, format_tool_args(&c.arguments)))
                        .collect();
                    out.push_str("[Assistant tool calls]: ");
                    out.push_str(&calls.join("; "));
                    out.push('\n');
                }
            }
            Message::ToolResult {
                tool_name,
                content,
                is_error,
                ..
            } => {
                if *is_error {
                    out.push_str(&format!("[Tool error ({})]: ", tool_name));
                } else {
                    out.push_str(&format!("[Tool result ({})]: ", tool_name));
                }
                out.push_str(truncate(content, MAX_RESULT_CHARS));
                if content.len() > MAX_RESULT_CHARS {
                    out.push_str("...(truncated)");
                }
                out.push('\n');
            }
            Message::ContextInjection { content, .. } => {
                out.push_str("[Context]: ");
                out.push_str(content);
                out.push('\n');
            }
            Message::Human { .. } => {}
        }
    }

    out
}

fn format_tool_args(args: &serde_json::Value) -> String {
    match args {
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(k, v)| {
                let val = match v {
                    serde_json::Value::String(s) => format!("\"{}\"", truncate(s, MAX_ARG_CHARS)),
                    other => truncate(&other.to_string(), MAX_ARG_CHARS).to_string(),
                };
                format!("{}={}", k, val)
            })
            .collect::<Vec<_>>()
            .join(", "),
        _ => args.to_string(),
    }
}

/// Longest prefix of at most `max` bytes ending on a char boundary
fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
