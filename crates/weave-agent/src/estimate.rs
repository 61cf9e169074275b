//! Token estimation (chars/4 heuristic)

use weave_ai::Message;

/// Characters per token used by the fallback estimator
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimate token count for a single message
pub fn estimate_tokens(message: &Message) -> u32 {
    let char_count = match message {
        Message::Human { text, .. } => text.len(),
        Message::Assistant {
            text, tool_calls, ..
        } => {
            text.len()
                + tool_calls
                    .iter()
                    .map(|c| {
                        c.name.len() + serde_json::to_string(&c.arguments).unwrap_or_default().len()
                    })
                    .sum::<usize>()
        }
        Message::ToolResult { content, .. } => content.len(),
        Message::ContextInjection { content, .. } => content.len(),
    };
    (char_count / CHARS_PER_TOKEN) as u32
}

/// Estimate total tokens for a slice of messages
pub fn estimate_total_tokens(messages: &[Message]) -> u32 {
    messages.iter().map(estimate_tokens).sum()
}

/// Counts the tokens of a conversation.
///
/// Providers with a real tokenizer plug in here; [`HeuristicCounter`] is the
/// fallback.
pub trait TokenCounter: Send + Sync {
    fn count(&self, messages: &[Message]) -> u32;
}

/// Fallback counter using [`estimate_total_tokens`]
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicCounter;

impl TokenCounter for HeuristicCounter {
    fn count(&self, messages: &[Message]) -> u32 {
        estimate_total_tokens(messages)
    }
}

impl<F> TokenCounter for F
where
    F: Fn(&[Message]) -> u32 + Send + Sync,
{
    fn count(&self, messages: &[Message]) -> u32 {
        self(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_ai::ToolCall;

    #[test]
    fn test_estimate_tokens_text() {
        let msg = Message::human("Hello world!"); // 12 chars -> 3 tokens
        assert_eq!(estimate_tokens(&msg), 3);
    }

    #[test]
    fn test_estimate_tokens_counts_tool_calls() {
        let msg = Message::assistant_with_tool_calls(
            "",
            vec![ToolCall::new("c1", "abcd", serde_json::json!({}))],
        );
        // "abcd" + "{}" = 6 chars
        assert_eq!(estimate_tokens(&msg), 1);
    }

    #[test]
    fn test_estimate_total_tokens() {
        let messages = vec![
            Message::human("x".repeat(400)),
            Message::assistant("y".repeat(800)),
            Message::context_injection("z".repeat(40)),
        ];
        assert_eq!(estimate_total_tokens(&messages), 310);
    }

    #[test]
    fn test_closure_counter() {
        let counter = |messages: &[Message]| messages.len() as u32 * 1000;
        let messages = vec![Message::human("a"), Message::human("b")];
        assert_eq!(counter.count(&messages), 2000);
        assert_eq!(HeuristicCounter.count(&messages), 0);
    }
}
