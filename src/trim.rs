//! Context window trimming.
//!
//! History is cut from the oldest end until the estimated total fits the
//! model budget. The estimate is a cheap character-based approximation;
//! exact tokenization is not worth a tokenizer dependency here since the
//! budget already carries headroom.

use crate::llm::ChatMessage;

/// Flat per-message overhead covering role framing and separators.
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Approximate tokens for one message: one token per four characters of
/// content plus a fixed framing overhead.
pub fn estimate_tokens(message: &ChatMessage) -> usize {
    let mut chars = message.text().chars().count();
    for call in &message.tool_calls {
        chars += call.name.chars().count();
        chars += call.arguments.to_string().chars().count();
    }
    chars / 4 + MESSAGE_OVERHEAD_TOKENS
}

/// Drop oldest messages until the sequence fits `max_tokens`.
///
/// Relative order is preserved. The most recent message is always kept if
/// it fits alone; if even it exceeds the budget the result is empty and
/// the caller must surface a content-too-large error instead of silently
/// truncating.
pub fn trim_to_budget(messages: &[ChatMessage], max_tokens: usize) -> (Vec<ChatMessage>, usize) {
    let estimates: Vec<usize> = messages.iter().map(estimate_tokens).collect();
    let mut total: usize = estimates.iter().sum();
    let mut start = 0;

    while total > max_tokens && start < messages.len() {
        total -= estimates[start];
        start += 1;
    }

    if start == messages.len() {
        return (Vec::new(), 0);
    }
    (messages[start..].to_vec(), total)
}
