//! Assistant text post-processing.
//!
//! Some models leak internal state into their visible output: XML-tagged
//! thinking blocks, pipe-delimited variants, or prose wrapped around a
//! JSON answer. Terminal turn text goes through here before persistence.

/// Tags that are model-internal and never reach users.
const INTERNAL_TAGS: &[&str] = &["thinking", "tool_call", "function_call", "tool_calls"];

/// Strip model-internal tag blocks and tidy leftover whitespace.
pub fn clean_text(text: &str) -> String {
    let mut result = text.to_string();
    for tag in INTERNAL_TAGS {
        result = strip_tag_block(&result, &format!("<{}", tag), &format!("</{}>", tag));
        result = strip_tag_block(
            &result,
            &format!("<|{}|>", tag),
            &format!("<|/{}|>", tag),
        );
    }
    while result.contains("\n\n\n") {
        result = result.replace("\n\n\n", "\n\n");
    }
    result.trim().to_string()
}

/// Remove every `open...close` block. An unterminated block is discarded
/// to its end rather than leaked.
fn strip_tag_block(text: &str, open: &str, close: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut remaining = text;

    while let Some(start) = remaining.find(open) {
        // For bare `<tag` openers require `>` or whitespace next, so that
        // `<thinking>` matches but `<thinkingly>` does not.
        let after = &remaining[start + open.len()..];
        let valid_open = open.ends_with('>')
            || after.starts_with('>')
            || after.starts_with(' ')
            || after.starts_with('\n');
        if !valid_open {
            let skip = start + open.len();
            result.push_str(&remaining[..skip]);
            remaining = &remaining[skip..];
            continue;
        }

        result.push_str(&remaining[..start]);
        match remaining[start..].find(close) {
            Some(offset) => {
                remaining = &remaining[start + offset + close.len()..];
            }
            None => {
                remaining = "";
            }
        }
    }
    result.push_str(remaining);
    result
}

/// Extract the JSON object embedded in text that may carry surrounding
/// prose, e.g. "Here is the result: {...}. Let me know!".
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if start < end {
        Some(&text[start..=end])
    } else {
        None
    }
}
