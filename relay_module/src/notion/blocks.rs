//! Markdown page content → Notion block objects.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Value};
use tracing::warn;

/// Notion rejects rich text segments longer than this.
pub const MAX_RICH_TEXT_CHARS: usize = 2000;
/// Notion accepts at most this many children in one create call.
pub const MAX_BLOCKS: usize = 100;

static NUMBERED_ITEM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+[.)]\s+(.*)$").unwrap());

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => text[..index].to_string(),
        None => text.to_string(),
    }
}

pub fn rich_text(content: &str) -> Value {
    json!([{
        "type": "text",
        "text": { "content": truncate_chars(content, MAX_RICH_TEXT_CHARS) }
    }])
}

fn block(kind: &str, content: &str) -> Value {
    json!({
        "object": "block",
        "type": kind,
        kind: { "rich_text": rich_text(content) }
    })
}

fn to_do(content: &str, checked: bool) -> Value {
    json!({
        "object": "block",
        "type": "to_do",
        "to_do": { "rich_text": rich_text(content), "checked": checked }
    })
}

fn line_to_block(line: &str) -> Option<Value> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let block = if let Some(rest) = line.strip_prefix("#### ") {
        block("heading_3", rest.trim())
    } else if let Some(rest) = line.strip_prefix("### ") {
        block("heading_3", rest.trim())
    } else if let Some(rest) = line.strip_prefix("## ") {
        block("heading_2", rest.trim())
    } else if let Some(rest) = line.strip_prefix("# ") {
        block("heading_1", rest.trim())
    } else if let Some(rest) = line.strip_prefix("- [ ] ") {
        to_do(rest.trim(), false)
    } else if let Some(rest) = line
        .strip_prefix("- [x] ")
        .or_else(|| line.strip_prefix("- [X] "))
    {
        to_do(rest.trim(), true)
    } else if let Some(captures) = NUMBERED_ITEM.captures(line) {
        block("numbered_list_item", captures[1].trim())
    } else if let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
        block("bulleted_list_item", rest.trim())
    } else {
        block("paragraph", line)
    };
    Some(block)
}

/// One block per non-blank line, capped at [`MAX_BLOCKS`].
pub fn markdown_to_blocks(markdown: &str) -> Vec<Value> {
    let mut blocks: Vec<Value> = markdown.lines().filter_map(line_to_block).collect();
    if blocks.len() > MAX_BLOCKS {
        warn!(
            "page content has {} blocks; dropping {} past the limit",
            blocks.len(),
            blocks.len() - MAX_BLOCKS
        );
        blocks.truncate(MAX_BLOCKS);
    }
    blocks
}
