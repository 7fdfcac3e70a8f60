use std::fmt::Write as _;

use crate::analysis::types::{AnalysisResult, LogicalField};
use crate::notion::{CreatedRecord, PropertyMapping};

const MAX_SUMMARY_ITEMS: usize = 6;
const MAX_ITEM_CHARS: usize = 50;

pub(crate) const ACK_MESSAGE: &str = "Got it. Analyzing your message and saving it to Notion...";
pub(crate) const DUPLICATE_MESSAGE: &str = "This message was already processed.";
pub(crate) const UNAVAILABLE_MESSAGE: &str =
    "The relay is busy right now. Please send the message again in a minute.";

/// Short work items from the page content: unchecked checklist entries, or
/// phase headings when there are none. Overlong lines are skipped.
pub(crate) fn breakdown_items(page_content: &str) -> Vec<String> {
    let pick = |prefix: &str| -> Vec<String> {
        page_content
            .lines()
            .filter_map(|line| line.trim().strip_prefix(prefix))
            .map(str::trim)
            .filter(|item| !item.is_empty() && item.chars().count() < MAX_ITEM_CHARS)
            .map(str::to_string)
            .collect()
    };
    let items = pick("- [ ] ");
    if items.is_empty() {
        pick("#### ")
    } else {
        items
    }
}

/// Confirmation pushed after a record is written. Field values come from the
/// stored record, not from the analysis.
pub(crate) fn build_summary(
    analysis: &AnalysisResult,
    record: &CreatedRecord,
    mapping: &PropertyMapping,
) -> String {
    let mut text = format!("Saved to Notion: {}\n\n", analysis.title);
    for field in LogicalField::ALL {
        let name = mapping.name_for(field);
        let value = record
            .properties
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
            .unwrap_or("(empty)");
        let _ = writeln!(text, "{}: {}", name, value);
    }

    if !analysis.page_content.trim().is_empty() {
        text.push_str("\nBreakdown:\n");
        let items = breakdown_items(&analysis.page_content);
        if items.is_empty() {
            text.push_str("A detailed plan was added to the page.\n");
        }
        for (index, item) in items.iter().take(MAX_SUMMARY_ITEMS).enumerate() {
            let _ = writeln!(text, "{}. {}", index + 1, item);
        }
        if items.len() > MAX_SUMMARY_ITEMS {
            let _ = writeln!(text, "... and {} more", items.len() - MAX_SUMMARY_ITEMS);
        }
    }

    if analysis.is_fallback() {
        text.push_str("\n(Fields were filled by keyword rules.)\n");
    }
    if record.minimal {
        text.push_str("\n(Some fields were rejected; only the title and content were saved.)\n");
    }
    if !record.url.is_empty() {
        let _ = write!(text, "\n{}", record.url);
    }
    text.trim_end().to_string()
}
