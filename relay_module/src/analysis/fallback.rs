use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;

use crate::analysis::template::{append_links, task_breakdown};
use crate::analysis::types::{
    AnalysisResult, AnalysisSource, FallbackReason, FieldValue, LogicalField,
};
use crate::vocabulary::{KeywordRule, Vocabulary};

static MONTH_DAY_JA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2})月(\d{1,2})日").unwrap());
static YEAR_MONTH_DAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4})[-/](\d{1,2})[-/](\d{1,2})").unwrap());
static URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://[^\s]+").unwrap());

const URL_TRAILING: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '>', '、', '。', '」', '）'];

/// First non-empty line, trimmed.
pub fn message_title(text: &str) -> &str {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("")
}

/// `http(s)` links in order of appearance, without duplicates.
pub fn extract_urls(text: &str) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for found in URL.find_iter(text) {
        let url = found.as_str().trim_end_matches(URL_TRAILING);
        if url.len() > "https://".len() && !urls.iter().any(|seen| seen == url) {
            urls.push(url.to_string());
        }
    }
    urls
}

/// First recognizable date in `text`. A month/day without a year is taken
/// to be in `today`'s year.
pub fn extract_due_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let full = YEAR_MONTH_DAY.captures_iter(text).find_map(|captures| {
        let year = captures[1].parse().ok()?;
        let month = captures[2].parse().ok()?;
        let day = captures[3].parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, day)
    });
    if full.is_some() {
        return full;
    }
    MONTH_DAY_JA.captures_iter(text).find_map(|captures| {
        let month = captures[1].parse().ok()?;
        let day = captures[2].parse().ok()?;
        NaiveDate::from_ymd_opt(today.year(), month, day)
    })
}

/// Deterministic analysis from keyword rules. For each field the first
/// matching rule wins; unmatched fields stay null.
pub fn fallback_analysis(
    text: &str,
    vocabulary: &Vocabulary,
    rules: &[KeywordRule],
    today: NaiveDate,
    reason: FallbackReason,
) -> AnalysisResult {
    let title = message_title(text);
    let mut result = AnalysisResult::empty(title, AnalysisSource::Fallback(reason));
    let haystack = text.to_lowercase();

    for rule in rules.iter().filter(|rule| rule.matches(&haystack)) {
        for (field, label) in &rule.set {
            if !result.get(*field).is_null() {
                continue;
            }
            if let Some(canonical) = vocabulary.canonical_label(*field, label) {
                result.set(*field, FieldValue::Label(canonical.to_string()));
            }
        }
    }

    if let Some(status) = vocabulary.default_status_label() {
        result.set(LogicalField::Status, FieldValue::Label(status.to_string()));
    }
    if let Some(due) = extract_due_date(text, today) {
        result.set(LogicalField::DueDate, FieldValue::Date(due));
    }

    let mut content = task_breakdown(title, text);
    append_links(&mut content, &extract_urls(text));
    result.page_content = content;
    result
}
