//! Closed label sets for enumerated fields and the keyword rule table used
//! when the model is unavailable.
//!
//! Both are loaded from the `[vocabulary]` and `[[rules]]` sections of
//! `relay.toml`; the built-in defaults are used for anything not configured.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::analysis::types::{FieldKind, LogicalField};

/// One allowed label, with a short hint shown to the model.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VocabularyOption {
    pub label: String,
    #[serde(default)]
    pub description: String,
}

impl VocabularyOption {
    fn new(label: &str, description: &str) -> Self {
        Self {
            label: label.to_string(),
            description: description.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Vocabulary {
    /// Written to every record's status field when set.
    pub default_status: Option<String>,
    pub status: Vec<VocabularyOption>,
    pub category: Vec<VocabularyOption>,
    pub priority: Vec<VocabularyOption>,
    pub deliverable: Vec<VocabularyOption>,
    pub scale: Vec<VocabularyOption>,
    pub project_tag: Vec<VocabularyOption>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            default_status: None,
            status: vec![
                VocabularyOption::new("unsorted", "not yet triaged"),
                VocabularyOption::new("not started", ""),
                VocabularyOption::new("in progress", ""),
                VocabularyOption::new("waiting", "blocked on someone else"),
                VocabularyOption::new("done", ""),
                VocabularyOption::new("on hold", ""),
            ],
            category: vec![
                VocabularyOption::new("planning", "strategy, plans, proposals"),
                VocabularyOption::new("production", "building sites, content, software"),
                VocabularyOption::new("operations", "recurring running of a service"),
                VocabularyOption::new("management", "people, budget, coordination"),
                VocabularyOption::new("analysis", "data analysis, measurement, research"),
                VocabularyOption::new("misc", "anything else"),
            ],
            priority: vec![
                VocabularyOption::new("urgent", "explicitly marked urgent or ASAP"),
                VocabularyOption::new("important", "explicitly marked important"),
                VocabularyOption::new("normal", "ordinary work"),
                VocabularyOption::new("idea", "someday, not committed"),
            ],
            deliverable: vec![
                VocabularyOption::new("document", "plans, specs, slides"),
                VocabularyOption::new("content", "web pages, articles, media"),
                VocabularyOption::new("report", "analysis results, measurements"),
                VocabularyOption::new("system", "software, tools, automation"),
                VocabularyOption::new("process", "workflows, procedures"),
                VocabularyOption::new("other", ""),
            ],
            scale: vec![
                VocabularyOption::new("strategic", "multi-quarter initiatives"),
                VocabularyOption::new("project", "several weeks, several people"),
                VocabularyOption::new("task", "days of work"),
                VocabularyOption::new("action", "under a day"),
                VocabularyOption::new("memo", "note or idea, no work yet"),
            ],
            project_tag: Vec::new(),
        }
    }
}

impl Vocabulary {
    /// Options for an enumerated field; empty for text and date fields.
    pub fn options(&self, field: LogicalField) -> &[VocabularyOption] {
        match field {
            LogicalField::Status => &self.status,
            LogicalField::Category => &self.category,
            LogicalField::Priority => &self.priority,
            LogicalField::Deliverable => &self.deliverable,
            LogicalField::Scale => &self.scale,
            LogicalField::ProjectTag => &self.project_tag,
            LogicalField::Assignee | LogicalField::DueDate => &[],
        }
    }

    /// Canonical spelling of `value` if it belongs to the field's vocabulary.
    /// Matching ignores case and surrounding whitespace.
    pub fn canonical_label(&self, field: LogicalField, value: &str) -> Option<&str> {
        if field.kind() != FieldKind::Enumerated {
            return None;
        }
        let wanted = value.trim();
        if wanted.is_empty() {
            return None;
        }
        self.options(field)
            .iter()
            .find(|option| option.label.eq_ignore_ascii_case(wanted))
            .map(|option| option.label.as_str())
    }

    pub fn default_status_label(&self) -> Option<&str> {
        let configured = self.default_status.as_deref()?;
        self.canonical_label(LogicalField::Status, configured)
    }

    /// Removes labels that appear in the rule table but not in the vocabulary.
    pub fn retain_valid_rules(&self, rules: Vec<KeywordRule>) -> Vec<KeywordRule> {
        rules
            .into_iter()
            .filter_map(|mut rule| {
                rule.set.retain(|field, label| {
                    let valid = self.canonical_label(*field, label).is_some();
                    if !valid {
                        tracing::warn!(
                            "dropping rule value {}={} not in vocabulary",
                            field,
                            label
                        );
                    }
                    valid
                });
                (!rule.set.is_empty()).then_some(rule)
            })
            .collect()
    }
}

/// Keyword → field values. A rule matches when any keyword occurs in the
/// lowercased message and no exclusion keyword does. ASCII keywords only
/// match whole words; others match anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KeywordRule {
    pub keywords: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    pub set: BTreeMap<LogicalField, String>,
}

impl KeywordRule {
    fn new(keywords: &[&str], exclude: &[&str], set: &[(LogicalField, &str)]) -> Self {
        Self {
            keywords: keywords.iter().map(|value| value.to_string()).collect(),
            exclude: exclude.iter().map(|value| value.to_string()).collect(),
            set: set
                .iter()
                .map(|(field, label)| (*field, label.to_string()))
                .collect(),
        }
    }

    /// `haystack` must already be lowercased.
    pub fn matches(&self, haystack: &str) -> bool {
        let hit = self
            .keywords
            .iter()
            .any(|keyword| contains_keyword(haystack, &keyword.to_lowercase()));
        hit && !self
            .exclude
            .iter()
            .any(|keyword| contains_keyword(haystack, &keyword.to_lowercase()))
    }
}

fn contains_keyword(haystack: &str, keyword: &str) -> bool {
    if keyword.is_empty() {
        return false;
    }
    if !keyword.is_ascii() {
        return haystack.contains(keyword);
    }
    haystack.match_indices(keyword).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + keyword.len()..].chars().next();
        !before.is_some_and(|c| c.is_ascii_alphanumeric())
            && !after.is_some_and(|c| c.is_ascii_alphanumeric())
    })
}

pub fn default_rules() -> Vec<KeywordRule> {
    use LogicalField::{Category, Deliverable, Priority, Scale};

    vec![
        KeywordRule::new(&["urgent", "asap", "緊急", "至急", "急ぎ"], &[], &[(Priority, "urgent")]),
        KeywordRule::new(&["important", "重要"], &["重要な"], &[(Priority, "important")]),
        KeywordRule::new(&["普通"], &[], &[(Priority, "normal")]),
        KeywordRule::new(&["low priority", "someday", "アイデア"], &[], &[(Priority, "idea")]),
        KeywordRule::new(
            &["strategy planning", "business plan", "戦略策定", "企画立案"],
            &[],
            &[(Category, "planning"), (Deliverable, "document")],
        ),
        KeywordRule::new(
            &["website", "landing page", "サイト制作", "hp制作"],
            &[],
            &[(Category, "production"), (Deliverable, "content")],
        ),
        KeywordRule::new(
            &["app development", "system development", "アプリ開発", "システム開発"],
            &[],
            &[(Category, "production"), (Deliverable, "system")],
        ),
        KeywordRule::new(
            &["data analysis", "kpi", "データ分析", "効果測定"],
            &[],
            &[(Category, "analysis"), (Deliverable, "report")],
        ),
        KeywordRule::new(&["hiring", "budget review", "採用", "予算"], &[], &[(Category, "management")]),
        KeywordRule::new(&["project", "プロジェクト"], &[], &[(Scale, "project")]),
        KeywordRule::new(&["task", "タスク"], &[], &[(Scale, "task")]),
        KeywordRule::new(&["アクション"], &[], &[(Scale, "action")]),
        KeywordRule::new(&["memo", "note to self", "メモ"], &[], &[(Scale, "memo")]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_label_ignores_case_and_whitespace() {
        let vocabulary = Vocabulary::default();
        assert_eq!(
            vocabulary.canonical_label(LogicalField::Priority, "  URGENT "),
            Some("urgent")
        );
        assert_eq!(vocabulary.canonical_label(LogicalField::Priority, "critical"), None);
        assert_eq!(vocabulary.canonical_label(LogicalField::Assignee, "urgent"), None);
    }

    #[test]
    fn default_status_must_be_in_vocabulary() {
        let mut vocabulary = Vocabulary::default();
        assert_eq!(vocabulary.default_status_label(), None);
        vocabulary.default_status = Some("Unsorted".to_string());
        assert_eq!(vocabulary.default_status_label(), Some("unsorted"));
        vocabulary.default_status = Some("triage".to_string());
        assert_eq!(vocabulary.default_status_label(), None);
    }

    #[test]
    fn rule_exclusions_block_match() {
        let rule = KeywordRule::new(&["重要"], &["重要な"], &[(LogicalField::Priority, "important")]);
        assert!(rule.matches("これは重要"));
        assert!(!rule.matches("重要な会議"));
    }

    #[test]
    fn ascii_keywords_match_whole_words_only() {
        let rule = KeywordRule::new(&["urgent", "task"], &[], &[(LogicalField::Priority, "urgent")]);
        assert!(rule.matches("urgent: call the bank"));
        assert!(rule.matches("fix login (urgent)"));
        assert!(rule.matches("至急task確認"));
        assert!(!rule.matches("the insurgent faction"));
        assert!(!rule.matches("stop multitasking"));
    }

    #[test]
    fn normal_priority_and_action_scale_have_rules() {
        let rules = default_rules();
        let labels = |text: &str| -> Vec<(LogicalField, String)> {
            rules
                .iter()
                .filter(|rule| rule.matches(text))
                .flat_map(|rule| rule.set.clone())
                .collect()
        };
        assert!(labels("普通の確認").contains(&(LogicalField::Priority, "normal".to_string())));
        assert!(labels("次のアクション").contains(&(LogicalField::Scale, "action".to_string())));
    }

    #[test]
    fn default_rules_only_reference_known_labels() {
        let vocabulary = Vocabulary::default();
        let rules = default_rules();
        let count = rules.len();
        assert_eq!(vocabulary.retain_valid_rules(rules).len(), count);
    }

    #[test]
    fn unknown_rule_labels_are_dropped() {
        let vocabulary = Vocabulary::default();
        let rules = vec![KeywordRule::new(
            &["x"],
            &[],
            &[(LogicalField::Priority, "p0"), (LogicalField::Scale, "task")],
        )];
        let kept = vocabulary.retain_valid_rules(rules);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].set.len(), 1);
    }

    #[test]
    fn vocabulary_deserializes_partial_toml() {
        let vocabulary: Vocabulary = toml::from_str(
            r#"
            default_status = "inbox"
            status = [{ label = "inbox" }, { label = "done" }]
            project_tag = [{ label = "Apollo", description = "website relaunch" }]
            "#,
        )
        .unwrap();
        assert_eq!(vocabulary.default_status_label(), Some("inbox"));
        assert_eq!(vocabulary.project_tag[0].label, "Apollo");
        assert_eq!(vocabulary.priority, Vocabulary::default().priority);
    }
}
