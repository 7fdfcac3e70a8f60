//! Prompt construction and the task-breakdown templates used when the model
//! returns no page content or is not consulted at all.

use std::fmt::Write as _;

use crate::analysis::types::{FieldKind, LogicalField};
use crate::vocabulary::Vocabulary;

const PROJECT_KEYWORDS: &[&str] = &[
    "project", "strategy", "campaign", "launch", "rollout", "roadmap", "new business",
    "プロジェクト", "戦略", "企画", "キャンペーン", "新規事業", "立ち上げ",
];

const TASK_KEYWORDS: &[&str] = &[
    "create", "build", "develop", "write", "prepare", "analy", "report", "document", "draft",
    "作成", "制作", "開発", "分析", "資料", "レポート",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Project,
    Task,
    Memo,
}

pub fn classify_template(text: &str) -> TemplateKind {
    let haystack = text.to_lowercase();
    if PROJECT_KEYWORDS.iter().any(|keyword| haystack.contains(keyword)) {
        TemplateKind::Project
    } else if TASK_KEYWORDS.iter().any(|keyword| haystack.contains(keyword)) {
        TemplateKind::Task
    } else {
        TemplateKind::Memo
    }
}

type Phase = (&'static str, &'static [&'static str]);

const PROJECT_PHASES: &[Phase] = &[
    ("Phase 1: Research and preparation", &[
        "Assess the current situation",
        "Clarify requirements",
        "Confirm resources and owners",
        "Draft a schedule",
    ]),
    ("Phase 2: Planning and design", &[
        "Write the detailed plan",
        "Decide scope and specifications",
        "Set quality criteria",
        "List risks and mitigations",
    ]),
    ("Phase 3: Execution", &[
        "Kick off with stakeholders",
        "Track progress weekly",
        "Resolve blockers",
    ]),
    ("Phase 4: Review", &[
        "Confirm deliverables",
        "Collect feedback",
        "Write up lessons learned",
    ]),
];

const TASK_PHASES: &[Phase] = &[
    ("Step 1: Gather inputs", &[
        "List the information needed",
        "Prepare materials and tools",
    ]),
    ("Step 2: Plan", &["Outline the finished result", "Confirm the deadline"]),
    ("Step 3: Do the work", &["Produce a first version", "Check it against the outline"]),
    ("Step 4: Wrap up", &["Share with the people involved", "Decide the next action"]),
];

const MEMO_PHASES: &[Phase] = &[
    ("1. Understand", &["Restate the idea in one sentence", "Note what prompted it"]),
    ("2. Next steps", &["Decide whether it needs action", "Set a date to revisit"]),
];

/// Markdown breakdown for `title`. Phases are `####` headings followed by
/// unchecked checklist items.
pub fn task_breakdown(title: &str, text: &str) -> String {
    let (intro, phases) = match classify_template(text) {
        TemplateKind::Project => ("Project plan", PROJECT_PHASES),
        TemplateKind::Task => ("Task steps", TASK_PHASES),
        TemplateKind::Memo => ("Notes", MEMO_PHASES),
    };

    let mut content = format!("## {}\n\n### {}\n", title.trim(), intro);
    for (heading, items) in phases {
        let _ = write!(content, "\n#### {}\n", heading);
        for item in *items {
            let _ = writeln!(content, "- [ ] {}", item);
        }
    }
    content
}

/// Appends a `### Links` section listing `urls`.
pub fn append_links(content: &mut String, urls: &[String]) {
    if urls.is_empty() {
        return;
    }
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str("\n### Links\n");
    for url in urls {
        let _ = writeln!(content, "- {}", url);
    }
}

/// Instructions sent to the model, listing each field's allowed labels.
pub fn system_prompt(vocabulary: &Vocabulary) -> String {
    let mut prompt = String::from(
        "You turn a short chat message into a task record.\n\
         Reply with a single JSON object and nothing else:\n\
         {\"properties\": {<field>: <value or null>}, \"pageContent\": \"<markdown>\"}\n\n\
         Rules:\n\
         - Use only the labels listed for each field, spelled exactly. Use null when unsure.\n\
         - due_date must be YYYY-MM-DD and only when the message states a date.\n\
         - assignee is a person's name from the message, or null.\n\
         - pageContent is a breakdown of the work: `####` phase headings, each followed by\n\
           `- [ ] ` checklist items small enough to start today.\n\nFields:\n",
    );
    for field in LogicalField::ALL {
        match field.kind() {
            FieldKind::Enumerated => {
                let options = vocabulary.options(field);
                if field == LogicalField::Status || options.is_empty() {
                    continue;
                }
                let _ = writeln!(prompt, "- {}: one of", field.json_key());
                for option in options {
                    if option.description.is_empty() {
                        let _ = writeln!(prompt, "    \"{}\"", option.label);
                    } else {
                        let _ = writeln!(prompt, "    \"{}\" ({})", option.label, option.description);
                    }
                }
            }
            FieldKind::Text => {
                let _ = writeln!(prompt, "- {}: free text", field.json_key());
            }
            FieldKind::Date => {
                let _ = writeln!(prompt, "- {}: YYYY-MM-DD", field.json_key());
            }
        }
    }
    prompt
}

pub fn user_prompt(message: &str, urls: &[String], today: &str) -> String {
    let mut prompt = format!("Today is {}.\n\nMessage:\n{}\n", today, message.trim());
    if !urls.is_empty() {
        prompt.push_str("\nLinks in the message:\n");
        for url in urls {
            let _ = writeln!(prompt, "- {}", url);
        }
    }
    prompt
}
