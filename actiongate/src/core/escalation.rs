//! Bounded escalation ladder.
//!
//! Entered when a plan needed approval but nothing compiled. Each rung is a
//! read-only inspection tagged with the original message; the stage flags of
//! the next snapshot decide the following rung, so a single request can never
//! trigger more than a search and a snippet read before giving up.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::action::{
    ActionKind, ActionMeta, InspectionKind, ReadSnippetPayload, RunCmdPayload, SearchSpec,
};
use crate::core::path::stem;
use crate::core::types::{ActionDraft, PlanOp, SearchMatch, Snapshot};

pub const CLARIFY_REPLY: &str = "I couldn't pin down exactly what to change. Which file, and which section or selector in it, should I edit?";

const MAX_TERMS: usize = 4;
const STOPWORDS: &[&str] = &[
    "about", "after", "again", "also", "bigger", "change", "could", "color", "colour", "didn't",
    "does", "doesn't", "from", "have", "into", "just", "like", "look", "looks", "make", "more",
    "much", "need", "please", "should", "smaller", "some", "than", "that", "their", "them",
    "then", "there", "these", "thing", "this", "update", "want", "what", "when", "where",
    "which", "with", "would", "your",
];

static QUOTED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""([^"]{2,})"|'([^']{2,})'|“([^”]{2,})”"#).expect("quoted regex")
});
static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9][A-Za-z0-9_-]*").expect("word regex"));

/// Ladder rung derived from the snapshot's inspection stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ladder {
    NeedSearch,
    NeedSnippet,
    GiveUp,
}

impl Ladder {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let stage = snapshot.inspection_stage;
        if stage.has_snippet {
            Ladder::GiveUp
        } else if !stage.has_rg {
            Ladder::NeedSearch
        } else if stage.rg_hits > 0 {
            Ladder::NeedSnippet
        } else {
            Ladder::GiveUp
        }
    }
}

/// Bounds for generated inspections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationConfig {
    pub max_results: usize,
    pub snippet_radius: usize,
}

/// Next automatic step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Escalation {
    Inspect(ActionDraft),
    Clarify(String),
}

pub fn escalate(snapshot: &Snapshot, ops: &[PlanOp], config: &EscalationConfig) -> Escalation {
    let message = snapshot.message.as_str();
    match Ladder::from_snapshot(snapshot) {
        Ladder::NeedSearch => {
            let terms = search_terms(message, ops);
            if terms.is_empty() {
                return Escalation::Clarify(CLARIFY_REPLY.to_string());
            }
            Escalation::Inspect(search_draft(message, &terms, config))
        }
        Ladder::NeedSnippet => {
            let terms = search_terms(message, ops);
            match best_hit(snapshot.search_matches(), &terms) {
                Some(hit) => Escalation::Inspect(snippet_draft(message, hit, config)),
                None => Escalation::Clarify(CLARIFY_REPLY.to_string()),
            }
        }
        Ladder::GiveUp => Escalation::Clarify(CLARIFY_REPLY.to_string()),
    }
}

/// Search terms: op hints first, then quoted phrases, then message keywords.
pub fn search_terms(message: &str, ops: &[PlanOp]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut terms = Vec::new();
    let mut push = |term: &str| {
        let term = term.trim().to_lowercase();
        if term.len() >= 2 && seen.insert(term.clone()) {
            terms.push(term);
        }
    };

    for op in ops {
        if let PlanOp::CssPatch { selector, .. } = op
            && let Some(word) = WORD_RE.find(selector)
        {
            push(word.as_str());
        }
        if let PlanOp::SetHtmlTitle { .. } = op {
            push("<title");
        }
        if let Some(path) = op.path() {
            push(stem(path));
        }
    }

    for caps in QUOTED_RE.captures_iter(message) {
        if let Some(phrase) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) {
            push(phrase.as_str());
        }
    }

    for word in WORD_RE.find_iter(message) {
        let lower = word.as_str().to_lowercase();
        if lower.len() >= 4 && !STOPWORDS.contains(&lower.as_str()) {
            push(&lower);
        }
    }

    terms.truncate(MAX_TERMS);
    terms
}

/// Hit whose text mentions the most terms; the earliest wins ties.
pub fn best_hit<'a>(
    matches: impl Iterator<Item = &'a SearchMatch>,
    terms: &[String],
) -> Option<&'a SearchMatch> {
    let mut best: Option<(&SearchMatch, usize)> = None;
    for hit in matches {
        let text = hit.text.to_lowercase();
        let file = hit.file.to_lowercase();
        let score = terms
            .iter()
            .map(|term| usize::from(text.contains(term.as_str())) * 2 + usize::from(file.contains(term.as_str())))
            .sum::<usize>();
        if best.is_none_or(|(_, top)| score > top) {
            best = Some((hit, score));
        }
    }
    best.map(|(hit, _)| hit)
}

fn search_draft(message: &str, terms: &[String], config: &EscalationConfig) -> ActionDraft {
    let pattern = terms
        .iter()
        .map(|term| regex::escape(term))
        .collect::<Vec<_>>()
        .join("|");
    let kind = ActionKind::RunCmd(RunCmdPayload {
        cmd: format!("rg --vimgrep -i -m {} -e '{}'", config.max_results, pattern),
        cwd: None,
        timeout_secs: None,
        search: Some(SearchSpec {
            pattern,
            max_results: config.max_results,
        }),
    });
    ActionDraft::new(
        kind,
        format!("Search the project for {}", terms.join(", ")),
        "Looking for the code this request refers to before proposing a change.",
    )
    .with_meta(ActionMeta::followup(message, InspectionKind::Rg))
}

fn snippet_draft(message: &str, hit: &SearchMatch, config: &EscalationConfig) -> ActionDraft {
    let start_line = hit.line.saturating_sub(config.snippet_radius).max(1);
    let end_line = hit.line + config.snippet_radius;
    let kind = ActionKind::ReadSnippet(ReadSnippetPayload {
        path: hit.file.clone(),
        start_line,
        end_line: Some(end_line),
    });
    ActionDraft::new(
        kind,
        format!("Read {} around line {}", hit.file, hit.line),
        "Reading the best search hit to ground the change in real content.",
    )
    .with_meta(ActionMeta::followup(message, InspectionKind::Snippet))
}
