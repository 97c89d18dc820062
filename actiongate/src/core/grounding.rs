//! Correlation of prior inspections with the current message.
//!
//! Only inspections that were requested for the same (normalized) message are
//! eligible, so output gathered for an earlier request never grounds a later,
//! unrelated one.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::action::{Action, ActionKind, ActionOutput, ActionStatus, InspectionKind};
use crate::core::normalize::same_message;
use crate::core::types::{InspectionRecord, InspectionStage, SearchMatch};

static VIMGREP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?):(\d+):(\d+):(.*)$").expect("vimgrep regex"));
static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(id|class)\s*=\s*["']([^"']+)["']"#).expect("attribute regex")
});

/// Done follow-up inspections for `message`, oldest first.
pub fn correlated<'a>(actions: &'a [Action], message: &str) -> Vec<&'a Action> {
    let mut matched: Vec<&Action> = actions
        .iter()
        .filter(|action| {
            matches!(action.kind, ActionKind::RunCmd(_) | ActionKind::ReadSnippet(_))
                && action.status == ActionStatus::Done
                && action.meta.followup
                && action
                    .meta
                    .original_message
                    .as_deref()
                    .is_some_and(|original| same_message(original, message))
        })
        .collect();
    matched.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    matched
}

/// Turn a correlated inspection into a grounding record.
pub fn inspection_record(action: &Action) -> Option<InspectionRecord> {
    let output = action.result.as_ref()?.result.as_ref()?;
    match (&action.kind, output) {
        (ActionKind::RunCmd(payload), ActionOutput::Command(report)) => {
            let kind = action.meta.inspection_kind.unwrap_or(if payload.search.is_some() {
                InspectionKind::Rg
            } else {
                InspectionKind::Other
            });
            let matches = if kind == InspectionKind::Rg {
                parse_vimgrep(&report.stdout)
            } else {
                Vec::new()
            };
            Some(InspectionRecord {
                action_id: action.id.clone(),
                kind,
                command: payload.cmd.clone(),
                path: None,
                output: report.stdout.clone(),
                matches,
                selectors: Vec::new(),
            })
        }
        (ActionKind::ReadSnippet(payload), ActionOutput::Snippet(report)) => Some(InspectionRecord {
            action_id: action.id.clone(),
            kind: action.meta.inspection_kind.unwrap_or(InspectionKind::Snippet),
            command: format!(
                "read {}:{}-{}",
                payload.path, report.start_line, report.end_line
            ),
            path: Some(report.path.clone()),
            output: report.text.clone(),
            matches: Vec::new(),
            selectors: extract_selectors(&report.text),
        }),
        _ => None,
    }
}

/// Progress flags over the correlated records.
pub fn inspection_stage(records: &[InspectionRecord]) -> InspectionStage {
    InspectionStage {
        has_rg: records.iter().any(|r| r.kind == InspectionKind::Rg),
        has_snippet: records.iter().any(|r| r.kind == InspectionKind::Snippet),
        rg_hits: records
            .iter()
            .filter(|r| r.kind == InspectionKind::Rg)
            .map(|r| r.matches.len())
            .sum(),
    }
}

/// Parse `file:line:col:text` lines; anything else is skipped.
pub fn parse_vimgrep(stdout: &str) -> Vec<SearchMatch> {
    stdout
        .lines()
        .filter_map(|line| {
            let caps = VIMGREP_RE.captures(line)?;
            Some(SearchMatch {
                file: caps.get(1)?.as_str().to_string(),
                line: caps.get(2)?.as_str().parse().ok()?,
                col: caps.get(3)?.as_str().parse().ok()?,
                text: caps.get(4)?.as_str().to_string(),
            })
        })
        .collect()
}

/// Candidate selectors (`#id`, `.class`) from `id="…"` / `class="…"` tokens,
/// in first-seen order.
pub fn extract_selectors(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for caps in ATTR_RE.captures_iter(text) {
        let (Some(attr), Some(value)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let prefix = if attr.as_str() == "id" { "#" } else { "." };
        for token in value.as_str().split_whitespace() {
            let selector = format!("{prefix}{token}");
            if seen.insert(selector.clone()) {
                out.push(selector);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{
        ActionMeta, CommandReport, ExecResult, RunCmdPayload, SearchSpec, WriteFilePayload,
    };
    use chrono::{Duration, Utc};

    fn search_action(message: &str, stdout: &str, status: ActionStatus) -> Action {
        let mut action = Action::new(
            ActionKind::RunCmd(RunCmdPayload {
                cmd: "search header".to_string(),
                cwd: None,
                timeout_secs: None,
                search: Some(SearchSpec {
                    pattern: "header".to_string(),
                    max_results: 40,
                }),
            }),
            "Search",
            "",
        )
        .with_meta(ActionMeta::followup(message, InspectionKind::Rg));
        action.status = status;
        action.result = Some(ExecResult::success(ActionOutput::Command(CommandReport {
            cmd: "search header".to_string(),
            exit_code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
            timed_out: false,
            truncated_bytes: 0,
        })));
        action
    }

    #[test]
    fn inspections_for_other_messages_are_excluded() {
        let header = search_action("fix the header", "a.html:1:1:<header>", ActionStatus::Done);
        let actions = vec![header];
        assert_eq!(correlated(&actions, "Fix the header!").len(), 1);
        assert!(correlated(&actions, "fix the footer").is_empty());
    }

    #[test]
    fn only_done_followups_correlate() {
        let pending = search_action("fix it", "", ActionStatus::Pending);
        let mut untagged = search_action("fix it", "", ActionStatus::Done);
        untagged.meta.followup = false;
        let write = Action::new(
            ActionKind::WriteFile(WriteFilePayload {
                path: "a".to_string(),
                content: String::new(),
            }),
            "",
            "",
        );
        let actions = vec![pending, untagged, write];
        assert!(correlated(&actions, "fix it").is_empty());
    }

    #[test]
    fn correlated_inspections_are_oldest_first() {
        let mut newer = search_action("fix it", "", ActionStatus::Done);
        let mut older = search_action("fix it", "", ActionStatus::Done);
        older.created_at = Utc::now() - Duration::seconds(30);
        newer.created_at = Utc::now();
        let actions = vec![newer.clone(), older.clone()];
        let ids: Vec<&str> = correlated(&actions, "fix it")
            .iter()
            .map(|a| a.id.as_str())
            .collect();
        assert_eq!(ids, vec![older.id.as_str(), newer.id.as_str()]);
    }

    #[test]
    fn rg_output_parses_into_matches_and_stage() {
        let action = search_action(
            "fix it",
            "public/index.html:12:5:<header class=\"top\">\nnot a match line\n",
            ActionStatus::Done,
        );
        let record = inspection_record(&action).expect("record");
        assert_eq!(record.matches.len(), 1);
        assert_eq!(record.matches[0].line, 12);
        assert_eq!(record.matches[0].text, "<header class=\"top\">");

        let stage = inspection_stage(&[record]);
        assert!(stage.has_rg);
        assert!(!stage.has_snippet);
        assert_eq!(stage.rg_hits, 1);
    }

    #[test]
    fn selectors_come_from_id_and_class_attributes() {
        let selectors =
            extract_selectors("<div id=\"main\" class=\"card wide\"><p class='card'>");
        assert_eq!(selectors, vec!["#main", ".card", ".wide"]);
    }
}
