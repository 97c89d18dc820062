//! Prompt rendering for oracle calls.

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::types::Snapshot;

const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");
const TRIAGE_TEMPLATE: &str = include_str!("prompts/triage.md");
const CHAT_TEMPLATE: &str = include_str!("prompts/chat.md");

#[derive(Debug, Clone, Serialize)]
struct FileContext<'a> {
    path: &'a str,
    text: &'a str,
    truncated: bool,
}

#[derive(Debug, Clone, Serialize)]
struct InspectionContext<'a> {
    kind: &'static str,
    command: &'a str,
    output: &'a str,
    selectors: &'a [String],
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("planner", PLANNER_TEMPLATE)
            .expect("planner template should be valid");
        env.add_template("triage", TRIAGE_TEMPLATE)
            .expect("triage template should be valid");
        env.add_template("chat", CHAT_TEMPLATE)
            .expect("chat template should be valid");
        Self { env }
    }

    pub fn render_triage(&self, message: &str) -> Result<String> {
        let template = self.env.get_template("triage")?;
        Ok(template.render(context! { message => message.trim() })?)
    }

    pub fn render_chat(&self, message: &str) -> Result<String> {
        let template = self.env.get_template("chat")?;
        Ok(template.render(context! { message => message.trim() })?)
    }

    /// Planner prompt with every snapshot file and correlated inspection.
    pub fn render_planner(
        &self,
        snapshot: &Snapshot,
        pass: u32,
        stylesheet: &str,
        html: &str,
    ) -> Result<String> {
        let files: Vec<FileContext<'_>> = snapshot
            .raw_files
            .iter()
            .map(|(path, text)| FileContext {
                path,
                text,
                truncated: snapshot.truncated_files.contains(path),
            })
            .collect();
        let inspections: Vec<InspectionContext<'_>> = snapshot
            .run_cmd_outputs
            .iter()
            .map(|record| InspectionContext {
                kind: record.kind.as_str(),
                command: &record.command,
                output: record.output.trim_end(),
                selectors: &record.selectors,
            })
            .collect();

        let template = self.env.get_template("planner")?;
        let rendered = template.render(context! {
            message => snapshot.message.trim(),
            last_intent => snapshot.last_intent.map(|intent| intent.as_str()),
            pass => pass,
            stylesheet => stylesheet,
            html => html,
            files => files,
            inspections => inspections,
        })?;
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::InspectionKind;
    use crate::core::types::{InspectionRecord, Intent};

    #[test]
    fn planner_prompt_includes_files_and_inspections() {
        let mut snapshot = Snapshot {
            message: "  make the card blue ".to_string(),
            last_intent: Some(Intent::Plan),
            ..Snapshot::default()
        };
        snapshot
            .raw_files
            .insert("public/styles.css".to_string(), ".card {}".to_string());
        snapshot
            .truncated_files
            .insert("public/styles.css".to_string());
        snapshot.run_cmd_outputs.push(InspectionRecord {
            action_id: "a".to_string(),
            kind: InspectionKind::Snippet,
            command: "read src/card.html:1-3".to_string(),
            path: Some("src/card.html".to_string()),
            output: "<div id=\"card\">\n".to_string(),
            matches: Vec::new(),
            selectors: vec!["#card".to_string(), ".wide".to_string()],
        });

        let prompt = PromptEngine::new()
            .render_planner(&snapshot, 1, "public/styles.css", "public/index.html")
            .expect("render");
        assert!(prompt.contains("<request>\nmake the card blue\n</request>"));
        assert!(prompt.contains("<file path=\"public/styles.css\" truncated=\"true\">"));
        assert!(prompt.contains("Candidate selectors: #card, .wide"));
        assert!(prompt.contains("<last_intent>plan</last_intent>"));
        assert!(prompt.contains("Automatic inspection pass 1"));
    }

    #[test]
    fn triage_and_chat_prompts_embed_message() {
        let engine = PromptEngine::new();
        assert!(engine.render_triage("hello").expect("triage").contains("hello"));
        assert!(engine.render_chat("hello").expect("chat").contains("hello"));
    }
}
