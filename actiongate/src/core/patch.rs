//! Literal find/replace edit application.
//!
//! The compiler simulates edits leniently to decide what to propose; the
//! executor applies them strictly so a preview always equals the execution.

use crate::action::{EditMode, PatchEdit};
use crate::error::ActionError;

/// Outcome of applying edits in order on an in-memory copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Simulation {
    pub text: String,
    /// Whether each edit (by index) matched something.
    pub matched: Vec<bool>,
}

/// Apply every edit that matches; unmatched edits are recorded and skipped.
pub fn simulate(original: &str, edits: &[PatchEdit]) -> Simulation {
    let mut text = original.to_string();
    let mut matched = Vec::with_capacity(edits.len());
    for edit in edits {
        matched.push(apply_one(&mut text, edit));
    }
    Simulation { text, matched }
}

/// Apply edits strictly: every `once`/`all` anchor must be present and the
/// result must differ from the original.
pub fn apply_strict(original: &str, edits: &[PatchEdit]) -> Result<String, ActionError> {
    if edits.is_empty() {
        return Err(ActionError::missing("edits"));
    }
    let simulation = simulate(original, edits);
    if let Some(index) = simulation.matched.iter().position(|m| !m) {
        return Err(ActionError::PatchMismatch(format!(
            "edit {index} anchor not found"
        )));
    }
    if simulation.text == original {
        return Err(ActionError::PatchMismatch(
            "edits produce no effective change".to_string(),
        ));
    }
    Ok(simulation.text)
}

/// Keep only the edits that still match when replayed in order.
pub fn matching_edits(original: &str, edits: &[PatchEdit]) -> Vec<PatchEdit> {
    let mut text = original.to_string();
    let mut kept = Vec::new();
    for edit in edits {
        if apply_one(&mut text, edit) {
            kept.push(edit.clone());
        }
    }
    kept
}

fn apply_one(text: &mut String, edit: &PatchEdit) -> bool {
    match edit.mode {
        EditMode::Append => {
            if edit.replace.is_empty() {
                return false;
            }
            text.push_str(&edit.replace);
            true
        }
        EditMode::Once => {
            if edit.find.is_empty() || !text.contains(&edit.find) {
                return false;
            }
            *text = text.replacen(&edit.find, &edit.replace, 1);
            true
        }
        EditMode::All => {
            if edit.find.is_empty() || !text.contains(&edit.find) {
                return false;
            }
            *text = text.replace(&edit.find, &edit.replace);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn once_replaces_first_occurrence_only() {
        let out = apply_strict("a a a", &[PatchEdit::once("a", "b")]).expect("apply");
        assert_eq!(out, "b a a");
    }

    #[test]
    fn all_replaces_every_occurrence() {
        let edit = PatchEdit {
            find: "a".to_string(),
            replace: "b".to_string(),
            mode: EditMode::All,
        };
        assert_eq!(apply_strict("a a a", &[edit]).expect("apply"), "b b b");
    }

    #[test]
    fn edits_apply_in_order_on_the_updated_text() {
        let edits = [PatchEdit::once("red", "blue"), PatchEdit::once("blue", "green")];
        assert_eq!(apply_strict("red", &edits).expect("apply"), "green");
    }

    #[test]
    fn missing_anchor_is_a_mismatch() {
        let err = apply_strict("abc", &[PatchEdit::once("abc", "x"), PatchEdit::once("zzz", "y")])
            .expect_err("mismatch");
        assert_eq!(err.kind(), ErrorKind::PatchMismatch);
    }

    #[test]
    fn no_net_change_is_a_mismatch() {
        let err = apply_strict("abc", &[PatchEdit::once("b", "b")]).expect_err("no change");
        assert!(err.to_string().contains("no effective change"));
    }

    #[test]
    fn simulation_keeps_only_matching_edits() {
        let edits = [PatchEdit::once("x", "y"), PatchEdit::once("b", "B")];
        let sim = simulate("abc", &edits);
        assert_eq!(sim.matched, vec![false, true]);
        assert_eq!(sim.text, "aBc");
        assert_eq!(matching_edits("abc", &edits), vec![PatchEdit::once("b", "B")]);
    }
}
