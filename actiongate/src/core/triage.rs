//! Deterministic first-pass intent rules.
//!
//! Returns `None` when the rules are not confident; the caller then asks the
//! oracle.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::normalize::normalize_message;
use crate::core::types::Intent;

static PLAN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(?:please|pls|can you|could you|would you|go ahead and|let's|lets)\s+)*(?:change|make|set|add|remove|delete|fix|update|create|write|rename|replace|move|edit|patch|run|install|build|restart|reboot|shut down|shutdown|turn off|open|launch|start|mkdir|append|insert|style|color|colour|resize|center|align|hide|show)\b",
    )
    .expect("plan regex")
});
static CHAT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:hi|hello|hey|yo|thanks|thank you|good (?:morning|afternoon|evening|night)|how are you|what's up|whats up|who are you|tell me a|ok|okay|cool|nice|great|lol)\b",
    )
    .expect("chat regex")
});

/// Classify with keyword rules only.
pub fn classify(message: &str) -> Option<Intent> {
    let normalized = normalize_message(message);
    if normalized.is_empty() {
        return Some(Intent::Chat);
    }
    if PLAN_RE.is_match(&normalized) {
        return Some(Intent::Plan);
    }
    if CHAT_RE.is_match(&normalized) {
        return Some(Intent::Chat);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn imperative_edits_are_plan() {
        assert_eq!(classify("Make the button blue"), Some(Intent::Plan));
        assert_eq!(
            classify("can you please change the title?"),
            Some(Intent::Plan)
        );
        assert_eq!(classify("turn off"), Some(Intent::Plan));
    }

    #[test]
    fn greetings_are_chat() {
        assert_eq!(classify("Hello there!"), Some(Intent::Chat));
        assert_eq!(classify("thanks"), Some(Intent::Chat));
        assert_eq!(classify("   "), Some(Intent::Chat));
    }

    #[test]
    fn ambiguous_messages_defer_to_the_oracle() {
        assert_eq!(classify("the header looks off to me"), None);
        assert_eq!(classify("makeup tips"), None);
    }
}
