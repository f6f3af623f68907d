//! Turns a raw command string into a structured `Intent`.
//!
//! Rule-based, like the critic's issue rules: a fixed set of compiled
//! patterns decides the intent type and pulls out slots, no model call.
//! When nothing matches confidently the intent is `Unknown` and flagged
//! for clarification rather than guessed at.

use std::sync::OnceLock;

use regex::Regex;
use testgen_core::{Intent, IntentType};

struct Rules {
    create: Regex,
    run: Regex,
    fix: Regex,
    validate: Regex,
    status: Regex,
    feature_clause: Regex,
    task_id: Regex,
}

fn rules() -> &'static Rules {
    static RULES: OnceLock<Rules> = OnceLock::new();
    RULES.get_or_init(|| Rules {
        create: Regex::new(r"(?i)\b(create|add|write|generate|build)\b.*\b(test|tests|spec)\b").unwrap(),
        run: Regex::new(r"(?i)\b(run|execute|retry)\b.*\btest").unwrap(),
        fix: Regex::new(r"(?i)\b(fix|repair|debug)\b").unwrap(),
        validate: Regex::new(r"(?i)\bvalidate\b").unwrap(),
        status: Regex::new(r"(?i)^\s*(status|progress)\b").unwrap(),
        feature_clause: Regex::new(r"(?i)\bfor\s+(.+)$|\btest(?:ing|s)?\s+(?:for|that)\s+(.+)$").unwrap(),
        task_id: Regex::new(r"\btask-[0-9a-fA-F-]{8,}\b").unwrap(),
    })
}

/// Confidence below this is treated as not a match at all, mirroring the
/// critic's closed rule set: a rule either fires or it doesn't, there's no
/// partial credit.
const MIN_CONFIDENCE: f32 = 0.55;

/// Parse `raw_command` into an `Intent`. Always returns an `Intent`, never
/// an error — an unparseable command becomes `IntentType::Unknown` with
/// `needs_clarification` set, which the router turns into a clarification
/// prompt rather than a queued Task.
pub fn parse(raw_command: &str) -> Intent {
    let trimmed = raw_command.trim();
    let rules = rules();

    if let Some(task_id) = rules.task_id.find(trimmed) {
        let task_id = task_id.as_str().to_string();
        if rules.fix.is_match(trimmed) {
            return Intent::new(IntentType::FixFailure, trimmed, 0.9).with_slot("task_id", task_id);
        }
        if rules.run.is_match(trimmed) {
            return Intent::new(IntentType::RunTest, trimmed, 0.9).with_slot("task_id", task_id);
        }
        if rules.validate.is_match(trimmed) {
            return Intent::new(IntentType::Validate, trimmed, 0.9).with_slot("task_id", task_id);
        }
    }

    if rules.status.is_match(trimmed) {
        return Intent::new(IntentType::Status, trimmed, 0.95);
    }

    if rules.create.is_match(trimmed) {
        let mut intent = Intent::new(IntentType::CreateTest, trimmed, 0.85);
        if let Some(feature) = extract_feature(rules, trimmed) {
            intent = intent.with_slot("feature", feature);
        }
        if let Some(complexity) = extract_complexity(trimmed) {
            intent = intent.with_slot("complexity", complexity);
        }
        return intent;
    }

    if rules.fix.is_match(trimmed) {
        return Intent::new(IntentType::FixFailure, trimmed, 0.7);
    }

    if rules.run.is_match(trimmed) {
        return Intent::new(IntentType::RunTest, trimmed, 0.7);
    }

    if rules.validate.is_match(trimmed) {
        return Intent::new(IntentType::Validate, trimmed, 0.7);
    }

    // No rule fired with enough confidence to act on; ask rather than guess.
    Intent::new(IntentType::Unknown, trimmed, 0.0)
        .needing_clarification(clarification_for(trimmed))
}

fn extract_feature(rules: &Rules, text: &str) -> Option<String> {
    let caps = rules.feature_clause.captures(text)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().trim().trim_end_matches('.').to_string())
        .filter(|s| !s.is_empty())
}

fn extract_complexity(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    if lower.contains("complex") || lower.contains("hard") || lower.contains("multi-step") {
        Some("hard".to_string())
    } else if lower.contains("simple") || lower.contains("easy") || lower.contains("basic") {
        Some("easy".to_string())
    } else {
        None
    }
}

fn clarification_for(text: &str) -> String {
    if text.is_empty() {
        "what would you like me to do?".to_string()
    } else {
        format!("I couldn't tell what kind of task \"{text}\" is — create a test, run one, fix a failure, validate, or check status?")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_test_extracts_feature_and_complexity() {
        let intent = parse("create a simple test for the login flow");
        assert_eq!(intent.intent_type, IntentType::CreateTest);
        assert_eq!(intent.slots.get("feature").unwrap(), "login flow");
        assert_eq!(intent.slots.get("complexity").unwrap(), "easy");
        assert!(intent.confidence >= MIN_CONFIDENCE);
    }

    #[test]
    fn build_feature_phrasing_also_creates() {
        let intent = parse("generate tests that cover checkout with a saved card");
        assert_eq!(intent.intent_type, IntentType::CreateTest);
        assert_eq!(intent.slots.get("feature").unwrap(), "checkout with a saved card");
    }

    #[test]
    fn fix_with_task_id_routes_to_fix_failure_with_slot() {
        let intent = parse("fix task-a1b2c3d4-0000-0000-0000-000000000000, it keeps failing");
        assert_eq!(intent.intent_type, IntentType::FixFailure);
        assert_eq!(
            intent.slots.get("task_id").unwrap(),
            "task-a1b2c3d4-0000-0000-0000-000000000000"
        );
        assert!(intent.confidence > 0.8);
    }

    #[test]
    fn status_query_is_recognized() {
        let intent = parse("status");
        assert_eq!(intent.intent_type, IntentType::Status);
    }

    #[test]
    fn gibberish_asks_for_clarification() {
        let intent = parse("purple elephants dance slowly");
        assert_eq!(intent.intent_type, IntentType::Unknown);
        assert!(intent.needs_clarification);
        assert!(intent.clarification_prompt.is_some());
    }

    #[test]
    fn empty_command_asks_for_clarification() {
        let intent = parse("");
        assert!(intent.needs_clarification);
        assert_eq!(intent.clarification_prompt.unwrap(), "what would you like me to do?");
    }
}
