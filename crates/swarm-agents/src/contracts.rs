//! Structured output contracts shared by the Generator and Critic.
//!
//! The Critic's rule set is a closed enumeration (§4.3): critical issues
//! imply rejection, warnings alone do not. The Generator runs the same
//! rule set against its own draft before returning (§4.2 step 4), so the
//! checks live here once and both workers call into them.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// One rule in the closed critic enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    IndexBasedLocator,
    HashedCssClass,
    IndefiniteTimeoutWait,
    HardcodedCredentials,
    HardcodedBaseHost,
    MissingAssertion,
    MissingStableSelector,
    MissingScreenshot,
    StepCountExceeded,
    DurationExceeded,
}

impl IssueType {
    /// Critical issues imply `rejected`; warnings alone do not (§4.3).
    pub fn severity(self) -> IssueSeverity {
        match self {
            Self::StepCountExceeded | Self::DurationExceeded => IssueSeverity::Warning,
            _ => IssueSeverity::Critical,
        }
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::IndexBasedLocator => "index_based_locator",
            Self::HashedCssClass => "hashed_css_class",
            Self::IndefiniteTimeoutWait => "indefinite_timeout_wait",
            Self::HardcodedCredentials => "hardcoded_credentials",
            Self::HardcodedBaseHost => "hardcoded_base_host",
            Self::MissingAssertion => "missing_assertion",
            Self::MissingStableSelector => "missing_stable_selector",
            Self::MissingScreenshot => "missing_screenshot",
            Self::StepCountExceeded => "step_count_exceeded",
            Self::DurationExceeded => "duration_exceeded",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Critical,
    Warning,
}

/// One finding against a test source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub severity: IssueSeverity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub reason: String,
    pub fix: String,
}

/// Counters attached to a critic report.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Counters {
    pub critical: u32,
    pub warnings: u32,
    pub assertion_count: u32,
    pub step_count: u32,
    pub est_duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticStatus {
    Approved,
    Rejected,
}

impl fmt::Display for CriticStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// The Critic's (and Generator self-validation's) full report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticReport {
    pub status: CriticStatus,
    pub issues: Vec<Issue>,
    pub counters: Counters,
    pub estimated_cost: f64,
    pub estimated_duration_ms: u64,
}

impl CriticReport {
    /// Whether the report has at least one critical issue.
    pub fn is_rejected(&self) -> bool {
        matches!(self.status, CriticStatus::Rejected)
    }
}

/// Per-step duration estimate used to project `est_duration_ms`.
const PER_STEP_ESTIMATE_MS: u64 = 2_000;

struct RuleSet {
    index_locator: Regex,
    hashed_css_class: Regex,
    indefinite_wait: Regex,
    hardcoded_credentials: Regex,
    hardcoded_base_host: Regex,
    stable_selector: Regex,
    assertion: Regex,
    screenshot: Regex,
    step_marker: Regex,
}

impl RuleSet {
    fn compiled() -> Self {
        Self {
            index_locator: Regex::new(r"(?i)nth-child\(|nth-of-type\(|:nth\(|\.nth\(|\.first\(\)|\.last\(\)|nth=\d").unwrap(),
            hashed_css_class: Regex::new(r"\.css-[a-f0-9]{5,}|_[a-f0-9]{8,}\b|class-[a-f0-9]{6,}").unwrap(),
            indefinite_wait: Regex::new(r"(?i)wait_for_timeout\(|sleep\(\s*\d|setTimeout\(.*,\s*\d{3,}\)|time\.sleep\(").unwrap(),
            hardcoded_credentials: Regex::new(r#"(?i)(password|api_key|secret)\s*[:=]\s*["'][^"'\s]{3,}["']"#).unwrap(),
            hardcoded_base_host: Regex::new(r"(?i)https?://(localhost|127\.0\.0\.1)").unwrap(),
            stable_selector: Regex::new(r#"(?i)data-testid|get_by_test_id|getByTestId"#).unwrap(),
            assertion: Regex::new(r"(?i)\bassert|expect\(").unwrap(),
            screenshot: Regex::new(r"(?i)screenshot\(").unwrap(),
            step_marker: Regex::new(r"(?i)\.click\(|\.fill\(|\.goto\(|\.press\(|\.check\(|\.select_option\(").unwrap(),
        }
    }
}

/// Run the closed rule set against a test source. Shared by Critic and
/// Generator self-validation (§4.2 step 4, §4.3).
pub fn review_source(source: &str, max_steps: u32, max_duration_ms: u64) -> CriticReport {
    let rules = RuleSet::compiled();
    let mut issues = Vec::new();

    for (lineno, line) in source.lines().enumerate() {
        let line_num = Some((lineno + 1) as u32);
        if rules.index_locator.is_match(line) {
            issues.push(Issue {
                issue_type: IssueType::IndexBasedLocator,
                severity: IssueSeverity::Critical,
                line: line_num,
                reason: "positional index selector is unstable under DOM reordering".into(),
                fix: "replace with a data-testid or role-based locator".into(),
            });
        }
        if rules.hashed_css_class.is_match(line) {
            issues.push(Issue {
                issue_type: IssueType::HashedCssClass,
                severity: IssueSeverity::Critical,
                line: line_num,
                reason: "generated/hashed CSS class names change across builds".into(),
                fix: "use a stable selector attribute instead of the class name".into(),
            });
        }
        if rules.indefinite_wait.is_match(line) {
            issues.push(Issue {
                issue_type: IssueType::IndefiniteTimeoutWait,
                severity: IssueSeverity::Critical,
                line: line_num,
                reason: "fixed-duration wait is flaky under load".into(),
                fix: "wait on a selector or network-idle state instead".into(),
            });
        }
        if rules.hardcoded_credentials.is_match(line) {
            issues.push(Issue {
                issue_type: IssueType::HardcodedCredentials,
                severity: IssueSeverity::Critical,
                line: line_num,
                reason: "credential literal embedded in test source".into(),
                fix: "load the credential from an environment variable or secret slot".into(),
            });
        }
        if rules.hardcoded_base_host.is_match(line) {
            issues.push(Issue {
                issue_type: IssueType::HardcodedBaseHost,
                severity: IssueSeverity::Critical,
                line: line_num,
                reason: "hardcoded loopback host prevents the test from targeting other envs".into(),
                fix: "read the base URL from an environment variable".into(),
            });
        }
    }

    let assertion_count = rules.assertion.find_iter(source).count() as u32;
    if assertion_count == 0 {
        issues.push(Issue {
            issue_type: IssueType::MissingAssertion,
            severity: IssueSeverity::Critical,
            line: None,
            reason: "test makes no assertions".into(),
            fix: "add at least one assertion against observable state".into(),
        });
    }

    if !rules.stable_selector.is_match(source) {
        issues.push(Issue {
            issue_type: IssueType::MissingStableSelector,
            severity: IssueSeverity::Critical,
            line: None,
            reason: "no stable test-id-style selector found".into(),
            fix: "add data-testid attributes to targeted elements, or select by them".into(),
        });
    }

    if !rules.screenshot.is_match(source) {
        issues.push(Issue {
            issue_type: IssueType::MissingScreenshot,
            severity: IssueSeverity::Critical,
            line: None,
            reason: "no screenshot capture at step boundaries".into(),
            fix: "call screenshot() after each significant interaction".into(),
        });
    }

    let step_count = rules.step_marker.find_iter(source).count() as u32;
    if step_count > max_steps {
        issues.push(Issue {
            issue_type: IssueType::StepCountExceeded,
            severity: IssueSeverity::Warning,
            line: None,
            reason: format!("{step_count} steps exceeds the {max_steps}-step guideline"),
            fix: "split into multiple focused tests".into(),
        });
    }

    let est_duration_ms = step_count as u64 * PER_STEP_ESTIMATE_MS;
    if est_duration_ms > max_duration_ms {
        issues.push(Issue {
            issue_type: IssueType::DurationExceeded,
            severity: IssueSeverity::Warning,
            line: None,
            reason: format!("estimated duration {est_duration_ms}ms exceeds {max_duration_ms}ms"),
            fix: "reduce step count or split the test".into(),
        });
    }

    let critical = issues
        .iter()
        .filter(|i| i.severity == IssueSeverity::Critical)
        .count() as u32;
    let warnings = issues
        .iter()
        .filter(|i| i.severity == IssueSeverity::Warning)
        .count() as u32;

    let status = if critical > 0 {
        CriticStatus::Rejected
    } else {
        CriticStatus::Approved
    };

    CriticReport {
        status,
        issues,
        counters: Counters {
            critical,
            warnings,
            assertion_count,
            step_count,
            est_duration_ms,
        },
        estimated_cost: 0.0,
        estimated_duration_ms: est_duration_ms,
    }
}

/// The Generator's self-validation report (§4.2 output contract).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfValidationReport {
    pub passed: bool,
    pub issues: Vec<String>,
    pub attempts_used: u32,
    pub patterns_used: Vec<String>,
}

impl SelfValidationReport {
    /// Fail-closed default: a Generator bug that skips self-validation must
    /// never be mistaken for a passing report.
    pub fn fail_closed(attempts_used: u32) -> Self {
        Self {
            passed: false,
            issues: vec!["self-validation did not run".to_string()],
            attempts_used,
            patterns_used: Vec::new(),
        }
    }

    pub fn from_critic_report(
        report: &CriticReport,
        attempts_used: u32,
        patterns_used: Vec<String>,
    ) -> Self {
        Self {
            passed: !report.is_rejected(),
            issues: report.issues.iter().map(|i| i.reason.clone()).collect(),
            attempts_used,
            patterns_used,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD_TEST: &str = r#"
page.goto("{{BASE_URL}}/login")
page.fill("[data-testid=email]", "user@example.com")
page.click("[data-testid=submit]")
page.screenshot("login-submitted.png")
assert page.get_by_test_id("welcome").is_visible()
"#;

    #[test]
    fn clean_source_is_approved() {
        let report = review_source(GOOD_TEST, 10, 60_000);
        assert_eq!(report.status, CriticStatus::Approved);
        assert_eq!(report.counters.critical, 0);
    }

    #[test]
    fn index_based_locator_is_critical() {
        let source = "page.click(\".item:nth-child(3)\")\nassert page.get_by_test_id(\"x\")\npage.screenshot(\"a.png\")";
        let report = review_source(source, 10, 60_000);
        assert!(report.is_rejected());
        assert!(report
            .issues
            .iter()
            .any(|i| i.issue_type == IssueType::IndexBasedLocator));
    }

    #[test]
    fn hardcoded_base_host_is_critical() {
        let source = "page.goto(\"http://localhost:3000\")\nassert true\npage.screenshot(\"a.png\")\npage.get_by_test_id(\"x\")";
        let report = review_source(source, 10, 60_000);
        assert!(report
            .issues
            .iter()
            .any(|i| i.issue_type == IssueType::HardcodedBaseHost));
    }

    #[test]
    fn missing_assertion_is_critical() {
        let source = "page.goto(\"{{BASE_URL}}\")\npage.screenshot(\"a.png\")\npage.get_by_test_id(\"x\")";
        let report = review_source(source, 10, 60_000);
        assert!(report
            .issues
            .iter()
            .any(|i| i.issue_type == IssueType::MissingAssertion));
    }

    #[test]
    fn missing_screenshot_is_critical() {
        let source = "page.goto(\"{{BASE_URL}}\")\nassert page.get_by_test_id(\"x\").is_visible()";
        let report = review_source(source, 10, 60_000);
        assert!(report
            .issues
            .iter()
            .any(|i| i.issue_type == IssueType::MissingScreenshot));
    }

    #[test]
    fn step_count_exceeded_is_warning_not_rejection() {
        let mut source =
            String::from("assert true\npage.screenshot(\"a.png\")\npage.get_by_test_id(\"x\")\n");
        for _ in 0..12 {
            source.push_str("page.click(\"[data-testid=next]\")\n");
        }
        let report = review_source(&source, 10, 1_000_000);
        assert!(report
            .issues
            .iter()
            .any(|i| i.issue_type == IssueType::StepCountExceeded));
        assert!(!report.is_rejected());
    }

    #[test]
    fn hardcoded_credentials_is_critical() {
        let source = "password = \"hunter2\"\nassert page.get_by_test_id(\"x\")\npage.screenshot(\"a.png\")";
        let report = review_source(source, 10, 60_000);
        assert!(report
            .issues
            .iter()
            .any(|i| i.issue_type == IssueType::HardcodedCredentials));
    }

    #[test]
    fn self_validation_report_fail_closed_is_never_passed() {
        let report = SelfValidationReport::fail_closed(2);
        assert!(!report.passed);
        assert_eq!(report.attempts_used, 2);
    }

    #[test]
    fn self_validation_report_from_rejected_critic_report_fails() {
        let critic = review_source("no screenshots or assertions here", 10, 60_000);
        let report = SelfValidationReport::from_critic_report(&critic, 1, vec![]);
        assert!(!report.passed);
        assert!(!report.issues.is_empty());
    }

    #[test]
    fn self_validation_report_from_approved_critic_report_passes() {
        let critic = review_source(GOOD_TEST, 10, 60_000);
        let report = SelfValidationReport::from_critic_report(&critic, 1, vec!["pattern-1".into()]);
        assert!(report.passed);
        assert_eq!(report.patterns_used, vec!["pattern-1".to_string()]);
    }

    #[test]
    fn issue_type_severity_matches_classification() {
        assert_eq!(
            IssueType::StepCountExceeded.severity(),
            IssueSeverity::Warning
        );
        assert_eq!(
            IssueType::IndexBasedLocator.severity(),
            IssueSeverity::Critical
        );
    }
}
