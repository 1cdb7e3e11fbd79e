use log::debug;

use crate::config::WatchConfig;
use crate::invariant::{Candidate, FLOAT_SLACK};
use crate::model::{AuditCase, Category, EvidenceSource};

/// What a classification rule gets to look at.
pub struct RuleInput<'a> {
    pub candidate: &'a Candidate<'a>,
    pub in_watch_period: bool,
}

impl RuleInput<'_> {
    /// Balance did not fall and ended above what the previous balance minus
    /// this period's consumption allows. A flat balance despite consumption
    /// counts; a falling balance never does.
    fn remain_increased(&self) -> bool {
        let c = self.candidate;
        c.diff > 0.0 && c.curr.remaining_sessions >= c.prev.remaining_sessions
    }

    fn registered_delta(&self) -> f64 {
        self.candidate.curr.registered_sessions - self.candidate.prev.registered_sessions
    }
}

pub struct Rule {
    pub name: &'static str,
    pub applies: fn(&RuleInput<'_>) -> bool,
    pub category: Category,
}

/// Evaluated top to bottom; the first rule that applies decides the category.
pub const RULES: &[Rule] = &[
    Rule {
        name: "watch_period_overdraw",
        applies: watch_period_overdraw,
        category: Category::SuspectedAbuse,
    },
    Rule {
        name: "replenished_with_registration",
        applies: replenished_with_registration,
        category: Category::NormalReplenishment,
    },
    Rule {
        name: "increase_beyond_registration",
        applies: increase_beyond_registration,
        category: Category::UnexplainedIncrease,
    },
    Rule {
        name: "arithmetic_mismatch",
        applies: always,
        category: Category::CalculationMismatch,
    },
];

fn watch_period_overdraw(input: &RuleInput<'_>) -> bool {
    input.in_watch_period
        && input.candidate.curr.sessions_consumed_this_period
            > input.candidate.prev.remaining_sessions
}

/// New registrations cover the whole increase.
fn replenished_with_registration(input: &RuleInput<'_>) -> bool {
    let delta = input.registered_delta();
    input.remain_increased() && delta > 0.0 && delta >= input.candidate.diff - FLOAT_SLACK
}

/// Reached only when registrations are absent or too small to cover it.
fn increase_beyond_registration(input: &RuleInput<'_>) -> bool {
    input.remain_increased()
}

fn always(_: &RuleInput<'_>) -> bool {
    true
}

/// First matching rule for a candidate.
pub fn classify(candidate: &Candidate<'_>, watch: &WatchConfig) -> &'static Rule {
    let input = RuleInput {
        candidate,
        in_watch_period: watch.contains(candidate.curr.period),
    };
    RULES
        .iter()
        .find(|rule| (rule.applies)(&input))
        .unwrap_or(&RULES[RULES.len() - 1])
}

/// Classify a candidate and turn it into a case with invariant evidence.
pub fn build_case(candidate: &Candidate<'_>, watch: &WatchConfig) -> AuditCase {
    let rule = classify(candidate, watch);
    let (prev, curr) = (candidate.prev, candidate.curr);

    let mut case = AuditCase::single(rule.category, curr, false);
    case.prev = Some(prev.clone());
    case.expected_remaining = Some(candidate.expected_remaining);
    case.actual_remaining = Some(candidate.actual_remaining());
    case.diff = Some(candidate.diff);
    case.magnitude = candidate.diff.abs();

    case.add_evidence(
        EvidenceSource::Invariant,
        format!(
            "{} remaining {} - {} consumed {} = expected {}, actual {} (diff {:+})",
            prev.period,
            prev.remaining_sessions,
            curr.period,
            curr.sessions_consumed_this_period,
            candidate.expected_remaining,
            curr.remaining_sessions,
            candidate.diff
        ),
    );
    case.add_evidence(EvidenceSource::Classifier, format!("rule {}", rule.name));

    if rule.category == Category::UnexplainedIncrease {
        let registered_delta = curr.registered_sessions - prev.registered_sessions;
        if registered_delta > 0.0 {
            case.add_evidence(
                EvidenceSource::Classifier,
                format!(
                    "registration grew by {registered_delta} but balance grew by {} beyond consumption",
                    candidate.diff
                ),
            );
        }
    }

    debug!(
        "{} / {} {}: {} via {}",
        case.trainer, case.member, case.period, case.category, rule.name
    );
    case
}
