use crate::model::LedgerRecord;
use crate::series::Series;

/// Absorbs binary rounding so `|diff| == epsilon` stays consistent.
pub const FLOAT_SLACK: f64 = 1e-9;

/// An adjacent pair whose remaining balance does not follow from the
/// previous balance and this period's consumption.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub prev: &'a LedgerRecord,
    pub curr: &'a LedgerRecord,
    pub expected_remaining: f64,
    pub diff: f64,
}

impl Candidate<'_> {
    pub fn actual_remaining(&self) -> f64 {
        self.curr.remaining_sessions
    }
}

#[derive(Debug, Default)]
pub struct InvariantOutcome<'a> {
    pub pairs_compared: usize,
    pub candidates: Vec<Candidate<'a>>,
}

/// `diff` for one pair: actual remaining minus what the previous balance
/// implies after this period's consumption.
pub fn balance_diff(prev: &LedgerRecord, curr: &LedgerRecord) -> (f64, f64) {
    let expected = prev.remaining_sessions - curr.sessions_consumed_this_period;
    (expected, curr.remaining_sessions - expected)
}

pub fn within_tolerance(diff: f64, epsilon: f64) -> bool {
    diff.abs() <= epsilon + FLOAT_SLACK
}

/// Check every adjacent pair of every series.
pub fn check_series(series: &[Series], epsilon: f64) -> InvariantOutcome<'_> {
    let mut outcome = InvariantOutcome::default();

    for s in series {
        for (prev, curr) in s.adjacent_pairs() {
            outcome.pairs_compared += 1;
            let (expected_remaining, diff) = balance_diff(prev, curr);
            if !within_tolerance(diff, epsilon) {
                outcome.candidates.push(Candidate { prev, curr, expected_remaining, diff });
            }
        }
    }

    outcome
}
