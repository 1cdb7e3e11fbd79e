use std::collections::HashMap;

use log::debug;

use crate::config::ToleranceConfig;
use crate::invariant::FLOAT_SLACK;
use crate::model::{AuditCase, Category, EvidenceSource, LedgerRecord, TrainerStatus};
use crate::period::Period;
use crate::series::Series;

/// Membership and activity checks that do not depend on the balance
/// invariant. Adjacency here follows the run-wide list of available
/// periods, so a member absent from a month other members appear in is
/// genuinely missing.
pub struct SecondaryChecks<'a> {
    pub available: &'a [Period],
    pub tolerance: &'a ToleranceConfig,
    pub trainers: Option<&'a HashMap<String, TrainerStatus>>,
}

impl SecondaryChecks<'_> {
    pub fn run(&self, series: &[Series]) -> Vec<AuditCase> {
        let mut cases = Vec::new();
        for s in series {
            self.check_series(s, &mut cases);
            if s.trainer.is_none() {
                trainer_changes(s, &mut cases);
            }
        }
        cases
    }

    fn check_series(&self, series: &Series, cases: &mut Vec<AuditCase>) {
        for (idx, period) in self.available.iter().enumerate() {
            let Some(curr) = series.get(*period) else {
                continue;
            };
            let prev = idx.checked_sub(1).map(|i| self.available[i]);
            let next = self.available.get(idx + 1).copied();

            if let Some(next) = next {
                if let Some(case) = self.missing_member(series, curr, next) {
                    cases.push(case);
                }
            }
            if let Some(prev) = prev {
                let prev_record = series.get(prev);
                if let Some(case) = self.session_drop(prev_record, curr) {
                    cases.push(case);
                }
                if let Some(case) = returning_member(prev, prev_record, curr) {
                    cases.push(case);
                }
            }
        }
    }

    fn trainer_active(&self, trainer: &str) -> bool {
        !matches!(
            self.trainers.and_then(|t| t.get(trainer)),
            Some(TrainerStatus::Terminated)
        )
    }

    fn missing_member(
        &self,
        series: &Series,
        curr: &LedgerRecord,
        next: Period,
    ) -> Option<AuditCase> {
        if curr.sessions_consumed_this_period <= 0.0 {
            return None;
        }
        if let Some(following) = series.get(next) {
            // Member-keyed series: a record under another trainer is a
            // trainer change, reported separately.
            if following.trainer != curr.trainer {
                debug!(
                    "{} moved from {} to {} in {next}",
                    curr.member, curr.trainer, following.trainer
                );
            }
            return None;
        }
        if !self.trainer_active(&curr.trainer) {
            debug!(
                "{} absent in {next}, trainer {} terminated: not flagged",
                curr.member, curr.trainer
            );
            return None;
        }

        let mut case = AuditCase::single(Category::MissingMember, curr, true);
        case.add_evidence(
            EvidenceSource::Series,
            format!(
                "consumed {} in {} under {}, no record in {next}",
                curr.sessions_consumed_this_period, curr.period, curr.trainer
            ),
        );
        if self.trainers.is_some() {
            case.add_evidence(EvidenceSource::TrainerStatus, format!("{} active", curr.trainer));
        }
        Some(case)
    }

    fn session_drop(&self, prev: Option<&LedgerRecord>, curr: &LedgerRecord) -> Option<AuditCase> {
        let prev = prev?;
        let before = prev.sessions_consumed_this_period;
        let now = curr.sessions_consumed_this_period;
        if before <= 0.0 || now >= before * self.tolerance.drop_ratio - FLOAT_SLACK {
            return None;
        }

        let mut case = AuditCase::single(Category::SessionDrop, curr, false);
        case.prev = Some(prev.clone());
        case.add_evidence(
            EvidenceSource::Series,
            format!(
                "consumed {now} in {} after {before} in {} (below {:.0}%)",
                curr.period,
                prev.period,
                self.tolerance.drop_ratio * 100.0
            ),
        );
        Some(case)
    }
}

fn returning_member(
    prev_period: Period,
    prev: Option<&LedgerRecord>,
    curr: &LedgerRecord,
) -> Option<AuditCase> {
    if curr.sessions_consumed_this_period <= 0.0 {
        return None;
    }
    let before = prev.map(|p| p.sessions_consumed_this_period).unwrap_or(0.0);
    if before.abs() > FLOAT_SLACK {
        return None;
    }

    let mut case = AuditCase::single(Category::ReturningMember, curr, false);
    case.prev = prev.cloned();
    let note = match prev {
        Some(_) => format!(
            "no sessions in {prev_period}, {} in {}",
            curr.sessions_consumed_this_period, curr.period
        ),
        None => format!(
            "no record in {prev_period}, {} sessions in {}",
            curr.sessions_consumed_this_period, curr.period
        ),
    };
    case.add_evidence(EvidenceSource::Series, note);
    Some(case)
}

fn trainer_changes(series: &Series, cases: &mut Vec<AuditCase>) {
    for (prev, curr) in series.adjacent_pairs() {
        if prev.trainer == curr.trainer {
            continue;
        }
        let mut case = AuditCase::single(Category::TrainerChanged, curr, false);
        case.prev = Some(prev.clone());
        case.add_evidence(
            EvidenceSource::Series,
            format!(
                "trainer {} in {} -> {} in {}",
                prev.trainer, prev.period, curr.trainer, curr.period
            ),
        );
        cases.push(case);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(trainer: &str, member: &str, month: u32, consumed: f64) -> LedgerRecord {
        LedgerRecord {
            row: month as usize,
            trainer: trainer.into(),
            member: member.into(),
            period: Period::new(2025, month).unwrap(),
            registered_sessions: 20.0,
            total_consumed_sessions: 0.0,
            remaining_sessions: 10.0,
            sessions_consumed_this_period: consumed,
            fee_this_period: 0.0,
            unit_price: None,
            revenue_share: None,
        }
    }

    fn series(trainer: Option<&str>, records: Vec<LedgerRecord>) -> Series {
        let member = records[0].member.clone();
        Series { trainer: trainer.map(String::from), member, records }
    }

    fn periods(months: &[u32]) -> Vec<Period> {
        months.iter().map(|m| Period::new(2025, *m).unwrap()).collect()
    }

    fn categories(cases: &[AuditCase]) -> Vec<(Category, String)> {
        cases.iter().map(|c| (c.category, c.period.to_string())).collect()
    }

    #[test]
    fn missing_member_under_active_trainer() {
        let available = periods(&[8, 9]);
        let tolerance = ToleranceConfig::default();
        let s = vec![series(Some("X"), vec![rec("X", "Kim", 8, 2.0)])];

        let checks = SecondaryChecks { available: &available, tolerance: &tolerance, trainers: None };
        let cases = checks.run(&s);
        assert_eq!(categories(&cases), vec![(Category::MissingMember, "2025-08".into())]);
        assert!(cases[0].prev.is_some() && cases[0].curr.is_none());

        let statuses = HashMap::from([("X".to_string(), TrainerStatus::Terminated)]);
        let checks = SecondaryChecks {
            available: &available,
            tolerance: &tolerance,
            trainers: Some(&statuses),
        };
        assert!(checks.run(&s).is_empty());
    }

    #[test]
    fn last_period_cannot_be_missing() {
        let available = periods(&[8, 9]);
        let tolerance = ToleranceConfig::default();
        let s = vec![series(
            Some("X"),
            vec![rec("X", "Kim", 8, 2.0), rec("X", "Kim", 9, 2.0)],
        )];
        let checks = SecondaryChecks { available: &available, tolerance: &tolerance, trainers: None };
        assert!(checks.run(&s).is_empty());
    }

    #[test]
    fn idle_member_is_not_missing() {
        let available = periods(&[8, 9]);
        let tolerance = ToleranceConfig::default();
        let s = vec![series(Some("X"), vec![rec("X", "Kim", 8, 0.0)])];
        let checks = SecondaryChecks { available: &available, tolerance: &tolerance, trainers: None };
        assert!(checks.run(&s).is_empty());
    }

    #[test]
    fn drop_and_return() {
        let available = periods(&[7, 8, 9, 10]);
        let tolerance = ToleranceConfig::default();
        let s = vec![series(
            Some("X"),
            vec![
                rec("X", "Kim", 7, 8.0),
                rec("X", "Kim", 8, 3.0),
                rec("X", "Kim", 9, 0.0),
                rec("X", "Kim", 10, 4.0),
            ],
        )];
        let checks = SecondaryChecks { available: &available, tolerance: &tolerance, trainers: None };
        let cases = checks.run(&s);
        assert_eq!(
            categories(&cases),
            vec![
                (Category::SessionDrop, "2025-08".into()),
                (Category::SessionDrop, "2025-09".into()),
                (Category::ReturningMember, "2025-10".into()),
            ]
        );
    }

    #[test]
    fn half_is_not_a_drop() {
        let available = periods(&[8, 9]);
        let tolerance = ToleranceConfig::default();
        let s = vec![series(
            Some("X"),
            vec![rec("X", "Kim", 8, 4.0), rec("X", "Kim", 9, 2.0)],
        )];
        let checks = SecondaryChecks { available: &available, tolerance: &tolerance, trainers: None };
        assert!(checks.run(&s).is_empty());
    }

    #[test]
    fn new_member_counts_as_returning_except_first_period() {
        let available = periods(&[8, 9]);
        let tolerance = ToleranceConfig::default();
        let s = vec![
            series(Some("X"), vec![rec("X", "Kim", 9, 3.0)]),
            series(Some("X"), vec![rec("X", "Lee", 8, 3.0), rec("X", "Lee", 9, 3.0)]),
        ];
        let checks = SecondaryChecks { available: &available, tolerance: &tolerance, trainers: None };
        let cases = checks.run(&s);
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].category, Category::ReturningMember);
        assert_eq!(cases[0].member, "Kim");
        assert!(cases[0].prev.is_none());
    }

    #[test]
    fn member_keyed_series_reports_trainer_change() {
        let available = periods(&[8, 9]);
        let tolerance = ToleranceConfig::default();
        let s = vec![series(None, vec![rec("X", "Kim", 8, 2.0), rec("Y", "Kim", 9, 2.0)])];
        let checks = SecondaryChecks { available: &available, tolerance: &tolerance, trainers: None };
        let cases = checks.run(&s);
        assert_eq!(categories(&cases), vec![(Category::TrainerChanged, "2025-09".into())]);
        assert_eq!(cases[0].trainer, "Y");
    }
}
