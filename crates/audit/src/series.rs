use std::collections::{BTreeMap, BTreeSet};

use log::warn;

use crate::config::SeriesKey;
use crate::model::{LedgerRecord, RejectReason, Rejection};
use crate::period::Period;

/// Ordered monthly snapshots for one series key.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    /// Trainer of record; `None` when series are keyed by member alone.
    pub trainer: Option<String>,
    pub member: String,
    /// Sorted ascending by period, at most one record per period.
    pub records: Vec<LedgerRecord>,
}

impl Series {
    pub fn get(&self, period: Period) -> Option<&LedgerRecord> {
        self.records
            .binary_search_by(|r| r.period.cmp(&period))
            .ok()
            .map(|i| &self.records[i])
    }

    /// Pairs of records adjacent in the available data (gaps are not filled).
    pub fn adjacent_pairs(&self) -> impl Iterator<Item = (&LedgerRecord, &LedgerRecord)> {
        self.records.windows(2).map(|w| (&w[0], &w[1]))
    }
}

/// Group validated records into series. Iteration order of the result is
/// the byte order of the series key.
///
/// With [`SeriesKey::Member`] a member can only have one record per period;
/// later records for an already-occupied period are rejected as ambiguous.
pub fn build_series(records: Vec<LedgerRecord>, key: SeriesKey) -> (Vec<Series>, Vec<Rejection>) {
    match key {
        SeriesKey::TrainerMember => (by_trainer_member(records), Vec::new()),
        SeriesKey::Member => by_member(records),
    }
}

fn by_trainer_member(records: Vec<LedgerRecord>) -> Vec<Series> {
    let mut groups: BTreeMap<(String, String), Vec<LedgerRecord>> = BTreeMap::new();
    for record in records {
        groups
            .entry((record.trainer.clone(), record.member.clone()))
            .or_default()
            .push(record);
    }

    groups
        .into_iter()
        .map(|((trainer, member), mut records)| {
            records.sort_by_key(|r| r.period);
            Series { trainer: Some(trainer), member, records }
        })
        .collect()
}

fn by_member(records: Vec<LedgerRecord>) -> (Vec<Series>, Vec<Rejection>) {
    let mut groups: BTreeMap<String, BTreeMap<Period, LedgerRecord>> = BTreeMap::new();
    let mut rejected = Vec::new();

    for record in records {
        let periods = groups.entry(record.member.clone()).or_default();
        if let Some(existing) = periods.get(&record.period) {
            warn!(
                "skipping ledger row {}: {} already has a {} record under {} (row {})",
                record.row, record.member, record.period, existing.trainer, existing.row
            );
            rejected.push(Rejection {
                row: record.row,
                trainer: Some(record.trainer),
                member: Some(record.member),
                reason: RejectReason::AmbiguousPeriod { period: record.period },
            });
            continue;
        }
        periods.insert(record.period, record);
    }

    let series = groups
        .into_iter()
        .map(|(member, periods)| Series {
            trainer: None,
            member,
            records: periods.into_values().collect(),
        })
        .collect();

    (series, rejected)
}

/// Distinct periods present in any series, ascending.
pub fn available_periods(series: &[Series]) -> Vec<Period> {
    series
        .iter()
        .flat_map(|s| s.records.iter().map(|r| r.period))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(row: usize, trainer: &str, member: &str, year: i32, month: u32) -> LedgerRecord {
        LedgerRecord {
            row,
            trainer: trainer.into(),
            member: member.into(),
            period: Period::new(year, month).unwrap(),
            registered_sessions: 10.0,
            total_consumed_sessions: 0.0,
            remaining_sessions: 10.0,
            sessions_consumed_this_period: 0.0,
            fee_this_period: 0.0,
            unit_price: None,
            revenue_share: None,
        }
    }

    #[test]
    fn trainer_member_keying_splits_reassignment() {
        let records = vec![
            rec(1, "Park", "Kim", 2025, 9),
            rec(2, "Choi", "Kim", 2025, 8),
            rec(3, "Choi", "Lee", 2025, 9),
            rec(4, "Choi", "Lee", 2025, 8),
        ];
        let (series, rejected) = build_series(records, SeriesKey::TrainerMember);
        assert!(rejected.is_empty());
        let keys: Vec<_> = series
            .iter()
            .map(|s| (s.trainer.clone().unwrap(), s.member.clone(), s.records.len()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("Choi".into(), "Kim".into(), 1),
                ("Choi".into(), "Lee".into(), 2),
                ("Park".into(), "Kim".into(), 1),
            ]
        );
        let lee = &series[1];
        assert_eq!(lee.records[0].row, 4, "records sorted by period");
        assert_eq!(lee.adjacent_pairs().count(), 1);
    }

    #[test]
    fn member_keying_joins_reassignment() {
        let records = vec![
            rec(1, "Choi", "Kim", 2025, 8),
            rec(2, "Park", "Kim", 2025, 9),
            rec(3, "Han", "Kim", 2025, 9),
        ];
        let (series, rejected) = build_series(records, SeriesKey::Member);
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].trainer, None);
        assert_eq!(series[0].records.len(), 2);
        assert_eq!(series[0].records[1].trainer, "Park");

        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].row, 3);
        assert!(matches!(rejected[0].reason, RejectReason::AmbiguousPeriod { .. }));
    }

    #[test]
    fn gaps_are_not_synthesized() {
        let records = vec![rec(1, "Choi", "Kim", 2025, 7), rec(2, "Choi", "Kim", 2025, 10)];
        let (series, _) = build_series(records, SeriesKey::TrainerMember);
        let s = &series[0];
        assert_eq!(s.records.len(), 2);
        assert!(s.get(Period::new(2025, 8).unwrap()).is_none());
        assert!(s.get(Period::new(2025, 10).unwrap()).is_some());
        let (a, b) = s.adjacent_pairs().next().unwrap();
        assert_eq!((a.period.month(), b.period.month()), (7, 10));
    }

    #[test]
    fn available_periods_are_global() {
        let records = vec![
            rec(1, "Choi", "Kim", 2025, 9),
            rec(2, "Park", "Lee", 2024, 12),
            rec(3, "Choi", "Kim", 2025, 1),
        ];
        let (series, _) = build_series(records, SeriesKey::TrainerMember);
        let labels: Vec<_> = available_periods(&series).iter().map(|p| p.to_string()).collect();
        assert_eq!(labels, vec!["2024-12", "2025-01", "2025-09"]);
    }
}
