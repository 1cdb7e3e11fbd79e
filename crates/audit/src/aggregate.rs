use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::model::{
    AuditCase, AuditSummary, Category, CategoryGroup, LedgerRecord, PeriodSummary, TrainerCounts,
    TrainerGroup,
};
use crate::period::Period;

/// Total order over cases: trainer, severity, magnitude (largest first),
/// member, period, first flag.
pub fn compare_cases(a: &AuditCase, b: &AuditCase) -> Ordering {
    a.trainer
        .cmp(&b.trainer)
        .then_with(|| a.category.severity_rank().cmp(&b.category.severity_rank()))
        .then_with(|| b.magnitude.total_cmp(&a.magnitude))
        .then_with(|| a.member.cmp(&b.member))
        .then_with(|| a.period.cmp(&b.period))
        .then_with(|| a.flags.iter().next().cmp(&b.flags.iter().next()))
}

/// Sort and number cases `C0001`, `C0002`, ... in final order.
pub fn order_cases(cases: &mut [AuditCase]) {
    cases.sort_by(compare_cases);
    for (i, case) in cases.iter_mut().enumerate() {
        case.id = format!("C{:04}", i + 1);
    }
}

/// Counts passed through from the earlier pipeline stages.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunCounts {
    pub records_accepted: usize,
    pub records_rejected: usize,
    pub series: usize,
    pub pairs_compared: usize,
}

pub fn summarize(cases: &[AuditCase], counts: RunCounts) -> AuditSummary {
    let mut category_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut flag_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut trainer_counts: BTreeMap<String, TrainerCounts> = BTreeMap::new();
    let mut invariant_cases = 0;

    for case in cases {
        if case.category.is_invariant() {
            invariant_cases += 1;
        }
        *category_counts.entry(case.category.to_string()).or_insert(0) += 1;
        for flag in &case.flags {
            *flag_counts.entry(flag.to_string()).or_insert(0) += 1;
        }
        let trainer = trainer_counts.entry(case.trainer.clone()).or_default();
        trainer.total += 1;
        *trainer.by_category.entry(case.category.to_string()).or_insert(0) += 1;
    }

    let anomaly_rate_pct = if counts.pairs_compared == 0 {
        0.0
    } else {
        invariant_cases as f64 / counts.pairs_compared as f64 * 100.0
    };

    AuditSummary {
        records_accepted: counts.records_accepted,
        records_rejected: counts.records_rejected,
        series: counts.series,
        pairs_compared: counts.pairs_compared,
        invariant_cases,
        total_cases: cases.len(),
        anomaly_rate_pct,
        category_counts,
        flag_counts,
        trainer_counts,
    }
}

/// Category → trainer → case ids. Categories by severity, trainers by name,
/// ids in case order.
pub fn group_by_category(cases: &[AuditCase]) -> Vec<CategoryGroup> {
    let mut groups: BTreeMap<Category, BTreeMap<&str, Vec<String>>> = BTreeMap::new();
    for case in cases {
        groups
            .entry(case.category)
            .or_default()
            .entry(case.trainer.as_str())
            .or_default()
            .push(case.id.clone());
    }

    groups
        .into_iter()
        .map(|(category, trainers)| {
            let trainers: Vec<TrainerGroup> = trainers
                .into_iter()
                .map(|(trainer, case_ids)| TrainerGroup {
                    trainer: trainer.to_string(),
                    count: case_ids.len(),
                    case_ids,
                })
                .collect();
            CategoryGroup {
                category,
                count: trainers.iter().map(|t| t.count).sum(),
                trainers,
            }
        })
        .collect()
}

/// Members, sessions and fees per (period, trainer).
pub fn period_summaries<'a>(
    records: impl IntoIterator<Item = &'a LedgerRecord>,
) -> Vec<PeriodSummary> {
    let mut totals: BTreeMap<(Period, &str), (BTreeSet<&str>, f64, f64)> = BTreeMap::new();
    for r in records {
        let entry = totals.entry((r.period, r.trainer.as_str())).or_default();
        entry.0.insert(r.member.as_str());
        entry.1 += r.sessions_consumed_this_period;
        entry.2 += r.fee_this_period;
    }

    totals
        .into_iter()
        .map(|((period, trainer), (members, sessions, fees))| PeriodSummary {
            period,
            trainer: trainer.to_string(),
            members: members.len(),
            sessions_consumed: sessions,
            fee_total: fees,
        })
        .collect()
}
