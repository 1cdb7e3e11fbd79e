// Property-based tests for the balance invariant and run determinism.
// CI: 256 cases (default). Soak: PROPTEST_CASES=10000 cargo test --release

use proptest::prelude::*;
use ptledger_audit::aggregate::compare_cases;
use ptledger_audit::config::AuditConfig;
use ptledger_audit::engine::run;
use ptledger_audit::model::{AuditInput, Category, RawLedgerRow, ReferenceData};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn config_256() -> ProptestConfig {
    ProptestConfig {
        cases: std::env::var("PROPTEST_CASES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(256),
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

fn raw(row: usize, trainer: &str, member: &str, month: u32, vals: (f64, f64, f64)) -> RawLedgerRow {
    let (registered, consumed, remaining) = vals;
    RawLedgerRow {
        row,
        trainer: Some(trainer.to_string()),
        member: Some(member.to_string()),
        year: Some("2025".to_string()),
        month: Some(format!("{month}월")),
        registered_sessions: Some(registered.to_string()),
        remaining_sessions: Some(remaining.to_string()),
        sessions_consumed_this_period: Some(consumed.to_string()),
        ..RawLedgerRow::default()
    }
}

/// One member's history where every month follows the invariant exactly:
/// starting balance, then per-month consumption (months may be skipped).
fn arb_consistent_history() -> impl Strategy<Value = (f64, Vec<(u32, f64)>)> {
    (
        20u32..60,
        proptest::collection::btree_map(1u32..=12, 0u32..=4, 2..8),
    )
        .prop_map(|(start, months)| {
            let months = months.into_iter().map(|(m, c)| (m, f64::from(c))).collect();
            (f64::from(start), months)
        })
}

fn history_rows(start: f64, months: &[(u32, f64)]) -> Vec<RawLedgerRow> {
    let mut remaining = start;
    months
        .iter()
        .enumerate()
        .map(|(i, (month, consumed))| {
            remaining -= consumed;
            raw(i + 1, "Choi", "Kim", *month, (60.0, *consumed, remaining))
        })
        .collect()
}

/// Arbitrary multi-trainer ledger, including duplicates and junk values.
fn arb_ledger() -> impl Strategy<Value = Vec<RawLedgerRow>> {
    let row = (
        prop_oneof![Just("Choi"), Just("Park"), Just("Han")],
        prop_oneof![Just("Kim"), Just("Lee"), Just("Ahn"), Just("")],
        1u32..=12,
        prop_oneof![
            4 => (0u32..40).prop_map(|n| n.to_string()),
            1 => Just(String::new()),
            1 => Just("n/a".to_string()),
        ],
        0u32..6,
        0u32..40,
    );
    proptest::collection::vec(row, 1..40).prop_map(|rows| {
        rows.into_iter()
            .enumerate()
            .map(|(i, (trainer, member, month, registered, consumed, remaining))| RawLedgerRow {
                row: i + 1,
                trainer: Some(trainer.to_string()),
                member: Some(member.to_string()),
                year: Some("2025".to_string()),
                month: Some(month.to_string()),
                registered_sessions: Some(registered),
                remaining_sessions: Some(remaining.to_string()),
                sessions_consumed_this_period: Some(consumed.to_string()),
                ..RawLedgerRow::default()
            })
            .collect()
    })
}

fn input(ledger: Vec<RawLedgerRow>) -> AuditInput {
    AuditInput { ledger, references: ReferenceData::default() }
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(config_256())]

    #[test]
    fn consistent_history_yields_no_invariant_case((start, months) in arb_consistent_history()) {
        let result = run(&AuditConfig::default(), &input(history_rows(start, &months))).unwrap();
        prop_assert_eq!(result.summary.pairs_compared, months.len() - 1);
        prop_assert_eq!(result.summary.invariant_cases, 0);
    }

    #[test]
    fn one_broken_balance_yields_exactly_one_case(
        (start, months) in arb_consistent_history(),
        shift in prop_oneof![-9.0..-0.2f64, 0.2..9.0f64],
    ) {
        let mut rows = history_rows(start, &months);
        let last = rows.last_mut().unwrap();
        let remaining: f64 = last.remaining_sessions.as_deref().unwrap().parse().unwrap();
        last.remaining_sessions = Some((remaining + shift).to_string());

        let result = run(&AuditConfig::default(), &input(rows)).unwrap();
        prop_assert_eq!(result.summary.invariant_cases, 1);
        let case = result.cases.iter().find(|c| c.category.is_invariant()).unwrap();
        prop_assert!((case.diff.unwrap() - shift).abs() < 1e-6);
        // An increase needs the balance to end at or above last month's.
        let last_consumed = months.last().unwrap().1;
        let expected = if shift > 0.0 && shift >= last_consumed {
            Category::UnexplainedIncrease
        } else {
            Category::CalculationMismatch
        };
        prop_assert_eq!(case.category, expected);
    }

    #[test]
    fn runs_are_deterministic(ledger in arb_ledger()) {
        let config = AuditConfig::default();
        let inp = input(ledger);
        let a = run(&config, &inp).unwrap();
        let b = run(&config, &inp).unwrap();
        prop_assert_eq!(&a.cases, &b.cases);
        prop_assert_eq!(&a.rejections, &b.rejections);
        prop_assert_eq!(a.period_summaries, b.period_summaries);
    }

    #[test]
    fn every_row_is_accepted_or_rejected(ledger in arb_ledger()) {
        let total = ledger.len();
        let result = run(&AuditConfig::default(), &input(ledger)).unwrap();
        prop_assert_eq!(result.summary.records_accepted + result.summary.records_rejected, total);
    }

    #[test]
    fn cases_are_ordered_and_numbered(ledger in arb_ledger()) {
        let result = run(&AuditConfig::default(), &input(ledger)).unwrap();
        for pair in result.cases.windows(2) {
            prop_assert!(compare_cases(&pair[0], &pair[1]).is_le());
        }
        for (i, case) in result.cases.iter().enumerate() {
            prop_assert_eq!(&case.id, &format!("C{:04}", i + 1));
        }
        let grouped: usize = result.by_category.iter().map(|g| g.count).sum();
        prop_assert_eq!(grouped, result.cases.len());
    }

    #[test]
    fn replenishment_registration_covers_increase(ledger in arb_ledger()) {
        let result = run(&AuditConfig::default(), &input(ledger)).unwrap();
        for case in result.cases.iter().filter(|c| c.category == Category::NormalReplenishment) {
            let prev = case.prev.as_ref().unwrap();
            let curr = case.curr.as_ref().unwrap();
            let diff = case.diff.unwrap();
            prop_assert!(diff > 0.0);
            prop_assert!(curr.registered_sessions - prev.registered_sessions >= diff - 1e-9);
        }
    }
}
