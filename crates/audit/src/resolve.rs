//! Cross-referencing cases and records against independent sources.
//!
//! Purchases may explain a balance increase (and demote the case one tier).
//! The member directory corroborates or escalates individual records. Payroll
//! and balance-sign checks need nothing but the record itself.

use std::collections::{BTreeSet, HashMap};

use log::debug;

use crate::config::ToleranceConfig;
use crate::identity::IdentityMatcher;
use crate::invariant::FLOAT_SLACK;
use crate::model::{
    AuditCase, Evidence, EvidenceSource, Flag, LedgerRecord, MemberDirectoryEntry, PurchaseEvent,
    ReferenceData,
};

/// Flags and evidence found for one ledger record.
#[derive(Debug, Clone, Default)]
pub struct RecordFindings {
    pub flags: BTreeSet<Flag>,
    pub directory: Option<MemberDirectoryEntry>,
    pub evidence: Vec<Evidence>,
}

impl RecordFindings {
    fn flag(&mut self, flag: Flag, source: EvidenceSource, note: String) {
        self.flags.insert(flag);
        self.evidence.push(Evidence::new(source, note));
    }

    /// Merge into a case that already exists for this record.
    pub fn apply_to(self, case: &mut AuditCase) {
        case.flags.extend(self.flags);
        if case.directory.is_none() {
            case.directory = self.directory;
        }
        case.evidence.extend(self.evidence);
    }
}

pub struct Resolver<'a> {
    matcher: &'a IdentityMatcher,
    tolerance: &'a ToleranceConfig,
    purchases: Option<HashMap<String, Vec<&'a PurchaseEvent>>>,
    directory: Option<HashMap<String, &'a MemberDirectoryEntry>>,
}

impl<'a> Resolver<'a> {
    /// Index the reference sources by canonical member key. Absent sources
    /// stay absent so their checks are skipped rather than failing.
    pub fn new(
        references: &'a ReferenceData,
        matcher: &'a IdentityMatcher,
        tolerance: &'a ToleranceConfig,
    ) -> Self {
        let purchases = references.purchases.as_ref().map(|events| {
            let mut by_member: HashMap<String, Vec<&PurchaseEvent>> = HashMap::new();
            for event in events {
                by_member.entry(matcher.key(&event.member)).or_default().push(event);
            }
            by_member
        });

        let directory = references.directory.as_ref().map(|entries| {
            let mut by_member: HashMap<String, &MemberDirectoryEntry> = HashMap::new();
            for entry in entries {
                let key = matcher.key(&entry.member);
                if by_member.contains_key(&key) {
                    debug!("directory: duplicate entry for {}, keeping the first", entry.member);
                    continue;
                }
                by_member.insert(key, entry);
            }
            by_member
        });

        Self { matcher, tolerance, purchases, directory }
    }

    /// Purchases for `member` starting inside the record's period window,
    /// ordered by start time.
    pub fn purchases_in_period(&self, record: &LedgerRecord) -> Vec<PurchaseEvent> {
        let Some(ref purchases) = self.purchases else {
            return Vec::new();
        };
        let mut matched: Vec<PurchaseEvent> = purchases
            .get(&self.matcher.key(&record.member))
            .into_iter()
            .flatten()
            .filter(|p| record.period.contains(p.started_at))
            .map(|p| (*p).clone())
            .collect();
        matched.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        matched
    }

    /// Try to explain an invariant case with purchases in the current period.
    /// Explained SUSPECTED_ABUSE / UNEXPLAINED_INCREASE drop one tier.
    pub fn explain_with_purchases(&self, case: &mut AuditCase) {
        if self.purchases.is_none() {
            return;
        }
        let (Some(prev), Some(curr), Some(diff)) = (&case.prev, &case.curr, case.diff) else {
            return;
        };

        let requirement =
            diff.max(curr.sessions_consumed_this_period - prev.remaining_sessions);
        let matched = self.purchases_in_period(curr);
        if matched.is_empty() {
            return;
        }
        let purchased: f64 = matched.iter().map(|p| p.session_count).sum();

        let note;
        if requirement > 0.0 && purchased > 0.0 && purchased >= requirement - FLOAT_SLACK {
            case.flags.insert(Flag::ExplainedByPurchase);
            if let Some(demoted) = case.category.demoted() {
                note = format!(
                    "{} purchased sessions cover {requirement}; {} -> {demoted}",
                    purchased, case.category
                );
                case.category = demoted;
            } else {
                note = format!("{purchased} purchased sessions cover {requirement}");
            }
        } else {
            note = format!("{purchased} purchased sessions do not cover {requirement}");
        }
        case.add_evidence(EvidenceSource::Purchase, note);
        case.purchases = matched;
    }

    /// Record-level checks that hold regardless of the invariant result.
    pub fn check_record(&self, record: &LedgerRecord) -> RecordFindings {
        let mut findings = RecordFindings::default();
        let consumed = record.sessions_consumed_this_period;

        if consumed > 0.0 && record.remaining_sessions < 0.0 {
            findings.flag(
                Flag::OverdrawnBalance,
                EvidenceSource::Invariant,
                format!(
                    "consumed {consumed} leaving a negative balance of {}",
                    record.remaining_sessions
                ),
            );
        }

        self.check_payroll(record, &mut findings);
        self.check_directory(record, &mut findings);
        findings
    }

    fn check_payroll(&self, record: &LedgerRecord, findings: &mut RecordFindings) {
        let (Some(unit_price), Some(share)) = (record.unit_price, record.revenue_share) else {
            return;
        };
        let consumed = record.sessions_consumed_this_period;
        if unit_price <= 0.0 || consumed <= 0.0 {
            return;
        }
        let expected = consumed * unit_price * share;
        if expected <= 0.0 {
            return;
        }
        let deviation = (expected - record.fee_this_period).abs() / expected;
        if deviation > self.tolerance.fee_ratio + FLOAT_SLACK {
            findings.flag(
                Flag::PayrollMismatch,
                EvidenceSource::Payroll,
                format!(
                    "fee {} vs expected {expected} ({consumed} x {unit_price} x {share}), off by {:.1}%",
                    record.fee_this_period,
                    deviation * 100.0
                ),
            );
        }
    }

    fn check_directory(&self, record: &LedgerRecord, findings: &mut RecordFindings) {
        let Some(ref directory) = self.directory else {
            return;
        };
        let Some(entry) = directory.get(&self.matcher.key(&record.member)) else {
            findings.flag(
                Flag::MemberNotFound,
                EvidenceSource::Directory,
                format!("{} not in member directory", record.member),
            );
            return;
        };
        findings.directory = Some((*entry).clone());

        if let Some(expiry) = entry.expiry_date {
            let period_end = record.period.last_day();
            if record.sessions_consumed_this_period > 0.0 && expiry < period_end {
                findings.flag(
                    Flag::ExpiredMembershipUsage,
                    EvidenceSource::Directory,
                    format!(
                        "membership expired {expiry}, {} sessions used in {}",
                        record.sessions_consumed_this_period, record.period
                    ),
                );
            }
        }

        if let Some(ref assigned) = entry.trainer {
            let assigned = assigned.trim();
            if !assigned.is_empty() && assigned != "-" && assigned != record.trainer.trim() {
                findings.flag(
                    Flag::TrainerMismatch,
                    EvidenceSource::Directory,
                    format!("directory assigns {assigned}, ledger has {}", record.trainer),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Category;
    use crate::period::Period;
    use chrono::NaiveDate;

    fn rec(month: u32, registered: f64, consumed: f64, remaining: f64) -> LedgerRecord {
        LedgerRecord {
            row: month as usize,
            trainer: "Choi".into(),
            member: "Kim".into(),
            period: Period::new(2025, month).unwrap(),
            registered_sessions: registered,
            total_consumed_sessions: 0.0,
            remaining_sessions: remaining,
            sessions_consumed_this_period: consumed,
            fee_this_period: 0.0,
            unit_price: None,
            revenue_share: None,
        }
    }

    fn purchase(member: &str, count: f64, date: &str) -> PurchaseEvent {
        PurchaseEvent {
            member: member.into(),
            package_type: "PT".into(),
            session_count: count,
            started_at: NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
        }
    }

    fn dir(member: &str, expiry: Option<&str>, trainer: Option<&str>) -> MemberDirectoryEntry {
        MemberDirectoryEntry {
            member: member.into(),
            status: "active".into(),
            expiry_date: expiry.map(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").unwrap()),
            trainer: trainer.map(String::from),
        }
    }

    fn invariant_case(category: Category, prev: LedgerRecord, curr: LedgerRecord) -> AuditCase {
        let diff = curr.remaining_sessions
            - (prev.remaining_sessions - curr.sessions_consumed_this_period);
        let mut case = AuditCase::single(category, &curr, false);
        case.prev = Some(prev);
        case.diff = Some(diff);
        case
    }

    #[test]
    fn purchase_in_window_demotes_one_tier() {
        let refs = ReferenceData {
            purchases: Some(vec![
                purchase("Kim", 10.0, "2025-09-15"),
                purchase("Kim", 10.0, "2025-10-01"),
                purchase("Lee", 10.0, "2025-09-15"),
            ]),
            ..ReferenceData::default()
        };
        let matcher = IdentityMatcher::exact();
        let tolerance = ToleranceConfig::default();
        let resolver = Resolver::new(&refs, &matcher, &tolerance);

        let mut case = invariant_case(
            Category::UnexplainedIncrease,
            rec(8, 10.0, 0.0, 5.0),
            rec(9, 10.0, 3.0, 12.0),
        );
        resolver.explain_with_purchases(&mut case);
        assert_eq!(case.category, Category::CalculationMismatch);
        assert!(case.flags.contains(&Flag::ExplainedByPurchase));
        assert_eq!(case.purchases.len(), 1, "October purchase is outside September");
    }

    #[test]
    fn insufficient_purchase_keeps_category() {
        let refs = ReferenceData {
            purchases: Some(vec![purchase("Kim", 2.0, "2025-09-15")]),
            ..ReferenceData::default()
        };
        let matcher = IdentityMatcher::exact();
        let tolerance = ToleranceConfig::default();
        let resolver = Resolver::new(&refs, &matcher, &tolerance);

        let mut case = invariant_case(
            Category::SuspectedAbuse,
            rec(9, 10.0, 0.0, 1.0),
            rec(10, 10.0, 4.0, 3.0),
        );
        resolver.explain_with_purchases(&mut case);
        assert_eq!(case.category, Category::SuspectedAbuse);
        assert!(case.flags.is_empty());
        assert_eq!(case.purchases.len(), 1);
    }

    #[test]
    fn abuse_covered_by_purchase_becomes_unexplained_increase() {
        let refs = ReferenceData {
            purchases: Some(vec![purchase("Kim", 10.0, "2025-10-02")]),
            ..ReferenceData::default()
        };
        let matcher = IdentityMatcher::exact();
        let tolerance = ToleranceConfig::default();
        let resolver = Resolver::new(&refs, &matcher, &tolerance);

        let mut case = invariant_case(
            Category::SuspectedAbuse,
            rec(9, 10.0, 0.0, 1.0),
            rec(10, 10.0, 4.0, 7.0),
        );
        resolver.explain_with_purchases(&mut case);
        assert_eq!(case.category, Category::UnexplainedIncrease);
    }

    #[test]
    fn expired_membership_needs_usage() {
        let refs = ReferenceData {
            directory: Some(vec![dir("Kim", Some("2025-09-15"), Some("Choi"))]),
            ..ReferenceData::default()
        };
        let matcher = IdentityMatcher::exact();
        let tolerance = ToleranceConfig::default();
        let resolver = Resolver::new(&refs, &matcher, &tolerance);

        let used = resolver.check_record(&rec(9, 10.0, 2.0, 3.0));
        assert_eq!(used.flags, BTreeSet::from([Flag::ExpiredMembershipUsage]));
        assert!(used.directory.is_some());

        let idle = resolver.check_record(&rec(9, 10.0, 0.0, 3.0));
        assert!(idle.flags.is_empty());
    }

    #[test]
    fn expiry_on_last_day_is_not_expired() {
        let refs = ReferenceData {
            directory: Some(vec![dir("Kim", Some("2025-09-30"), None)]),
            ..ReferenceData::default()
        };
        let matcher = IdentityMatcher::exact();
        let tolerance = ToleranceConfig::default();
        let resolver = Resolver::new(&refs, &matcher, &tolerance);
        assert!(resolver.check_record(&rec(9, 10.0, 2.0, 3.0)).flags.is_empty());
    }

    #[test]
    fn trainer_mismatch_ignores_placeholder() {
        let refs = ReferenceData {
            directory: Some(vec![dir("Kim", None, Some("Park")), dir("Lee", None, Some("-"))]),
            ..ReferenceData::default()
        };
        let matcher = IdentityMatcher::exact();
        let tolerance = ToleranceConfig::default();
        let resolver = Resolver::new(&refs, &matcher, &tolerance);

        let kim = resolver.check_record(&rec(9, 10.0, 1.0, 3.0));
        assert_eq!(kim.flags, BTreeSet::from([Flag::TrainerMismatch]));

        let mut lee = rec(9, 10.0, 1.0, 3.0);
        lee.member = "Lee".into();
        assert!(resolver.check_record(&lee).flags.is_empty());
    }

    #[test]
    fn unknown_member_only_when_directory_supplied() {
        let matcher = IdentityMatcher::exact();
        let tolerance = ToleranceConfig::default();

        let without = ReferenceData::default();
        let resolver = Resolver::new(&without, &matcher, &tolerance);
        assert!(resolver.check_record(&rec(9, 10.0, 1.0, 3.0)).flags.is_empty());

        let with = ReferenceData { directory: Some(Vec::new()), ..ReferenceData::default() };
        let resolver = Resolver::new(&with, &matcher, &tolerance);
        let findings = resolver.check_record(&rec(9, 10.0, 1.0, 3.0));
        assert_eq!(findings.flags, BTreeSet::from([Flag::MemberNotFound]));
        assert!(findings.directory.is_none());
    }

    #[test]
    fn overdrawn_and_payroll_flags() {
        let matcher = IdentityMatcher::exact();
        let tolerance = ToleranceConfig::default();
        let refs = ReferenceData::default();
        let resolver = Resolver::new(&refs, &matcher, &tolerance);

        let mut r = rec(9, 10.0, 4.0, -1.0);
        r.unit_price = Some(50_000.0);
        r.revenue_share = Some(0.5);
        r.fee_this_period = 100_000.0;
        // expected 4 * 50000 * 0.5 = 100000: payroll fine, balance overdrawn
        let findings = resolver.check_record(&r);
        assert_eq!(findings.flags, BTreeSet::from([Flag::OverdrawnBalance]));

        r.remaining_sessions = 1.0;
        r.fee_this_period = 80_000.0;
        let findings = resolver.check_record(&r);
        assert_eq!(findings.flags, BTreeSet::from([Flag::PayrollMismatch]));

        r.fee_this_period = 91_000.0;
        assert!(resolver.check_record(&r).flags.is_empty(), "within 10%");
    }

    #[test]
    fn normalized_identity_links_sources() {
        use crate::config::{IdentityConfig, IdentityStrategy, NameRule};

        let config = IdentityConfig {
            strategy: IdentityStrategy::Normalized,
            rules: vec![NameRule { pattern: "E$".into(), replacement: String::new(), enabled: true }],
            mappings: Default::default(),
        };
        let matcher = IdentityMatcher::from_config(&config).unwrap();
        let tolerance = ToleranceConfig::default();
        let refs = ReferenceData {
            directory: Some(vec![dir("Kim", None, None)]),
            ..ReferenceData::default()
        };
        let resolver = Resolver::new(&refs, &matcher, &tolerance);

        let mut r = rec(9, 10.0, 1.0, 3.0);
        r.member = "KimE".into();
        assert!(resolver.check_record(&r).flags.is_empty());
    }
}
