use std::collections::HashSet;

use log::{debug, info};

use crate::aggregate::{group_by_category, order_cases, period_summaries, summarize, RunCounts};
use crate::classify::build_case;
use crate::config::AuditConfig;
use crate::error::AuditError;
use crate::identity::IdentityMatcher;
use crate::ingest::validate_rows;
use crate::invariant::check_series;
use crate::model::{
    AuditCase, AuditInput, AuditMeta, AuditResult, Category, LedgerRecord, ReferenceAvailability,
};
use crate::period::Period;
use crate::resolve::Resolver;
use crate::secondary::SecondaryChecks;
use crate::series::{available_periods, build_series};

/// Run the audit per config. Returns ordered cases, summary, and rejections.
pub fn run(config: &AuditConfig, input: &AuditInput) -> Result<AuditResult, AuditError> {
    AuditEngine::new(config)?.run(input)
}

fn record_key(record: &LedgerRecord) -> (&str, &str, Period) {
    (record.trainer.as_str(), record.member.as_str(), record.period)
}

/// A configured engine. Holds no state between runs.
pub struct AuditEngine<'a> {
    config: &'a AuditConfig,
    matcher: IdentityMatcher,
}

impl<'a> AuditEngine<'a> {
    pub fn new(config: &'a AuditConfig) -> Result<Self, AuditError> {
        config.validate()?;
        let matcher = IdentityMatcher::from_config(&config.identity)?;
        Ok(Self { config, matcher })
    }

    pub fn run(&self, input: &AuditInput) -> Result<AuditResult, AuditError> {
        if input.ledger.is_empty() {
            return Err(AuditError::EmptyLedger);
        }
        let config = self.config;

        // Validate + group
        let validated = validate_rows(&input.ledger);
        let mut rejections = validated.rejected;
        let (series, ambiguous) = build_series(validated.accepted, config.series.key);
        rejections.extend(ambiguous);
        rejections.sort_by_key(|r| r.row);

        let records: Vec<&LedgerRecord> = series.iter().flat_map(|s| s.records.iter()).collect();
        let available = available_periods(&series);

        // Balance invariant
        let outcome = check_series(&series, config.tolerance.epsilon);
        let resolver = Resolver::new(&input.references, &self.matcher, &config.tolerance);

        let mut cases: Vec<AuditCase> = Vec::new();
        // (trainer, member, period) is unique among accepted records; `row`
        // is caller-supplied and may repeat.
        let mut checked: HashSet<(&str, &str, Period)> = HashSet::new();
        for candidate in &outcome.candidates {
            let mut case = build_case(candidate, &config.watch);
            resolver.explain_with_purchases(&mut case);
            resolver.check_record(candidate.curr).apply_to(&mut case);
            checked.insert(record_key(candidate.curr));
            cases.push(case);
        }

        // Record-level findings outside invariant cases
        for record in &records {
            if checked.contains(&record_key(record)) || record.sessions_consumed_this_period <= 0.0 {
                continue;
            }
            let findings = resolver.check_record(record);
            if findings.flags.is_empty() {
                continue;
            }
            let mut case = AuditCase::single(Category::RecordFinding, record, false);
            findings.apply_to(&mut case);
            debug!(
                "{} / {} {}: record finding {:?}",
                case.trainer, case.member, case.period, case.flags
            );
            cases.push(case);
        }

        // Secondary checks
        let secondary = SecondaryChecks {
            available: &available,
            tolerance: &config.tolerance,
            trainers: input.references.trainers.as_ref(),
        };
        cases.extend(secondary.run(&series));

        order_cases(&mut cases);

        let summary = summarize(
            &cases,
            RunCounts {
                records_accepted: records.len(),
                records_rejected: rejections.len(),
                series: series.len(),
                pairs_compared: outcome.pairs_compared,
            },
        );
        info!(
            "audit '{}': {} records ({} rejected), {} pairs, {} invariant cases, {} total cases",
            config.name,
            summary.records_accepted,
            summary.records_rejected,
            summary.pairs_compared,
            summary.invariant_cases,
            summary.total_cases
        );

        let by_category = group_by_category(&cases);
        let period_summaries = period_summaries(records.iter().copied());

        let references = &input.references;
        Ok(AuditResult {
            meta: AuditMeta {
                config_name: config.name.clone(),
                engine_version: env!("CARGO_PKG_VERSION").to_string(),
                run_at: chrono::Utc::now().to_rfc3339(),
                series_key: config.series.key,
                watch_periods: config.watch.periods.clone(),
                references: ReferenceAvailability {
                    purchases: references.purchases.is_some(),
                    directory: references.directory.is_some(),
                    trainers: references.trainers.is_some(),
                },
            },
            summary,
            cases,
            by_category,
            period_summaries,
            rejections,
        })
    }
}
