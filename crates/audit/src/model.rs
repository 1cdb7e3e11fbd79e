use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::config::SeriesKey;
use crate::period::Period;

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// One ledger row as delivered by the salary/session ETL, before validation.
///
/// Every field is optional text: the validator decides what is missing,
/// what defaults to zero, and what gets rejected.
#[derive(Debug, Clone, Default)]
pub struct RawLedgerRow {
    /// 1-based data row number in the source (header excluded).
    pub row: usize,
    pub trainer: Option<String>,
    pub member: Option<String>,
    pub year: Option<String>,
    pub month: Option<String>,
    pub registered_sessions: Option<String>,
    pub total_consumed_sessions: Option<String>,
    pub remaining_sessions: Option<String>,
    pub sessions_consumed_this_period: Option<String>,
    pub fee_this_period: Option<String>,
    pub unit_price: Option<String>,
    pub revenue_share: Option<String>,
}

/// A validated, immutable monthly snapshot for one (trainer, member) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerRecord {
    pub row: usize,
    pub trainer: String,
    pub member: String,
    pub period: Period,
    pub registered_sessions: f64,
    pub total_consumed_sessions: f64,
    pub remaining_sessions: f64,
    pub sessions_consumed_this_period: f64,
    pub fee_this_period: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revenue_share: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PurchaseEvent {
    pub member: String,
    pub package_type: String,
    pub session_count: f64,
    pub started_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberDirectoryEntry {
    pub member: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trainer: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainerStatus {
    Active,
    Terminated,
}

/// Independent reference sources. `None` means the source was not supplied
/// for this run, which is different from "supplied but empty".
#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    pub purchases: Option<Vec<PurchaseEvent>>,
    pub directory: Option<Vec<MemberDirectoryEntry>>,
    pub trainers: Option<HashMap<String, TrainerStatus>>,
}

pub struct AuditInput {
    pub ledger: Vec<RawLedgerRow>,
    pub references: ReferenceData,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    MissingTrainer,
    MissingMember,
    MissingPeriod,
    UnparseablePeriod { label: String },
    InvalidNumber { field: String, value: String },
    DuplicateRecord { period: Period },
    AmbiguousPeriod { period: Period },
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingTrainer => write!(f, "missing trainer"),
            Self::MissingMember => write!(f, "missing member"),
            Self::MissingPeriod => write!(f, "missing period"),
            Self::UnparseablePeriod { label } => write!(f, "unparseable period '{label}'"),
            Self::InvalidNumber { field, value } => {
                write!(f, "field '{field}' is not a number: '{value}'")
            }
            Self::DuplicateRecord { period } => {
                write!(f, "duplicate record for period {period}")
            }
            Self::AmbiguousPeriod { period } => {
                write!(f, "member has records under several trainers in {period}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub row: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trainer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member: Option<String>,
    pub reason: RejectReason,
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    SuspectedAbuse,
    UnexplainedIncrease,
    CalculationMismatch,
    MissingMember,
    RecordFinding,
    NormalReplenishment,
    TrainerChanged,
    SessionDrop,
    ReturningMember,
}

impl Category {
    /// 0 = most severe. Declaration order is the ranking.
    pub fn severity_rank(self) -> u8 {
        self as u8
    }

    /// Categories produced by the balance invariant (as opposed to
    /// secondary checks or record-level findings).
    pub fn is_invariant(self) -> bool {
        matches!(
            self,
            Self::SuspectedAbuse
                | Self::UnexplainedIncrease
                | Self::CalculationMismatch
                | Self::NormalReplenishment
        )
    }

    /// One severity tier down, for categories a purchase can explain.
    pub fn demoted(self) -> Option<Category> {
        match self {
            Self::SuspectedAbuse => Some(Self::UnexplainedIncrease),
            Self::UnexplainedIncrease => Some(Self::CalculationMismatch),
            _ => None,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SuspectedAbuse => write!(f, "SUSPECTED_ABUSE"),
            Self::UnexplainedIncrease => write!(f, "UNEXPLAINED_INCREASE"),
            Self::CalculationMismatch => write!(f, "CALCULATION_MISMATCH"),
            Self::MissingMember => write!(f, "MISSING_MEMBER"),
            Self::RecordFinding => write!(f, "RECORD_FINDING"),
            Self::NormalReplenishment => write!(f, "NORMAL_REPLENISHMENT"),
            Self::TrainerChanged => write!(f, "TRAINER_CHANGED"),
            Self::SessionDrop => write!(f, "SESSION_DROP"),
            Self::ReturningMember => write!(f, "RETURNING_MEMBER"),
        }
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "SUSPECTED_ABUSE" => Ok(Self::SuspectedAbuse),
            "UNEXPLAINED_INCREASE" => Ok(Self::UnexplainedIncrease),
            "CALCULATION_MISMATCH" => Ok(Self::CalculationMismatch),
            "MISSING_MEMBER" => Ok(Self::MissingMember),
            "RECORD_FINDING" => Ok(Self::RecordFinding),
            "NORMAL_REPLENISHMENT" => Ok(Self::NormalReplenishment),
            "TRAINER_CHANGED" => Ok(Self::TrainerChanged),
            "SESSION_DROP" => Ok(Self::SessionDrop),
            "RETURNING_MEMBER" => Ok(Self::ReturningMember),
            other => Err(format!("unknown category: {other}")),
        }
    }
}

/// Independent findings attached to a case by cross-referencing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Flag {
    ExplainedByPurchase,
    MemberNotFound,
    ExpiredMembershipUsage,
    TrainerMismatch,
    OverdrawnBalance,
    PayrollMismatch,
}

impl std::fmt::Display for Flag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExplainedByPurchase => write!(f, "EXPLAINED_BY_PURCHASE"),
            Self::MemberNotFound => write!(f, "MEMBER_NOT_FOUND"),
            Self::ExpiredMembershipUsage => write!(f, "EXPIRED_MEMBERSHIP_USAGE"),
            Self::TrainerMismatch => write!(f, "TRAINER_MISMATCH"),
            Self::OverdrawnBalance => write!(f, "OVERDRAWN_BALANCE"),
            Self::PayrollMismatch => write!(f, "PAYROLL_MISMATCH"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    Invariant,
    Classifier,
    Purchase,
    Directory,
    TrainerStatus,
    Payroll,
    Series,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evidence {
    pub source: EvidenceSource,
    pub note: String,
}

impl Evidence {
    pub fn new(source: EvidenceSource, note: impl Into<String>) -> Self {
        Self { source, note: note.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditCase {
    /// Assigned after final ordering (`C0001`, `C0002`, ...).
    pub id: String,
    pub category: Category,
    pub trainer: String,
    pub member: String,
    /// Period the finding is about: `curr`'s period, or `prev`'s when there
    /// is no current snapshot.
    pub period: Period,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev: Option<LedgerRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub curr: Option<LedgerRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_remaining: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_remaining: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<f64>,
    pub magnitude: f64,
    pub flags: BTreeSet<Flag>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub purchases: Vec<PurchaseEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<MemberDirectoryEntry>,
    pub evidence: Vec<Evidence>,
}

impl AuditCase {
    /// A case anchored on a single snapshot (no invariant arithmetic).
    pub fn single(category: Category, record: &LedgerRecord, as_prev: bool) -> Self {
        let (prev, curr) = if as_prev {
            (Some(record.clone()), None)
        } else {
            (None, Some(record.clone()))
        };
        Self {
            id: String::new(),
            category,
            trainer: record.trainer.clone(),
            member: record.member.clone(),
            period: record.period,
            prev,
            curr,
            expected_remaining: None,
            actual_remaining: None,
            diff: None,
            magnitude: record.sessions_consumed_this_period.abs(),
            flags: BTreeSet::new(),
            purchases: Vec::new(),
            directory: None,
            evidence: Vec::new(),
        }
    }

    pub fn add_evidence(&mut self, source: EvidenceSource, note: impl Into<String>) {
        self.evidence.push(Evidence::new(source, note));
    }
}

// ---------------------------------------------------------------------------
// Summary + Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrainerCounts {
    pub total: usize,
    pub by_category: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditSummary {
    pub records_accepted: usize,
    pub records_rejected: usize,
    pub series: usize,
    pub pairs_compared: usize,
    pub invariant_cases: usize,
    pub total_cases: usize,
    /// `invariant_cases / pairs_compared * 100`.
    pub anomaly_rate_pct: f64,
    pub category_counts: BTreeMap<String, usize>,
    pub flag_counts: BTreeMap<String, usize>,
    pub trainer_counts: BTreeMap<String, TrainerCounts>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainerGroup {
    pub trainer: String,
    pub count: usize,
    pub case_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryGroup {
    pub category: Category,
    pub count: usize,
    pub trainers: Vec<TrainerGroup>,
}

/// Per (period, trainer) activity totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodSummary {
    pub period: Period,
    pub trainer: String,
    pub members: usize,
    pub sessions_consumed: f64,
    pub fee_total: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReferenceAvailability {
    pub purchases: bool,
    pub directory: bool,
    pub trainers: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditMeta {
    pub config_name: String,
    pub engine_version: String,
    pub run_at: String,
    pub series_key: SeriesKey,
    pub watch_periods: Vec<Period>,
    pub references: ReferenceAvailability,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditResult {
    pub meta: AuditMeta,
    pub summary: AuditSummary,
    pub cases: Vec<AuditCase>,
    pub by_category: Vec<CategoryGroup>,
    pub period_summaries: Vec<PeriodSummary>,
    pub rejections: Vec<Rejection>,
}
