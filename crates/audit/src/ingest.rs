//! Row validation and the CSV adapters for the canonical input layouts.
//!
//! Validation never fails the run: every ledger row ends up either accepted
//! as a [`LedgerRecord`] or rejected with a [`RejectReason`]. Only structural
//! problems (unreadable CSV, missing required column) are errors.

use std::collections::{HashMap, HashSet};

use chrono::{NaiveDate, NaiveDateTime};
use log::warn;

use crate::error::AuditError;
use crate::model::{
    LedgerRecord, MemberDirectoryEntry, PurchaseEvent, RawLedgerRow, RejectReason, Rejection,
    TrainerStatus,
};
use crate::period::Period;

/// Outcome of validating a batch of raw ledger rows.
#[derive(Debug, Clone, Default)]
pub struct ValidatedLedger {
    pub accepted: Vec<LedgerRecord>,
    pub rejected: Vec<Rejection>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate raw rows in input order. The first row for a given
/// (trainer, member, period) wins; later ones are rejected as duplicates.
pub fn validate_rows(rows: &[RawLedgerRow]) -> ValidatedLedger {
    let mut out = ValidatedLedger::default();
    let mut seen: HashSet<(String, String, Period)> = HashSet::new();

    for raw in rows {
        match validate_row(raw) {
            Ok(record) => {
                let key = (record.trainer.clone(), record.member.clone(), record.period);
                if seen.insert(key) {
                    out.accepted.push(record);
                } else {
                    let rejection = Rejection {
                        row: raw.row,
                        trainer: Some(record.trainer),
                        member: Some(record.member),
                        reason: RejectReason::DuplicateRecord { period: record.period },
                    };
                    log_rejection(&rejection);
                    out.rejected.push(rejection);
                }
            }
            Err(reason) => {
                let rejection = Rejection {
                    row: raw.row,
                    trainer: non_blank(&raw.trainer).map(str::to_string),
                    member: non_blank(&raw.member).map(str::to_string),
                    reason,
                };
                log_rejection(&rejection);
                out.rejected.push(rejection);
            }
        }
    }

    out
}

fn validate_row(raw: &RawLedgerRow) -> Result<LedgerRecord, RejectReason> {
    let trainer = non_blank(&raw.trainer).ok_or(RejectReason::MissingTrainer)?;
    let member = non_blank(&raw.member).ok_or(RejectReason::MissingMember)?;
    let month = non_blank(&raw.month).ok_or(RejectReason::MissingPeriod)?;
    let year = non_blank(&raw.year).unwrap_or("");
    let period = Period::from_labels(year, month).ok_or_else(|| RejectReason::UnparseablePeriod {
        label: format!("{year} {month}").trim().to_string(),
    })?;

    Ok(LedgerRecord {
        row: raw.row,
        trainer: trainer.to_string(),
        member: member.to_string(),
        period,
        registered_sessions: number_or_zero("registered_sessions", &raw.registered_sessions)?,
        total_consumed_sessions: number_or_zero(
            "total_consumed_sessions",
            &raw.total_consumed_sessions,
        )?,
        remaining_sessions: number_or_zero("remaining_sessions", &raw.remaining_sessions)?,
        sessions_consumed_this_period: number_or_zero(
            "sessions_consumed_this_period",
            &raw.sessions_consumed_this_period,
        )?,
        fee_this_period: number_or_zero("fee_this_period", &raw.fee_this_period)?,
        unit_price: optional_number("unit_price", &raw.unit_price)?,
        revenue_share: optional_number("revenue_share", &raw.revenue_share)?,
    })
}

fn log_rejection(rejection: &Rejection) {
    warn!(
        "skipping ledger row {} ({} / {}): {}",
        rejection.row,
        rejection.trainer.as_deref().unwrap_or("?"),
        rejection.member.as_deref().unwrap_or("?"),
        rejection.reason
    );
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Spreadsheet exports spell "no value" in several ways.
fn is_null_marker(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "" | "-" | "nan" | "null" | "none")
}

fn optional_number(field: &str, value: &Option<String>) -> Result<Option<f64>, RejectReason> {
    let Some(text) = value.as_deref().map(str::trim) else {
        return Ok(None);
    };
    if is_null_marker(text) {
        return Ok(None);
    }
    let cleaned = text.replace(',', "");
    match cleaned.parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(Some(n)),
        _ => Err(RejectReason::InvalidNumber {
            field: field.to_string(),
            value: text.to_string(),
        }),
    }
}

fn number_or_zero(field: &str, value: &Option<String>) -> Result<f64, RejectReason> {
    Ok(optional_number(field, value)?.unwrap_or(0.0))
}

// ---------------------------------------------------------------------------
// CSV adapters
// ---------------------------------------------------------------------------

struct Columns {
    source: &'static str,
    headers: Vec<String>,
}

impl Columns {
    fn required(&self, name: &str) -> Result<usize, AuditError> {
        self.optional(name).ok_or_else(|| AuditError::MissingColumn {
            source: self.source.into(),
            column: name.into(),
        })
    }

    fn optional(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.trim() == name)
    }
}

fn reader<'a>(
    source: &'static str,
    csv_data: &'a str,
) -> Result<(csv::Reader<&'a [u8]>, Columns), AuditError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(csv_data.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| AuditError::Csv { source: source.into(), message: e.to_string() })?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    Ok((reader, Columns { source, headers }))
}

fn field(record: &csv::StringRecord, idx: Option<usize>) -> Option<String> {
    idx.and_then(|i| record.get(i)).map(|v| v.to_string())
}

/// Load ledger rows. Required columns: `trainer`, `member`, `month`,
/// `remaining_sessions`, `sessions_consumed`. Everything else is optional.
pub fn load_ledger_csv(csv_data: &str) -> Result<Vec<RawLedgerRow>, AuditError> {
    let (mut reader, cols) = reader("ledger", csv_data)?;

    let trainer = cols.required("trainer")?;
    let member = cols.required("member")?;
    let month = cols.required("month")?;
    let remaining = cols.required("remaining_sessions")?;
    let consumed = cols.required("sessions_consumed")?;
    let year = cols.optional("year");
    let registered = cols.optional("registered_sessions");
    let total_consumed = cols.optional("total_consumed_sessions");
    let fee = cols.optional("fee");
    let unit_price = cols.optional("unit_price");
    let revenue_share = cols.optional("revenue_share");

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record =
            record.map_err(|e| AuditError::Csv { source: "ledger".into(), message: e.to_string() })?;
        rows.push(RawLedgerRow {
            row: i + 1,
            trainer: field(&record, Some(trainer)),
            member: field(&record, Some(member)),
            year: field(&record, year),
            month: field(&record, Some(month)),
            registered_sessions: field(&record, registered),
            total_consumed_sessions: field(&record, total_consumed),
            remaining_sessions: field(&record, Some(remaining)),
            sessions_consumed_this_period: field(&record, Some(consumed)),
            fee_this_period: field(&record, fee),
            unit_price: field(&record, unit_price),
            revenue_share: field(&record, revenue_share),
        });
    }

    Ok(rows)
}

fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(ts);
        }
    }
    parse_date(value).and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    ["%Y-%m-%d", "%Y.%m.%d", "%Y/%m/%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

/// Load purchase events. Required columns: `member`, `session_count`,
/// `started_at`. Rows that cannot be parsed are skipped with a warning.
pub fn load_purchases_csv(csv_data: &str) -> Result<Vec<PurchaseEvent>, AuditError> {
    let (mut reader, cols) = reader("purchases", csv_data)?;

    let member = cols.required("member")?;
    let count = cols.required("session_count")?;
    let started = cols.required("started_at")?;
    let package = cols.optional("package_type");

    let mut events = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record
            .map_err(|e| AuditError::Csv { source: "purchases".into(), message: e.to_string() })?;
        let row = i + 1;

        let name = record.get(member).unwrap_or("").trim();
        if name.is_empty() {
            warn!("purchases row {row}: missing member, skipped");
            continue;
        }
        let count_text = record.get(count).unwrap_or("").trim();
        let session_count = if is_null_marker(count_text) {
            0.0
        } else {
            match count_text.replace(',', "").parse::<f64>() {
                Ok(n) if n.is_finite() => n,
                _ => {
                    warn!("purchases row {row}: bad session_count '{count_text}', skipped");
                    continue;
                }
            }
        };
        let started_text = record.get(started).unwrap_or("");
        let Some(started_at) = parse_timestamp(started_text) else {
            warn!("purchases row {row}: bad started_at '{started_text}', skipped");
            continue;
        };

        events.push(PurchaseEvent {
            member: name.to_string(),
            package_type: field(&record, package).unwrap_or_default().trim().to_string(),
            session_count,
            started_at,
        });
    }

    Ok(events)
}

/// Load the member directory. Required column: `member`. Optional: `status`,
/// `expiry_date`, `trainer`. An unparseable expiry date keeps the entry but
/// drops the date.
pub fn load_directory_csv(csv_data: &str) -> Result<Vec<MemberDirectoryEntry>, AuditError> {
    let (mut reader, cols) = reader("directory", csv_data)?;

    let member = cols.required("member")?;
    let status = cols.optional("status");
    let expiry = cols.optional("expiry_date");
    let trainer = cols.optional("trainer");

    let mut entries = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record
            .map_err(|e| AuditError::Csv { source: "directory".into(), message: e.to_string() })?;
        let row = i + 1;

        let name = record.get(member).unwrap_or("").trim();
        if name.is_empty() {
            warn!("directory row {row}: missing member, skipped");
            continue;
        }

        let expiry_text = field(&record, expiry).unwrap_or_default();
        let expiry_date = if expiry_text.trim().is_empty() {
            None
        } else {
            let parsed = parse_date(&expiry_text);
            if parsed.is_none() {
                warn!("directory row {row}: bad expiry_date '{expiry_text}', ignored");
            }
            parsed
        };

        entries.push(MemberDirectoryEntry {
            member: name.to_string(),
            status: field(&record, status).unwrap_or_default().trim().to_string(),
            expiry_date,
            trainer: field(&record, trainer)
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
        });
    }

    Ok(entries)
}

pub fn parse_trainer_status(value: &str) -> Option<TrainerStatus> {
    match value.trim().to_lowercase().as_str() {
        "active" | "working" | "employed" | "근무" | "재직" => Some(TrainerStatus::Active),
        "terminated" | "resigned" | "inactive" | "left" | "퇴사" | "퇴직" => {
            Some(TrainerStatus::Terminated)
        }
        _ => None,
    }
}

/// Load trainer statuses. Required columns: `name`, `status`.
pub fn load_trainers_csv(csv_data: &str) -> Result<HashMap<String, TrainerStatus>, AuditError> {
    let (mut reader, cols) = reader("trainers", csv_data)?;

    let name = cols.required("name")?;
    let status = cols.required("status")?;

    let mut statuses = HashMap::new();
    for (i, record) in reader.records().enumerate() {
        let record = record
            .map_err(|e| AuditError::Csv { source: "trainers".into(), message: e.to_string() })?;
        let row = i + 1;

        let trainer = record.get(name).unwrap_or("").trim();
        let status_text = record.get(status).unwrap_or("");
        match (trainer.is_empty(), parse_trainer_status(status_text)) {
            (false, Some(s)) => {
                statuses.insert(trainer.to_string(), s);
            }
            (true, _) => warn!("trainers row {row}: missing name, skipped"),
            (false, None) => {
                warn!("trainers row {row}: unknown status '{status_text}' for {trainer}, skipped")
            }
        }
    }

    Ok(statuses)
}
