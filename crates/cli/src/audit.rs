//! `ptaudit run` / `ptaudit validate`: config-driven session ledger audit.

use std::path::{Path, PathBuf};

use clap::Subcommand;
use ptledger_audit::config::InputsConfig;
use ptledger_audit::ingest::{
    load_directory_csv, load_ledger_csv, load_purchases_csv, load_trainers_csv,
};
use ptledger_audit::{AuditConfig, AuditError, AuditInput, AuditResult, Category, ReferenceData};
use tracing::{debug, info};

use crate::exit_codes::{
    audit_exit_code, EXIT_AUDIT_FINDINGS, EXIT_AUDIT_INVALID_CONFIG, EXIT_AUDIT_RUNTIME, EXIT_ERROR,
};
use crate::CliError;

/// Categories that fail the run unless `--fail-on` says otherwise.
const DEFAULT_BLOCKING: [Category; 2] = [Category::SuspectedAbuse, Category::UnexplainedIncrease];

#[derive(Subcommand)]
pub enum AuditCommands {
    /// Run the audit described by a TOML config file
    #[command(after_help = "\
Examples:
  ptaudit run audit.toml
  ptaudit run audit.toml --json
  ptaudit run audit.toml --output result.json
  ptaudit run audit.toml --fail-on suspected_abuse --fail-on missing_member")]
    Run {
        /// Path to the audit config (.toml)
        config: PathBuf,

        /// Output JSON to stdout
        #[arg(long)]
        json: bool,

        /// Write JSON output to file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Exit 3 when any case has this category (repeatable).
        /// Default: SUSPECTED_ABUSE and UNEXPLAINED_INCREASE
        #[arg(long = "fail-on", value_name = "CATEGORY", value_parser = parse_category)]
        fail_on: Vec<Category>,
    },

    /// Validate an audit config and check that its input files exist
    #[command(after_help = "\
Examples:
  ptaudit validate audit.toml")]
    Validate {
        /// Path to the audit config (.toml)
        config: PathBuf,
    },
}

fn parse_category(s: &str) -> Result<Category, String> {
    s.parse()
}

pub fn cmd_audit(cmd: AuditCommands) -> Result<(), CliError> {
    match cmd {
        AuditCommands::Run { config, json, output, fail_on } => {
            cmd_audit_run(config, json, output, fail_on)
        }
        AuditCommands::Validate { config } => cmd_audit_validate(config),
    }
}

fn audit_err(code: u8, msg: impl Into<String>) -> CliError {
    CliError { code, message: msg.into(), hint: None }
}

impl From<AuditError> for CliError {
    fn from(err: AuditError) -> Self {
        let hint = match &err {
            AuditError::MissingColumn { source: _, column } if column == "sessions_consumed" => {
                Some("rename the per-month consumption column to 'sessions_consumed'".to_string())
            }
            AuditError::EmptyLedger => Some("check that inputs.ledger points at a non-empty CSV".to_string()),
            _ => None,
        };
        CliError { code: audit_exit_code(&err), message: err.to_string(), hint }
    }
}

// ---------------------------------------------------------------------------
// Config + input loading
// ---------------------------------------------------------------------------

fn load_config(config_path: &Path) -> Result<(AuditConfig, InputsConfig), CliError> {
    let config_str = std::fs::read_to_string(config_path)
        .map_err(|e| AuditError::Io(format!("cannot read config {}: {e}", config_path.display())))?;

    let config = AuditConfig::from_toml(&config_str)?;
    let inputs = config.inputs.clone().ok_or_else(|| {
        audit_err(EXIT_AUDIT_INVALID_CONFIG, "config has no [inputs] section")
            .with_hint("add [inputs] with at least ledger = \"<file>.csv\"")
    })?;
    Ok((config, inputs))
}

/// Input files are resolved relative to the config file's directory.
fn input_paths(config_path: &Path, inputs: &InputsConfig) -> Vec<(&'static str, PathBuf)> {
    let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    let mut paths = vec![("ledger", base_dir.join(&inputs.ledger))];
    let optional = [
        ("purchases", &inputs.purchases),
        ("directory", &inputs.directory),
        ("trainers", &inputs.trainers),
    ];
    for (source, file) in optional {
        if let Some(file) = file {
            paths.push((source, base_dir.join(file)));
        }
    }
    paths
}

fn read_input(source: &str, path: &Path) -> Result<String, CliError> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| AuditError::Io(format!("cannot read {source} {}: {e}", path.display())))?;
    debug!(source, path = %path.display(), bytes = data.len(), "read input");
    Ok(data)
}

fn load_input(config_path: &Path, inputs: &InputsConfig) -> Result<AuditInput, CliError> {
    let mut input = AuditInput { ledger: Vec::new(), references: ReferenceData::default() };

    for (source, path) in input_paths(config_path, inputs) {
        let data = read_input(source, &path)?;
        match source {
            "ledger" => {
                input.ledger = load_ledger_csv(&data)?;
                info!(rows = input.ledger.len(), "loaded ledger");
            }
            "purchases" => {
                let events = load_purchases_csv(&data)?;
                info!(rows = events.len(), "loaded purchases");
                input.references.purchases = Some(events);
            }
            "directory" => {
                let entries = load_directory_csv(&data)?;
                info!(rows = entries.len(), "loaded member directory");
                input.references.directory = Some(entries);
            }
            _ => {
                let trainers = load_trainers_csv(&data)?;
                info!(rows = trainers.len(), "loaded trainer statuses");
                input.references.trainers = Some(trainers);
            }
        }
    }

    Ok(input)
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

fn cmd_audit_run(
    config_path: PathBuf,
    json_output: bool,
    output_file: Option<PathBuf>,
    fail_on: Vec<Category>,
) -> Result<(), CliError> {
    let (config, inputs) = load_config(&config_path)?;
    let input = load_input(&config_path, &inputs)?;

    let result = ptledger_audit::run(&config, &input)?;

    let json_str = serde_json::to_string_pretty(&result)
        .map_err(|e| audit_err(EXIT_ERROR, format!("JSON serialization error: {e}")))?;

    if let Some(ref path) = output_file {
        std::fs::write(path, &json_str)
            .map_err(|e| audit_err(EXIT_AUDIT_RUNTIME, format!("cannot write output: {e}")))?;
        eprintln!("wrote {}", path.display());
    }

    if json_output {
        println!("{json_str}");
    }

    print_summary(&result);

    let blocking: &[Category] = if fail_on.is_empty() { &DEFAULT_BLOCKING } else { &fail_on };
    let blocked: Vec<&str> = result
        .cases
        .iter()
        .filter(|c| blocking.contains(&c.category))
        .map(|c| c.id.as_str())
        .collect();

    if !blocked.is_empty() {
        let names: Vec<String> = blocking.iter().map(|c| c.to_string()).collect();
        return Err(audit_err(
            EXIT_AUDIT_FINDINGS,
            format!("{} blocking case(s) in {}", blocked.len(), names.join(", ")),
        )
        .with_hint(format!("first: {}; see the JSON output for evidence", blocked[0])));
    }

    Ok(())
}

/// Human summary to stderr.
fn print_summary(result: &AuditResult) {
    let s = &result.summary;
    eprintln!(
        "audit '{}': {} records ({} rejected), {} series, {} pairs compared",
        result.meta.config_name, s.records_accepted, s.records_rejected, s.series, s.pairs_compared,
    );
    eprintln!(
        "invariant cases: {} ({:.1}%), total cases: {}",
        s.invariant_cases, s.anomaly_rate_pct, s.total_cases,
    );
    for group in &result.by_category {
        eprintln!("  {:<22} {}", group.category.to_string(), group.count);
    }

    let refs = &result.meta.references;
    let missing: Vec<&str> = [
        ("purchases", refs.purchases),
        ("directory", refs.directory),
        ("trainers", refs.trainers),
    ]
    .into_iter()
    .filter(|(_, present)| !present)
    .map(|(name, _)| name)
    .collect();
    if !missing.is_empty() {
        eprintln!("partial report: no {} supplied", missing.join(", "));
    }
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn cmd_audit_validate(config_path: PathBuf) -> Result<(), CliError> {
    let (config, inputs) = load_config(&config_path)?;

    for (source, path) in input_paths(&config_path, &inputs) {
        if !path.is_file() {
            return Err(audit_err(
                EXIT_AUDIT_RUNTIME,
                format!("{source} input not found: {}", path.display()),
            )
            .with_hint("input paths are relative to the config file"));
        }
    }

    let watch: Vec<String> = config.watch.periods.iter().map(|p| p.to_string()).collect();
    eprintln!(
        "valid: audit '{}' (series key {}, epsilon {}, watch [{}])",
        config.name,
        config.series.key,
        config.tolerance.epsilon,
        watch.join(", "),
    );
    Ok(())
}
