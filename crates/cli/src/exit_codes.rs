//! CLI Exit Code Registry
//!
//! Single source of truth for `ptaudit` exit codes. Schedulers and CI jobs
//! branch on these, so they are part of the shell contract.
//!
//! | Code | Meaning                                               |
//! |------|-------------------------------------------------------|
//! | 0    | Success, no blocking findings                         |
//! | 1    | General error (unspecified)                           |
//! | 2    | Usage error (bad arguments; emitted by clap)          |
//! | 3    | Audit found cases in a blocking category              |
//! | 4    | Invalid audit config                                  |
//! | 5    | Runtime error (unreadable input, malformed CSV, ...)  |

use ptledger_audit::AuditError;

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed, nothing blocking found.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing required options.
/// clap exits with this code on its own; listed here for the table.
#[allow(dead_code)]
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Audit (3-5)
// =============================================================================

/// At least one case falls in a `--fail-on` category.
pub const EXIT_AUDIT_FINDINGS: u8 = 3;

/// Config failed to parse or validate, or lacks an `[inputs]` section.
pub const EXIT_AUDIT_INVALID_CONFIG: u8 = 4;

/// Input could not be read or loaded, or the engine refused to run.
pub const EXIT_AUDIT_RUNTIME: u8 = 5;

/// Map an engine error to its exit code.
pub fn audit_exit_code(err: &AuditError) -> u8 {
    match err {
        AuditError::ConfigParse(_) | AuditError::ConfigValidation(_) => EXIT_AUDIT_INVALID_CONFIG,
        AuditError::MissingColumn { .. }
        | AuditError::Csv { .. }
        | AuditError::EmptyLedger
        | AuditError::Io(_) => EXIT_AUDIT_RUNTIME,
    }
}
