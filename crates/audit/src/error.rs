use std::fmt;

#[derive(Debug)]
pub enum AuditError {
    /// TOML parse / deserialization error.
    ConfigParse(String),
    /// Config validation error (bad ratio, bad watch period, bad regex, etc.).
    ConfigValidation(String),
    /// Missing required column in an input CSV.
    MissingColumn { source: String, column: String },
    /// Malformed CSV structure (not a bad value inside a well-formed row).
    Csv { source: String, message: String },
    /// The ledger input had no rows at all.
    EmptyLedger,
    /// IO error (file read, etc.).
    Io(String),
}

impl fmt::Display for AuditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigParse(msg) => write!(f, "config parse error: {msg}"),
            Self::ConfigValidation(msg) => write!(f, "config validation error: {msg}"),
            Self::MissingColumn { source, column } => {
                write!(f, "{source}: missing column '{column}'")
            }
            Self::Csv { source, message } => write!(f, "{source}: malformed CSV: {message}"),
            Self::EmptyLedger => write!(f, "ledger input contains no rows"),
            Self::Io(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for AuditError {}
