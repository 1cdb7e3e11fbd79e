use std::collections::BTreeMap;

use regex::Regex;

use crate::config::{IdentityConfig, IdentityStrategy};
use crate::error::AuditError;

/// Maps member names from different sources onto one comparison key.
///
/// Ledger names, purchase names and directory names are all passed through
/// [`IdentityMatcher::key`] before lookup; the names shown in cases are never
/// rewritten.
#[derive(Debug, Clone)]
pub struct IdentityMatcher {
    strategy: IdentityStrategy,
    rules: Vec<(Regex, String)>,
    mappings: BTreeMap<String, String>,
}

impl IdentityMatcher {
    pub fn exact() -> Self {
        Self {
            strategy: IdentityStrategy::Exact,
            rules: Vec::new(),
            mappings: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &IdentityConfig) -> Result<Self, AuditError> {
        let mut rules = Vec::new();
        for rule in config.rules.iter().filter(|r| r.enabled) {
            let re = Regex::new(&rule.pattern).map_err(|e| {
                AuditError::ConfigValidation(format!("bad identity pattern '{}': {e}", rule.pattern))
            })?;
            rules.push((re, rule.replacement.clone()));
        }
        Ok(Self {
            strategy: config.strategy,
            rules,
            mappings: config.mappings.clone(),
        })
    }

    pub fn key(&self, name: &str) -> String {
        match self.strategy {
            IdentityStrategy::Exact => name.to_string(),
            IdentityStrategy::CaseInsensitive => name.trim().to_lowercase(),
            IdentityStrategy::Normalized => {
                let mut normalized = name.trim().to_string();
                for (re, replacement) in &self.rules {
                    normalized = re.replace_all(&normalized, replacement.as_str()).into_owned();
                }
                match self.mappings.get(&normalized) {
                    Some(canonical) => canonical.clone(),
                    None => normalized,
                }
            }
        }
    }
}

impl Default for IdentityMatcher {
    fn default() -> Self {
        Self::exact()
    }
}
