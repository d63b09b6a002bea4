//! Purpose: Resolve bridge configuration from the environment.
//! Exports: `BridgeConfig`, `default_spool_dir`.
//! Role: One place for defaults shared by the C ABI bootstrap and the CLI.
//! Invariants: Default spool directory remains `~/.printbridge/spool`.
//! Invariants: Unknown or empty variables fall back to defaults; bad values are usage errors.
use std::path::PathBuf;

use crate::core::error::{Error, ErrorKind};
use crate::core::facility::PreviewOutcome;
use crate::core::spool::SpoolFacility;

pub const ENV_SPOOL_DIR: &str = "PRINTBRIDGE_SPOOL_DIR";
pub const ENV_PRINTERS: &str = "PRINTBRIDGE_PRINTERS";
pub const ENV_PREVIEW: &str = "PRINTBRIDGE_PREVIEW";
pub const ENV_LOG: &str = "PRINTBRIDGE_LOG";

const DEFAULT_PRINTER: &str = "Spool";
const DEFAULT_LOG_FILTER: &str = "warn";

pub fn default_spool_dir() -> PathBuf {
    let home = std::env::var_os("HOME").unwrap_or_default();
    PathBuf::from(home).join(".printbridge").join("spool")
}

#[derive(Clone, Debug, PartialEq)]
pub struct BridgeConfig {
    pub spool_dir: PathBuf,
    pub printers: Vec<String>,
    pub operator: PreviewOutcome,
    pub log_filter: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            spool_dir: default_spool_dir(),
            printers: vec![DEFAULT_PRINTER.to_string()],
            operator: PreviewOutcome::Accepted,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl BridgeConfig {
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut config = Self::default();
        let value = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(dir) = value(ENV_SPOOL_DIR) {
            config.spool_dir = PathBuf::from(dir);
        }
        if let Some(raw) = value(ENV_PRINTERS) {
            let printers = parse_printers(&raw);
            if printers.is_empty() {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(format!("{ENV_PRINTERS} lists no printer names")));
            }
            config.printers = printers;
        }
        if let Some(raw) = value(ENV_PREVIEW) {
            config.operator = parse_operator(&raw)?;
        }
        if let Some(filter) = value(ENV_LOG) {
            config.log_filter = filter;
        }
        Ok(config)
    }

    pub fn with_spool_dir(mut self, spool_dir: impl Into<PathBuf>) -> Self {
        self.spool_dir = spool_dir.into();
        self
    }

    pub fn spool_facility(&self) -> SpoolFacility {
        SpoolFacility::new(&self.spool_dir)
            .with_printers(self.printers.clone())
            .with_operator(self.operator)
    }
}

fn parse_printers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_operator(raw: &str) -> Result<PreviewOutcome, Error> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "accept" | "accepted" => Ok(PreviewOutcome::Accepted),
        "dismiss" | "dismissed" => Ok(PreviewOutcome::Dismissed),
        other => Err(Error::new(ErrorKind::Usage)
            .with_message(format!("invalid {ENV_PREVIEW} value '{other}'"))
            .with_hint("Use accept or dismiss.")),
    }
}
