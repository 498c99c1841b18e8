//! Configuration constants and defaults for a reconciliation run
//!
//! Every value has a sensible default; most applications only ever use
//! [`MigrateConfig::default`].

use std::path::PathBuf;

use crate::error::{MigrateError, Result};

/// Settings for a [`Migrator`](crate::Migrator).
#[derive(Debug, Clone)]
pub struct MigrateConfig {
    /// Alias the ephemeral target database is attached under.
    pub target_alias: String,

    /// Prefix of the temporary table a changed table is rebuilt into.
    pub temp_prefix: String,

    /// Objects whose names start with one of these prefixes are never diffed.
    pub ignored_prefixes: Vec<String>,

    /// Directory holding the ephemeral target database file.
    ///
    /// `None` uses [`std::env::temp_dir`].
    pub target_dir: Option<PathBuf>,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            target_alias: DEFAULT_TARGET_ALIAS.to_owned(),
            temp_prefix: DEFAULT_TEMP_PREFIX.to_owned(),
            ignored_prefixes: DEFAULT_IGNORED_PREFIXES
                .iter()
                .map(|p| (*p).to_owned())
                .collect(),
            target_dir: None,
        }
    }
}

/// Default alias of the attached target database
pub const DEFAULT_TARGET_ALIAS: &str = "target";

/// Default prefix of rebuild tables
///
/// A changed table `t` is rebuilt as `_tabula_new_t` and renamed back to `t`
/// once its rows have been copied.
pub const DEFAULT_TEMP_PREFIX: &str = "_tabula_new_";

/// Default prefixes of objects excluded from every diff
///
/// `sqlite_` is reserved by the engine itself; `_litestream_` covers the
/// bookkeeping tables of the litestream replicator.
pub const DEFAULT_IGNORED_PREFIXES: &[&str] = &["sqlite_", "_litestream_"];

impl MigrateConfig {
    /// Check the configuration before it is used to build SQL.
    pub fn validate(&self) -> Result<()> {
        if !is_plain_identifier(&self.target_alias) {
            return Err(MigrateError::Config(format!(
                "target alias `{}` must be a plain identifier",
                self.target_alias
            )));
        }

        if matches!(self.target_alias.to_ascii_lowercase().as_str(), "main" | "temp") {
            return Err(MigrateError::Config(format!(
                "target alias `{}` is reserved by sqlite",
                self.target_alias
            )));
        }

        if self.temp_prefix.is_empty() {
            return Err(MigrateError::Config(
                "temp prefix must not be empty".to_owned(),
            ));
        }

        Ok(())
    }

    /// Whether an object with this name is excluded from reconciliation.
    pub fn is_ignored(&self, name: &str) -> bool {
        name.starts_with(&self.temp_prefix)
            || self
                .ignored_prefixes
                .iter()
                .any(|prefix| name.starts_with(prefix.as_str()))
    }
}

fn is_plain_identifier(value: &str) -> bool {
    let mut chars = value.chars();

    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Configuration builder for customizing a reconciliation run
#[derive(Debug)]
pub struct ConfigBuilder {
    config: MigrateConfig,
}

impl ConfigBuilder {
    /// Create a new configuration builder with default values
    pub fn new() -> Self {
        Self {
            config: MigrateConfig::default(),
        }
    }

    /// Set the alias the target database is attached under
    pub fn target_alias(mut self, alias: impl Into<String>) -> Self {
        self.config.target_alias = alias.into();
        self
    }

    /// Set the prefix of rebuild tables
    pub fn temp_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.temp_prefix = prefix.into();
        self
    }

    /// Exclude objects starting with `prefix`, in addition to the defaults
    pub fn ignore_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.ignored_prefixes.push(prefix.into());
        self
    }

    /// Set the directory of the ephemeral target database
    pub fn target_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.target_dir = Some(dir.into());
        self
    }

    /// Build the final configuration
    pub fn build(self) -> MigrateConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = MigrateConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.target_alias, "target");
    }

    #[test]
    fn rejects_quoted_or_reserved_alias() {
        let config = ConfigBuilder::new().target_alias("tar get").build();
        assert!(config.validate().is_err());

        let config = ConfigBuilder::new().target_alias("main").build();
        assert!(config.validate().is_err());

        let config = ConfigBuilder::new().target_alias("1target").build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_temp_prefix() {
        let config = ConfigBuilder::new().temp_prefix("").build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn ignores_reserved_and_configured_prefixes() {
        let config = ConfigBuilder::new().ignore_prefix("_audit_").build();

        assert!(config.is_ignored("sqlite_sequence"));
        assert!(config.is_ignored("_litestream_seq"));
        assert!(config.is_ignored("_audit_log"));
        assert!(config.is_ignored("_tabula_new_user"));
        assert!(!config.is_ignored("user"));
    }
}
