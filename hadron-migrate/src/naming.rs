//! Names for the objects a migration creates.
//!
//! Every generated table is `<source>_<op>_<timestamp>`, where the
//! timestamp has millisecond precision and sorts chronologically, so
//! repeated or concurrent runs against one source never collide.

use chrono::NaiveDateTime;

use crate::error::{MigrateResult, MigrationError};
use crate::trigger::TriggerAction;

/// MySQL's identifier length limit for tables and triggers.
pub const MAX_IDENTIFIER_LEN: usize = 64;

/// Render a timestamp as `YYYY_MM_DD_HH_MM_SS_mmm`.
pub fn format_time(t: NaiveDateTime) -> String {
    t.format("%Y_%m_%d_%H_%M_%S_%3f").to_string()
}

/// Backtick-quote a MySQL identifier, doubling embedded backticks.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Trigger name for one action of one run: `<source>_<action>_<timestamp>`.
pub fn trigger_name(source: &str, action: TriggerAction, timestamp: &str) -> String {
    format!("{}_{}_{}", source, action, timestamp)
}

/// Names of every table a migration run touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    /// The live table being migrated.
    pub source: String,
    /// Shadow table with the target schema.
    pub ghost: String,
    /// Change log filled by triggers.
    pub changes: String,
    /// Name the original table is parked under at cutover.
    pub retired: String,
    /// The timestamp suffix shared by the generated names.
    pub timestamp: String,
}

impl TableNames {
    /// Derive names for `source` at time `at`.
    pub fn new(source: impl Into<String>, at: NaiveDateTime) -> MigrateResult<Self> {
        let source = source.into();
        if source.is_empty() {
            return Err(MigrationError::invalid_name("source table name is empty"));
        }

        let timestamp = format_time(at);
        let names = Self {
            ghost: format!("{}_ghost_{}", source, timestamp),
            changes: format!("{}_changes_{}", source, timestamp),
            retired: format!("{}_retired_{}", source, timestamp),
            source,
            timestamp,
        };

        for name in [&names.ghost, &names.changes, &names.retired] {
            check_length(name)?;
        }
        for action in TriggerAction::ALL {
            check_length(&names.trigger(action))?;
        }

        Ok(names)
    }

    /// Name of this run's trigger for `action`.
    pub fn trigger(&self, action: TriggerAction) -> String {
        trigger_name(&self.source, action, &self.timestamp)
    }

    /// Derive names using the current local time.
    pub fn now(source: impl Into<String>) -> MigrateResult<Self> {
        Self::new(source, chrono::Local::now().naive_local())
    }
}

fn check_length(name: &str) -> MigrateResult<()> {
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(MigrationError::invalid_name(format!(
            "`{}` exceeds {} characters",
            name, MAX_IDENTIFIER_LEN
        )));
    }
    Ok(())
}
