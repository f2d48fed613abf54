//! Atomic multi-table rename used for cutover.

use std::collections::HashSet;

use tracing::info;

use crate::error::{MigrateResult, MigrationError};
use crate::executor::SqlExecutor;
use crate::naming::quote_identifier;

/// Order `mapping` so every rename targets a name that is free at that point.
///
/// MySQL applies the pairs of one `RENAME TABLE` left to right but commits
/// them atomically, so cycles such as `a → b, b → a` are broken by parking
/// one table under `<name>_hadron_swap` within the same statement.
/// Identity pairs are dropped.
pub fn rename_plan(mapping: &[(&str, &str)]) -> MigrateResult<Vec<(String, String)>> {
    let mut sources = HashSet::new();
    let mut targets = HashSet::new();
    for (from, to) in mapping {
        if from.is_empty() || to.is_empty() {
            return Err(MigrationError::invalid_mapping("table names must not be empty"));
        }
        if !sources.insert(*from) {
            return Err(MigrationError::invalid_mapping(format!(
                "`{}` is renamed more than once",
                from
            )));
        }
        if !targets.insert(*to) {
            return Err(MigrationError::invalid_mapping(format!(
                "`{}` is the target of more than one rename",
                to
            )));
        }
    }

    let mut pending: Vec<(String, String)> = mapping
        .iter()
        .filter(|(from, to)| from != to)
        .map(|(from, to)| (from.to_string(), to.to_string()))
        .collect();
    let mut plan = Vec::with_capacity(pending.len() + 1);

    while !pending.is_empty() {
        let free = pending
            .iter()
            .position(|(_, to)| !pending.iter().any(|(from, _)| from == to));

        match free {
            Some(idx) => plan.push(pending.remove(idx)),
            None => {
                let (from, to) = pending.remove(0);
                let parked = format!("{}_hadron_swap", from);
                plan.push((from, parked.clone()));
                pending.push((parked, to));
            }
        }
    }

    Ok(plan)
}

/// Build the single `RENAME TABLE` statement for `mapping`.
pub fn rename_sql(mapping: &[(&str, &str)]) -> MigrateResult<Option<String>> {
    let plan = rename_plan(mapping)?;
    if plan.is_empty() {
        return Ok(None);
    }
    let pairs = plan
        .iter()
        .map(|(from, to)| format!("{} TO {}", quote_identifier(from), quote_identifier(to)))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(Some(format!("RENAME TABLE {}", pairs)))
}

/// Rename every table in `mapping` in one atomic statement.
pub async fn rename_tables(db: &dyn SqlExecutor, mapping: &[(&str, &str)]) -> MigrateResult<()> {
    let Some(sql) = rename_sql(mapping)? else {
        return Ok(());
    };
    db.execute(&sql, Vec::new())
        .await
        .map_err(|e| MigrationError::swap(format!("{} failed: {}", sql, e)))?;
    info!(renames = mapping.len(), "Renamed tables");
    Ok(())
}
