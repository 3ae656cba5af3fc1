//! JSON audit log of subscription point grants.
//!
//! The file holds one pretty-printed JSON array and is rewritten on every
//! append. It is not locked; a single scheduler task is the only writer.

use crate::errors::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// One user receiving points from one subscription config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionLogEntry {
    /// Tick time
    pub timestamp: DateTime<Utc>,
    /// Config that fired
    pub subscription_config_id: i64,
    /// Config name at the time
    pub subscription_config_name: String,
    /// Group through which the user was reached
    pub target_group_id: i64,
    /// Group name at the time
    pub target_group_name: String,
    /// Receiving user
    pub user_id: i64,
    /// Receiving user name
    pub username: String,
    /// Points granted
    pub points_distributed: i64,
    /// Balance before the grant
    pub balance_before: i64,
    /// Balance after the grant
    pub balance_after: i64,
}

fn read_array(path: &Path) -> Result<Vec<Value>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let contents = std::fs::read_to_string(path)?;
    match serde_json::from_str::<Value>(&contents) {
        Ok(Value::Array(entries)) => Ok(entries),
        Ok(_) => {
            tracing::warn!(
                "Distribution log {:?} does not hold a JSON list, starting a fresh one",
                path
            );
            Ok(Vec::new())
        }
        Err(e) => {
            tracing::warn!(
                "Distribution log {:?} is not valid JSON ({}), starting a fresh one",
                path,
                e
            );
            Ok(Vec::new())
        }
    }
}

/// Appends entries to the log file, creating it and its directory if needed.
pub fn append_entries(path: &Path, entries: &[DistributionLogEntry]) -> Result<()> {
    if entries.is_empty() {
        return Ok(());
    }

    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }

    let mut all = read_array(path)?;
    for entry in entries {
        all.push(serde_json::to_value(entry)?);
    }

    std::fs::write(path, serde_json::to_string_pretty(&all)?)?;
    tracing::info!("Wrote {} entries to distribution log {:?}", entries.len(), path);
    Ok(())
}

/// Reads the log back, newest entries last. Entries that no longer parse are skipped.
pub fn read_entries(path: &Path) -> Result<Vec<DistributionLogEntry>> {
    Ok(read_array(path)?
        .into_iter()
        .filter_map(|value| serde_json::from_value(value).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    fn entry(user_id: i64) -> DistributionLogEntry {
        DistributionLogEntry {
            timestamp: Utc::now(),
            subscription_config_id: 1,
            subscription_config_name: "Monthly".to_string(),
            target_group_id: 2,
            target_group_name: "VIP".to_string(),
            user_id,
            username: format!("user{user_id}"),
            points_distributed: 100,
            balance_before: 5,
            balance_after: 105,
        }
    }

    #[test]
    fn test_append_creates_and_extends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("points_distribution.json");

        append_entries(&path, &[entry(1)]).unwrap();
        append_entries(&path, &[entry(2), entry(3)]).unwrap();

        let entries = read_entries(&path).unwrap();
        let users: Vec<i64> = entries.iter().map(|e| e.user_id).collect();
        assert_eq!(users, vec![1, 2, 3]);
    }

    #[test]
    fn test_malformed_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.json");
        std::fs::write(&path, "{\"not\": \"a list\"}").unwrap();

        append_entries(&path, &[entry(7)]).unwrap();
        assert_eq!(read_entries(&path).unwrap().len(), 1);

        std::fs::write(&path, "garbage").unwrap();
        assert!(read_entries(&path).unwrap().is_empty());
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_entries(&dir.path().join("absent.json")).unwrap().is_empty());
    }
}
