use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::{PvesticError, Result};
use crate::restic::{tag_value, Restic, Snapshot};

/// One backup run, reconstructed from the `id` tags of stored snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct RunEntry {
    pub run_id: String,
    /// Most recent entry time seen within the run.
    pub time: DateTime<Utc>,
}

/// List all runs recorded in the repository, most recent first.
pub fn run(restic: &Restic) -> Result<Vec<RunEntry>> {
    let snapshots = restic.snapshots()?;
    let runs = collect_runs(&snapshots);
    if runs.is_empty() {
        return Err(PvesticError::NoBackups);
    }
    Ok(runs)
}

fn collect_runs(snapshots: &[Snapshot]) -> Vec<RunEntry> {
    let mut newest: BTreeMap<&str, DateTime<Utc>> = BTreeMap::new();
    for snap in snapshots {
        let Some(run_id) = tag_value(&snap.tags, "id") else {
            continue;
        };
        let entry = newest.entry(run_id).or_insert(snap.time);
        if snap.time > *entry {
            *entry = snap.time;
        }
    }

    let mut runs: Vec<RunEntry> = newest
        .into_iter()
        .map(|(run_id, time)| RunEntry {
            run_id: run_id.to_string(),
            time,
        })
        .collect();
    runs.sort_by(|a, b| b.time.cmp(&a.time));
    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(time: &str, tags: &[&str]) -> Snapshot {
        serde_json::from_value(serde_json::json!({
            "id": "cafe",
            "time": time,
            "tags": tags,
        }))
        .unwrap()
    }

    #[test]
    fn runs_are_keyed_by_id_tag_with_newest_time() {
        let snaps = vec![
            snap("2026-08-01T01:00:00Z", &["id=ab12", "vm=1"]),
            snap("2026-08-01T02:00:00Z", &["id=ab12", "vm=2"]),
            snap("2026-08-02T01:00:00Z", &["id=cd34", "vm=1"]),
        ];
        let runs = collect_runs(&snaps);
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_id, "cd34");
        assert_eq!(runs[1].run_id, "ab12");
        assert_eq!(
            runs[1].time,
            "2026-08-01T02:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[test]
    fn untagged_snapshots_are_skipped() {
        let snaps = vec![
            snap("2026-08-01T01:00:00Z", &[]),
            snap("2026-08-01T02:00:00Z", &["name=web"]),
        ];
        assert!(collect_runs(&snaps).is_empty());
    }

    #[test]
    fn listing_is_idempotent() {
        let snaps = vec![
            snap("2026-08-01T01:00:00Z", &["id=ab12"]),
            snap("2026-08-02T01:00:00Z", &["id=cd34"]),
            snap("2026-08-03T01:00:00Z", &["id=ef56"]),
        ];
        let first = collect_runs(&snaps);
        let second = collect_runs(&snaps);
        assert_eq!(first, second);
    }
}
