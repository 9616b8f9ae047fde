use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::{PvesticError, Result};
use crate::restic::{tag_value, RepoStats, Restic, Snapshot};

/// Entries of the current run that belong to one machine.
#[derive(Debug, Clone)]
pub struct MachineGroup {
    pub id: u32,
    pub name: String,
    pub last_backup: DateTime<Utc>,
    /// Distinct, sorted source paths contributing to the run.
    pub source_files: Vec<String>,
}

pub struct StatusReport {
    pub stats: RepoStats,
    pub run_id: String,
    pub machines: Vec<MachineGroup>,
}

/// Summarize the most recent backup run: repository stats plus a per-machine
/// view of the run's entries. Read-only.
pub fn run(restic: &Restic) -> Result<StatusReport> {
    let stats = restic.stats()?;
    let snapshots = restic.snapshots()?;

    let run_id = newest_run_id(&snapshots).ok_or(PvesticError::NoBackups)?;
    let members: Vec<&Snapshot> = snapshots
        .iter()
        .filter(|s| tag_value(&s.tags, "id") == Some(run_id.as_str()))
        .collect();
    let machines = group_by_machine(&members);

    Ok(StatusReport {
        stats,
        run_id,
        machines,
    })
}

/// Run id of the single most recent snapshot. On an exact timestamp tie the
/// later entry in restic's returned order wins.
fn newest_run_id(snapshots: &[Snapshot]) -> Option<String> {
    snapshots
        .iter()
        .max_by_key(|s| s.time)
        .and_then(|s| tag_value(&s.tags, "id"))
        .map(str::to_string)
}

fn group_by_machine(members: &[&Snapshot]) -> Vec<MachineGroup> {
    let mut groups: BTreeMap<u32, MachineGroup> = BTreeMap::new();

    for snap in members {
        let Some(vm) = tag_value(&snap.tags, "vm").and_then(|v| v.parse::<u32>().ok()) else {
            warn!("snapshot {} has no usable 'vm' tag, skipping", snap.id);
            continue;
        };

        let group = groups.entry(vm).or_insert_with(|| MachineGroup {
            id: vm,
            name: String::new(),
            last_backup: snap.time,
            source_files: Vec::new(),
        });
        if snap.time > group.last_backup {
            group.last_backup = snap.time;
        }
        if group.name.is_empty() {
            if let Some(name) = tag_value(&snap.tags, "name") {
                group.name = name.to_string();
            }
        }
        if let Some(src) = tag_value(&snap.tags, "srcFile") {
            if !group.source_files.iter().any(|s| s == src) {
                group.source_files.push(src.to_string());
            }
        }
    }

    let mut out: Vec<MachineGroup> = groups.into_values().collect();
    for group in &mut out {
        group.source_files.sort();
    }
    out
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
    fn newest_snapshot_selects_the_current_run() {
        // Three entries under ab12, two newer ones under cd34.
        let snaps = vec![
            snap("2026-08-01T01:00:00Z", &["id=ab12", "vm=7", "name=web"]),
            snap("2026-08-01T01:05:00Z", &["id=ab12", "vm=7", "name=web"]),
            snap("2026-08-01T01:10:00Z", &["id=ab12", "vm=7", "name=web"]),
            snap("2026-08-02T01:00:00Z", &["id=cd34", "vm=7", "name=web", "srcFile=/dev/pve/data"]),
            snap("2026-08-02T01:05:00Z", &["id=cd34", "vm=7", "name=web", "srcFile=/dev/pve/logs"]),
        ];
        let run_id = newest_run_id(&snaps).unwrap();
        assert_eq!(run_id, "cd34");

        let members: Vec<&Snapshot> = snaps
            .iter()
            .filter(|s| tag_value(&s.tags, "id") == Some("cd34"))
            .collect();
        let groups = group_by_machine(&members);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].id, 7);
        assert_eq!(groups[0].name, "web");
        assert_eq!(
            groups[0].source_files,
            vec!["/dev/pve/data", "/dev/pve/logs"]
        );
    }

    #[test]
    fn one_group_per_machine_in_the_current_run() {
        let snaps = vec![
            snap("2026-08-01T01:00:00Z", &["id=old0", "vm=1", "name=a"]),
            snap("2026-08-02T01:00:00Z", &["id=run1", "vm=1", "name=a"]),
            snap("2026-08-02T01:01:00Z", &["id=run1", "vm=2", "name=b"]),
        ];
        let run_id = newest_run_id(&snaps).unwrap();
        assert_eq!(run_id, "run1");
        let members: Vec<&Snapshot> = snaps
            .iter()
            .filter(|s| tag_value(&s.tags, "id") == Some("run1"))
            .collect();
        let groups = group_by_machine(&members);
        let ids: Vec<u32> = groups.iter().map(|g| g.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn timestamp_tie_lets_the_later_entry_win() {
        let snaps = vec![
            snap("2026-08-02T01:00:00Z", &["id=first"]),
            snap("2026-08-02T01:00:00Z", &["id=second"]),
        ];
        assert_eq!(newest_run_id(&snaps).as_deref(), Some("second"));
    }

    #[test]
    fn missing_vm_tags_are_dropped_from_grouping() {
        let snaps = vec![
            snap("2026-08-02T01:00:00Z", &["id=run1", "vm=7", "name=web"]),
            snap("2026-08-02T01:01:00Z", &["id=run1", "name=orphan"]),
            snap("2026-08-02T01:02:00Z", &["id=run1", "vm=notanumber"]),
        ];
        let members: Vec<&Snapshot> = snaps.iter().collect();
        let groups = group_by_machine(&members);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].id, 7);
    }

    #[test]
    fn group_keeps_the_newest_time() {
        let snaps = vec![
            snap("2026-08-02T01:05:00Z", &["id=run1", "vm=7"]),
            snap("2026-08-02T01:00:00Z", &["id=run1", "vm=7"]),
        ];
        let members: Vec<&Snapshot> = snaps.iter().collect();
        let groups = group_by_machine(&members);
        assert_eq!(
            groups[0].last_backup,
            "2026-08-02T01:05:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[test]
    fn untagged_repository_yields_no_run() {
        let snaps = vec![snap("2026-08-02T01:00:00Z", &["vm=7"])];
        assert!(newest_run_id(&snaps).is_none());
    }
}
