use std::collections::HashMap;
use std::path::Path;

use tracing::{info, warn};

use crate::config::{Machine, PvesticConfig};
use crate::error::{PvesticError, Result};
use crate::lvm::{self, SnapshotGuard};
use crate::preflight;
use crate::restic::{EngineEvent, Restic};

/// Progress notifications for one backup run, consumed by the CLI renderer.
#[derive(Debug, Clone)]
pub enum BackupProgressEvent {
    EntryStarted {
        dest_file: String,
        total_bytes: Option<u64>,
    },
    BytesTransferred {
        bytes_done: f64,
    },
    EntryFinished,
}

type ProgressFn<'a> = Option<&'a mut dyn FnMut(BackupProgressEvent)>;

#[derive(Clone, Copy)]
enum EntryKind {
    Disk,
    Config,
}

impl EntryKind {
    fn as_str(self) -> &'static str {
        match self {
            EntryKind::Disk => "disk",
            EntryKind::Config => "config",
        }
    }
}

pub fn run(config: &PvesticConfig, run_id: &str) -> Result<()> {
    run_with_progress(config, run_id, None)
}

/// Run one backup across all configured machines.
///
/// Fail-fast: the first disk or config entry that fails aborts the rest of
/// the run. Snapshots are always released before the error propagates.
pub fn run_with_progress(
    config: &PvesticConfig,
    run_id: &str,
    mut progress: ProgressFn<'_>,
) -> Result<()> {
    if config.machines.is_empty() {
        return Err(PvesticError::Config("no machines configured".to_string()));
    }

    let restic = Restic::from_config(&config.restic);

    info!("checking restic repository");
    restic.probe()?;

    // Direct streaming has no local destination to fill up; the space check
    // only applies when the repository itself is a local path.
    if let Some(dir) = config
        .restic
        .repository
        .as_deref()
        .and_then(preflight::local_repo_path)
    {
        let check = preflight::check_space(dir, &config.machines)?;
        if !check.is_sufficient() {
            return Err(PvesticError::InsufficientSpace {
                required: check.required,
                available: check.available,
            });
        }
    }

    let sizes = lvm::lv_sizes().unwrap_or_else(|e| {
        warn!("could not query volume sizes, progress totals will use the snapshot headroom: {e}");
        HashMap::new()
    });
    let date = chrono::Local::now().format("%Y-%m-%d").to_string();

    for machine in &config.machines {
        backup_machine(&restic, machine, run_id, &date, &sizes, &mut progress).map_err(|e| {
            PvesticError::Machine {
                id: machine.id,
                name: machine.name.clone(),
                source: Box::new(e),
            }
        })?;
    }

    info!("backup run {run_id} completed");
    Ok(())
}

fn backup_machine(
    restic: &Restic,
    machine: &Machine,
    run_id: &str,
    date: &str,
    sizes: &HashMap<String, u64>,
    progress: &mut ProgressFn<'_>,
) -> Result<()> {
    info!("starting backup for machine {} ({})", machine.id, machine.name);
    for disk in &machine.disks {
        backup_disk(restic, machine, disk, run_id, date, sizes, progress)?;
    }
    backup_definition(restic, machine, run_id, date, progress)?;
    Ok(())
}

fn backup_disk(
    restic: &Restic,
    machine: &Machine,
    disk: &str,
    run_id: &str,
    date: &str,
    sizes: &HashMap<String, u64>,
    progress: &mut ProgressFn<'_>,
) -> Result<()> {
    let disk_path = Path::new(disk);
    let lv = lvm::lv_name(disk_path)?;
    let total = sizes
        .get(lv)
        .copied()
        .unwrap_or(lvm::SNAPSHOT_HEADROOM_BYTES);
    let dest_file = format!("{}/{lv}.raw", machine.archive_dir());
    let tags = entry_tags(machine, run_id, date, EntryKind::Disk, disk, &dest_file);

    let guard = SnapshotGuard::acquire(disk_path)?;

    emit(
        progress,
        BackupProgressEvent::EntryStarted {
            dest_file: dest_file.clone(),
            total_bytes: Some(total),
        },
    );
    let streamed = stream_entry(restic, guard.device(), &dest_file, &tags, progress);
    emit(progress, BackupProgressEvent::EntryFinished);

    match streamed {
        Ok(()) => {
            info!("disk {disk} backed up as {dest_file}");
            guard.release()
        }
        Err(e) => {
            guard.release_after_failure();
            Err(e)
        }
    }
}

fn backup_definition(
    restic: &Restic,
    machine: &Machine,
    run_id: &str,
    date: &str,
    progress: &mut ProgressFn<'_>,
) -> Result<()> {
    let src = machine.definition_path();
    if !src.exists() {
        warn!("machine definition {} not found, skipping", src.display());
        return Ok(());
    }

    let total = std::fs::metadata(&src).map(|m| m.len()).ok();
    let dest_file = format!("{}/config", machine.archive_dir());
    let src_str = src.display().to_string();
    let tags = entry_tags(machine, run_id, date, EntryKind::Config, &src_str, &dest_file);

    emit(
        progress,
        BackupProgressEvent::EntryStarted {
            dest_file: dest_file.clone(),
            total_bytes: total,
        },
    );
    let streamed = stream_entry(restic, &src, &dest_file, &tags, progress);
    emit(progress, BackupProgressEvent::EntryFinished);

    if streamed.is_ok() {
        info!("machine definition stored as {dest_file}");
    }
    streamed
}

fn stream_entry(
    restic: &Restic,
    source: &Path,
    dest_file: &str,
    tags: &[(String, String)],
    progress: &mut ProgressFn<'_>,
) -> Result<()> {
    restic.stream_backup(source, dest_file, tags, &mut |event| {
        if let EngineEvent::Progress { bytes_done } = event {
            emit(
                progress,
                BackupProgressEvent::BytesTransferred {
                    bytes_done: *bytes_done,
                },
            );
        }
    })
}

fn emit(progress: &mut ProgressFn<'_>, event: BackupProgressEvent) {
    if let Some(callback) = progress.as_mut() {
        callback(event);
    }
}

fn entry_tags(
    machine: &Machine,
    run_id: &str,
    date: &str,
    kind: EntryKind,
    src_file: &str,
    dest_file: &str,
) -> Vec<(String, String)> {
    vec![
        ("id".to_string(), run_id.to_string()),
        ("vm".to_string(), machine.id.to_string()),
        ("name".to_string(), machine.name.clone()),
        ("type".to_string(), kind.as_str().to_string()),
        ("vmtype".to_string(), machine.kind.as_str().to_string()),
        ("date".to_string(), date.to_string()),
        ("srcFile".to_string(), src_file.to_string()),
        ("destFile".to_string(), dest_file.to_string()),
    ]
}
