use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{info, warn};

use crate::error::{PvesticError, Result};

/// Changed-block headroom reserved for each copy-on-write snapshot. Fixed,
/// independent of the logical volume's own size.
pub const SNAPSHOT_HEADROOM_BYTES: u64 = 5 * 1024 * 1024 * 1024;
const SNAPSHOT_SIZE_ARG: &str = "5G";

/// Last path segment of a block device path, i.e. the logical volume name.
pub fn lv_name(disk: &Path) -> Result<&str> {
    disk.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PvesticError::Snapshot {
            device: disk.display().to_string(),
            message: "path has no logical volume name".to_string(),
        })
}

/// Snapshot device path for a disk: sibling of the disk, named `<lv>-snap`.
pub fn snapshot_device(disk: &Path) -> Result<PathBuf> {
    let name = lv_name(disk)?;
    let parent = disk.parent().unwrap_or_else(|| Path::new("/dev"));
    Ok(parent.join(format!("{name}-snap")))
}

fn run_lvm_tool(cmd: &mut Command, what: &str, device: &str) -> Result<Vec<u8>> {
    let output = cmd.output().map_err(|e| PvesticError::Snapshot {
        device: device.to_string(),
        message: format!("{what}: could not run {:?}: {e}", cmd.get_program()),
    })?;
    if !output.status.success() {
        let code = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PvesticError::Snapshot {
            device: device.to_string(),
            message: format!("{what} failed (exit code {code}): {}", stderr.trim()),
        });
    }
    Ok(output.stdout)
}

fn create_snapshot(disk: &Path, snap_name: &str) -> Result<()> {
    let device = disk.display().to_string();
    run_lvm_tool(
        Command::new("lvcreate")
            .arg("-s")
            .arg("-n")
            .arg(snap_name)
            .arg("-L")
            .arg(SNAPSHOT_SIZE_ARG)
            .arg(disk),
        "lvcreate",
        &device,
    )?;
    Ok(())
}

fn remove_snapshot(snapshot: &Path) -> Result<()> {
    let device = snapshot.display().to_string();
    run_lvm_tool(
        Command::new("lvremove").arg("-f").arg(snapshot),
        "lvremove",
        &device,
    )?;
    info!("snapshot {device} removed");
    Ok(())
}

/// Batched size query for all logical volumes on the host, in bytes.
pub fn lv_sizes() -> Result<HashMap<String, u64>> {
    let out = run_lvm_tool(
        Command::new("lvs")
            .arg("--noheadings")
            .arg("--units")
            .arg("b")
            .arg("--nosuffix")
            .arg("-o")
            .arg("lv_name,lv_size"),
        "lvs",
        "-",
    )?;
    Ok(parse_lv_sizes(&String::from_utf8_lossy(&out)))
}

fn parse_lv_sizes(out: &str) -> HashMap<String, u64> {
    let mut map = HashMap::new();
    for line in out.lines() {
        let mut fields = line.split_whitespace();
        let (Some(name), Some(size)) = (fields.next(), fields.next()) else {
            continue;
        };
        if fields.next().is_some() {
            continue;
        }
        match size.parse::<u64>() {
            Ok(bytes) => {
                map.insert(name.to_string(), bytes);
            }
            Err(e) => warn!("cannot parse size '{size}' for LV {name}: {e}"),
        }
    }
    map
}

/// Owns one copy-on-write snapshot from creation to removal.
///
/// The owning backup attempt must call [`release`](Self::release) (success
/// path, removal failure is the caller's error) or
/// [`release_after_failure`](Self::release_after_failure) (streaming already
/// failed, removal failure must not mask it). `Drop` is only a backstop for
/// early exits and logs instead of propagating.
pub struct SnapshotGuard {
    device: PathBuf,
    armed: bool,
}

impl SnapshotGuard {
    /// Create a snapshot for `disk`. A stale snapshot left at the
    /// conventional path by an earlier crash is removed first; failure to
    /// remove it is logged and ignored since creation may still succeed.
    pub fn acquire(disk: &Path) -> Result<SnapshotGuard> {
        let snapshot = snapshot_device(disk)?;
        if snapshot.exists() {
            warn!(
                "stale snapshot {} found, removing it before creating a new one",
                snapshot.display()
            );
            if let Err(e) = remove_snapshot(&snapshot) {
                warn!("could not remove stale snapshot: {e}");
            }
        }

        let snap_name = lv_name(&snapshot)?.to_string();
        create_snapshot(disk, &snap_name)?;
        info!("created snapshot {} for {}", snapshot.display(), disk.display());

        Ok(SnapshotGuard {
            device: snapshot,
            armed: true,
        })
    }

    /// The snapshot's block device path.
    pub fn device(&self) -> &Path {
        &self.device
    }

    /// Remove the snapshot. Failure here fails the disk backup.
    pub fn release(mut self) -> Result<()> {
        self.armed = false;
        remove_snapshot(&self.device)
    }

    /// Best-effort removal after the streaming step already failed. Removal
    /// failure is logged so the streaming error stays the primary one.
    pub fn release_after_failure(mut self) {
        self.armed = false;
        if let Err(e) = remove_snapshot(&self.device) {
            warn!("cleanup of snapshot {} failed: {e}", self.device.display());
        }
    }
}

impl Drop for SnapshotGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(
            "snapshot {} was not explicitly released, removing it",
            self.device.display()
        );
        if let Err(e) = remove_snapshot(&self.device) {
            warn!("could not remove snapshot {}: {e}", self.device.display());
        }
    }
}
