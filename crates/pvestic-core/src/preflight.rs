use std::collections::HashMap;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use tracing::{info, warn};

use crate::config::Machine;
use crate::error::Result;
use crate::lvm;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Repository URL schemes restic resolves to remote backends. Anything else
/// is a plain filesystem path we can run a space check against.
const REMOTE_SCHEMES: &[&str] = &[
    "sftp:", "rest:", "s3:", "b2:", "azure:", "gs:", "swift:", "rclone:",
];

pub fn local_repo_path(repository: &str) -> Option<&Path> {
    if REMOTE_SCHEMES.iter().any(|s| repository.starts_with(s)) {
        None
    } else {
        Some(Path::new(repository))
    }
}

/// Outcome of the destination space check.
#[derive(Debug, Clone, Copy)]
pub struct SpaceCheck {
    pub required: u64,
    pub available: u64,
}

impl SpaceCheck {
    pub fn is_sufficient(&self) -> bool {
        self.available >= self.required
    }
}

/// Compare the summed logical sizes of every configured disk against the
/// free space of the destination filesystem.
pub fn check_space(dest: &Path, machines: &[Machine]) -> Result<SpaceCheck> {
    let sizes = lvm::lv_sizes()?;
    let required = required_bytes(machines, &sizes);
    let available = available_bytes(dest)?;
    info!("available space: {:.2} GiB", available as f64 / GIB);
    info!("required space for all machines: {:.2} GiB", required as f64 / GIB);
    Ok(SpaceCheck {
        required,
        available,
    })
}

pub fn has_sufficient_space(dest: &Path, machines: &[Machine]) -> Result<bool> {
    Ok(check_space(dest, machines)?.is_sufficient())
}

/// Sum of resolvable disk sizes. Disks missing from the volume map are
/// skipped with a warning, shrinking the requirement rather than failing.
fn required_bytes(machines: &[Machine], sizes: &HashMap<String, u64>) -> u64 {
    let mut total = 0u64;
    for machine in machines {
        for disk in &machine.disks {
            let name = match lvm::lv_name(Path::new(disk)) {
                Ok(n) => n,
                Err(_) => {
                    warn!("disk '{disk}' has no logical volume name, skipping");
                    continue;
                }
            };
            match sizes.get(name) {
                Some(bytes) => total += bytes,
                None => warn!("disk {disk} not found in the volume map, skipping"),
            }
        }
    }
    total
}

fn available_bytes(path: &Path) -> Result<u64> {
    let cpath = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(cpath.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
}
