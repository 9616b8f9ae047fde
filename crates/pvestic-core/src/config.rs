use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PvesticConfig {
    #[serde(default)]
    pub machines: Vec<Machine>,
    #[serde(default)]
    pub restic: ResticConfig,
}

/// One virtual machine or container to back up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub kind: MachineKind,
    /// Block device paths of the machine's logical volumes.
    #[serde(default)]
    pub disks: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineKind {
    Vm,
    #[default]
    Lxc,
}

impl MachineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MachineKind::Vm => "vm",
            MachineKind::Lxc => "lxc",
        }
    }
}

impl fmt::Display for MachineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Machine {
    /// Logical directory inside the repository that holds this machine's
    /// entries, e.g. `vm-100` or `lxc-7`.
    pub fn archive_dir(&self) -> String {
        format!("{}-{}", self.kind, self.id)
    }

    /// Location of the machine definition on a Proxmox host. VM and
    /// container definitions live in different trees.
    pub fn definition_path(&self) -> PathBuf {
        match self.kind {
            MachineKind::Vm => PathBuf::from(format!("/etc/pve/qemu-server/{}.conf", self.id)),
            MachineKind::Lxc => PathBuf::from(format!("/etc/pve/lxc/{}.conf", self.id)),
        }
    }
}

/// Connection parameters for the restic repository. `repository` and
/// `password` map to `RESTIC_REPOSITORY`/`RESTIC_PASSWORD`; `env` allows
/// arbitrary extra variables (cloud credentials, `RESTIC_PASSWORD_FILE`, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResticConfig {
    pub repository: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

// --- Config resolution ---

/// Tracks where the config file was found.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// Explicitly passed via `--config`.
    CliArg(PathBuf),
    /// Set via the `PVESTIC_CONFIG` env var.
    EnvVar(PathBuf),
    /// Found by searching standard locations.
    SearchOrder { path: PathBuf, level: &'static str },
}

impl ConfigSource {
    pub fn path(&self) -> &Path {
        match self {
            ConfigSource::CliArg(p) => p,
            ConfigSource::EnvVar(p) => p,
            ConfigSource::SearchOrder { path, .. } => path,
        }
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::CliArg(p) => write!(f, "{} (--config)", p.display()),
            ConfigSource::EnvVar(p) => write!(f, "{} (PVESTIC_CONFIG)", p.display()),
            ConfigSource::SearchOrder { path, level } => {
                write!(f, "{} ({})", path.display(), level)
            }
        }
    }
}

/// Returns search locations in priority order: project, user, system.
pub fn default_config_search_paths() -> Vec<(PathBuf, &'static str)> {
    let mut paths = vec![(PathBuf::from("pvestic.yaml"), "project")];

    let user_config = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .filter(|p| p.is_absolute())
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .map(|base| base.join("pvestic").join("config.yaml"));

    if let Some(p) = user_config {
        paths.push((p, "user"));
    }

    paths.push((PathBuf::from("/etc/pvestic/config.yaml"), "system"));

    paths
}

/// Resolve which config file to use.
///
/// Priority: CLI arg > `PVESTIC_CONFIG` env var > first existing file from
/// the search paths. Returns `None` if nothing is found.
pub fn resolve_config_path(cli_config: Option<&str>) -> Option<ConfigSource> {
    if let Some(path) = cli_config {
        return Some(ConfigSource::CliArg(PathBuf::from(path)));
    }

    if let Ok(val) = std::env::var("PVESTIC_CONFIG") {
        if !val.is_empty() {
            return Some(ConfigSource::EnvVar(PathBuf::from(val)));
        }
    }

    for (path, level) in default_config_search_paths() {
        if path.exists() {
            return Some(ConfigSource::SearchOrder { path, level });
        }
    }

    None
}

/// Load and parse a config file.
pub fn load_config(path: &Path) -> crate::error::Result<PvesticConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        crate::error::PvesticError::Config(format!("cannot read '{}': {e}", path.display()))
    })?;
    let config: PvesticConfig = serde_yaml::from_str(&contents).map_err(|e| {
        crate::error::PvesticError::Config(format!("invalid config '{}': {e}", path.display()))
    })?;
    Ok(config)
}

/// Returns a minimal YAML config template suitable for bootstrapping.
pub fn minimal_config_template() -> &'static str {
    r#"# pvestic configuration file

machines:
  - id: 100
    name: web
    kind: vm
    disks:
      - /dev/pve/vm-100-disk-0
  # - id: 101
  #   name: db
  #   kind: lxc
  #   disks:
  #     - /dev/pve/vm-101-disk-0

restic:
  repository: /mnt/backup/restic
  password: secret
  # Extra variables for every restic invocation (cloud credentials etc.):
  # env:
  #   AWS_ACCESS_KEY_ID: ...
  #   AWS_SECRET_ACCESS_KEY: ...
"#
}
