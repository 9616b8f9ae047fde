use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "pvestic",
    version,
    about = "Streaming LVM snapshot backups for Proxmox hosts, stored in restic",
    after_help = "\
Configuration file lookup order:
  1. --config <path>             (explicit flag)
  2. $PVESTIC_CONFIG             (environment variable)
  3. ./pvestic.yaml              (project)
  4. ~/.config/pvestic/config.yaml (user, honors XDG_CONFIG_HOME)
  5. /etc/pvestic/config.yaml    (system)

Environment variables:
  PVESTIC_CONFIG    Path to configuration file (overrides default search)"
)]
pub(crate) struct Cli {
    /// Path to configuration file (overrides PVESTIC_CONFIG and default search)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Snapshot every configured machine and stream the images into restic
    Backup,

    /// List backup runs recorded in the repository
    List,

    /// Show repository statistics and the most recent run per machine
    Status,

    /// Run a raw restic command with the configured repository environment
    Restic {
        /// Arguments passed through to restic
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        args: Vec<String>,
    },

    /// Generate a minimal configuration file
    Config {
        /// Destination path (default: ./pvestic.yaml)
        #[arg(short, long)]
        dest: Option<String>,
    },
}
