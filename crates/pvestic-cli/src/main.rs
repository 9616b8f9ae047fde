mod cli;
mod cmd;
mod config_gen;
mod format;
mod progress;
mod table;

use clap::Parser;

use pvestic_core::config;

use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Handle `config` early — no config file needed
    if let Commands::Config { dest } = &cli.command {
        if let Err(e) = config_gen::run_config_generate(dest.as_deref()) {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
        return;
    }

    let source = match config::resolve_config_path(cli.config.as_deref()) {
        Some(s) => s,
        None => {
            eprintln!("Error: no configuration file found.");
            eprintln!("Searched:");
            for (path, level) in config::default_config_search_paths() {
                eprintln!("  {} ({})", path.display(), level);
            }
            eprintln!();
            eprintln!("Run `pvestic config` to generate a starter config file.");
            std::process::exit(1);
        }
    };

    tracing::info!("Using config: {source}");

    let config = match config::load_config(source.path()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let result = match &cli.command {
        Commands::Backup => cmd::backup::run_backup(&config),
        Commands::List => cmd::list::run_list(&config),
        Commands::Status => cmd::status::run_status(&config),
        Commands::Restic { args } => cmd::restic::run_restic(&config, args),
        // Handled above, before config resolution.
        Commands::Config { .. } => Ok(()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
