use pvestic_core::commands;
use pvestic_core::config::PvesticConfig;
use pvestic_core::restic::Restic;

use crate::format::format_bytes;
use crate::table::{add_kv_row, kv_table};

pub(crate) fn run_status(config: &PvesticConfig) -> Result<(), Box<dyn std::error::Error>> {
    let restic = Restic::from_config(&config.restic);
    let report = commands::status::run(&restic)
        .map_err(|e| -> Box<dyn std::error::Error> { Box::new(e) })?;

    let mut stats = kv_table();
    add_kv_row(&mut stats, "Size", format_bytes(report.stats.total_size));
    add_kv_row(
        &mut stats,
        "Uncompressed",
        format_bytes(report.stats.total_uncompressed_size),
    );
    add_kv_row(
        &mut stats,
        "Ratio",
        format!("{:.2}x", report.stats.compression_ratio),
    );
    add_kv_row(&mut stats, "Blobs", report.stats.total_blob_count);
    add_kv_row(&mut stats, "Snapshots", report.stats.snapshots_count);
    println!("{stats}");
    println!();

    println!("Backup run: {}", report.run_id);
    println!();
    for group in &report.machines {
        println!("- {} ({})", group.name, group.id);
        println!(
            "    Most recent: {}",
            group.last_backup.format("%Y-%m-%d %H:%M:%S UTC")
        );
        if group.source_files.is_empty() {
            println!("    No source files recorded");
        } else {
            println!("    Source files:");
            for file in &group.source_files {
                println!("      - {file}");
            }
        }
        println!();
    }
    Ok(())
}
