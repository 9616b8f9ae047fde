use std::io::IsTerminal;

use pvestic_core::commands;
use pvestic_core::config::PvesticConfig;

use crate::format::generate_run_id;
use crate::progress::StreamProgressRenderer;

pub(crate) fn run_backup(config: &PvesticConfig) -> Result<(), Box<dyn std::error::Error>> {
    let run_id = generate_run_id();
    println!(
        "Starting backup run {run_id} ({} machines)",
        config.machines.len()
    );

    let show_progress = std::io::stderr().is_terminal();
    let result = if show_progress {
        let mut renderer = StreamProgressRenderer::new();
        let mut on_event = |event| renderer.on_event(event);
        let result = commands::backup::run_with_progress(config, &run_id, Some(&mut on_event));
        renderer.finish();
        result
    } else {
        commands::backup::run(config, &run_id)
    };

    result.map_err(|e| -> Box<dyn std::error::Error> { Box::new(e) })?;
    println!("Backup run {run_id} completed");
    Ok(())
}
