use comfy_table::Cell;

use pvestic_core::commands;
use pvestic_core::config::PvesticConfig;
use pvestic_core::restic::Restic;

use crate::table::data_table;

pub(crate) fn run_list(config: &PvesticConfig) -> Result<(), Box<dyn std::error::Error>> {
    let restic = Restic::from_config(&config.restic);
    let runs = commands::list::run(&restic)
        .map_err(|e| -> Box<dyn std::error::Error> { Box::new(e) })?;

    let mut table = data_table(&["Run", "Most recent backup"]);
    for entry in &runs {
        table.add_row(vec![
            Cell::new(entry.run_id.clone()),
            Cell::new(entry.time.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
        ]);
    }
    println!("{table}");
    Ok(())
}
