use std::path::PathBuf;

use pvestic_core::config;

pub(crate) fn run_config_generate(dest: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let path = PathBuf::from(dest.unwrap_or("pvestic.yaml"));

    if path.exists() {
        return Err(format!("file already exists: {}", path.display()).into());
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    std::fs::write(&path, config::minimal_config_template())?;
    println!("Config written to: {}", path.display());
    println!("Edit it to set your machines and the restic repository.");
    Ok(())
}
