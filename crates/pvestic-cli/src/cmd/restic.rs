use pvestic_core::config::PvesticConfig;
use pvestic_core::restic::Restic;

pub(crate) fn run_restic(
    config: &PvesticConfig,
    args: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let restic = Restic::from_config(&config.restic);
    restic
        .run_passthrough(args)
        .map_err(|e| -> Box<dyn std::error::Error> { Box::new(e) })
}
