use backfill_config::load_config;
use backfill_config::shared::MigratorConfig;

use crate::error::MigratorResult;

/// Loads and validates the migrator configuration.
///
/// Uses the layered configuration loading from [`backfill_config`] and
/// validates the resulting [`MigratorConfig`] before returning it.
pub fn load_migrator_config() -> MigratorResult<MigratorConfig> {
    let config = load_config::<MigratorConfig>()?;
    config.validate()?;

    Ok(config)
}
