use serde::Deserialize;

use crate::Config;
use crate::shared::{BackfillJobConfig, PgConnectionConfig, RepartitionConfig, ValidationError};

/// Top-level configuration for the migrator binary.
#[derive(Debug, Clone, Deserialize)]
pub struct MigratorConfig {
    /// Connection to the database holding source and destination tables.
    pub pg_connection: PgConnectionConfig,
    /// Backfill job settings shared by all migration tasks.
    pub job: BackfillJobConfig,
    /// Settings specific to the repartition task.
    #[serde(default)]
    pub repartition: RepartitionConfig,
}

impl MigratorConfig {
    /// Validates all nested configuration sections.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.job.validate()?;
        self.repartition.validate()?;

        Ok(())
    }
}

impl Config for MigratorConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}
