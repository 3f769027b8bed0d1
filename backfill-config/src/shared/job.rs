use serde::Deserialize;

use crate::shared::ValidationError;

/// Configuration for a backfill job.
///
/// Contains the settings shared by every migration task: how many workers run
/// concurrently, how large each chunk is, and how often progress is reported.
#[derive(Debug, Clone, Deserialize)]
pub struct BackfillJobConfig {
    /// The unique identifier for this job.
    ///
    /// The job id isolates checkpoint records between jobs, so two migrations
    /// can run against the same database without clobbering each other's
    /// resume state.
    pub id: u64,
    /// Number of keys processed by a single statement execution.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Maximum number of range workers running at the same time.
    ///
    /// Each worker holds one database connection for the duration of its
    /// sub-range, so this also bounds the source connection pool.
    #[serde(default = "default_max_workers")]
    pub max_workers: u16,
    /// Milliseconds between progress reports.
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
}

impl BackfillJobConfig {
    /// Default number of keys per chunk.
    pub const DEFAULT_CHUNK_SIZE: u64 = 10_000;

    /// Default number of concurrent range workers.
    pub const DEFAULT_MAX_WORKERS: u16 = 16;

    /// Default interval between progress reports.
    pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 10_000;

    /// Validates job configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        // Checkpoint records store the job id in a Postgres BIGINT column.
        if self.id > i64::MAX as u64 {
            return Err(ValidationError::InvalidFieldValue {
                field: "job.id",
                constraint: "must fit in a signed 64-bit integer",
            });
        }

        if self.chunk_size == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "job.chunk_size",
                constraint: "must be greater than 0",
            });
        }

        if self.max_workers == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "job.max_workers",
                constraint: "must be greater than 0",
            });
        }

        if self.progress_interval_ms == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "job.progress_interval_ms",
                constraint: "must be greater than 0",
            });
        }

        Ok(())
    }
}

fn default_chunk_size() -> u64 {
    BackfillJobConfig::DEFAULT_CHUNK_SIZE
}

fn default_max_workers() -> u16 {
    BackfillJobConfig::DEFAULT_MAX_WORKERS
}

fn default_progress_interval_ms() -> u64 {
    BackfillJobConfig::DEFAULT_PROGRESS_INTERVAL_MS
}

/// Configuration for the repartition migration task.
#[derive(Debug, Clone, Deserialize)]
pub struct RepartitionConfig {
    /// Number of keys held by each destination partition table.
    #[serde(default = "default_partition_size")]
    pub partition_size: u64,
}

impl RepartitionConfig {
    /// Default partition width, matching the production table layout.
    pub const DEFAULT_PARTITION_SIZE: u64 = 10_000_000;

    /// Validates repartition configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.partition_size == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "repartition.partition_size",
                constraint: "must be greater than 0",
            });
        }

        Ok(())
    }
}

impl Default for RepartitionConfig {
    fn default() -> Self {
        Self {
            partition_size: default_partition_size(),
        }
    }
}

fn default_partition_size() -> u64 {
    RepartitionConfig::DEFAULT_PARTITION_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_config() -> BackfillJobConfig {
        BackfillJobConfig {
            id: 1,
            chunk_size: BackfillJobConfig::DEFAULT_CHUNK_SIZE,
            max_workers: BackfillJobConfig::DEFAULT_MAX_WORKERS,
            progress_interval_ms: BackfillJobConfig::DEFAULT_PROGRESS_INTERVAL_MS,
        }
    }

    #[test]
    fn job_config_defaults_validate() {
        assert!(job_config().validate().is_ok());
    }

    #[test]
    fn job_config_rejects_zero_chunk_size() {
        let mut config = job_config();
        config.chunk_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn job_config_rejects_id_beyond_bigint() {
        let mut config = job_config();
        config.id = i64::MAX as u64;
        assert!(config.validate().is_ok());

        config.id = i64::MAX as u64 + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn job_config_rejects_zero_workers() {
        let mut config = job_config();
        config.max_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn repartition_config_rejects_zero_partition_size() {
        let config = RepartitionConfig { partition_size: 0 };
        assert!(config.validate().is_err());
    }
}
