use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use std::sync::LazyLock;

/// Common Postgres session settings shared by all backfill connection profiles.
const COMMON_DATESTYLE: &str = "ISO";
const COMMON_CLIENT_ENCODING: &str = "UTF8";
const COMMON_TIMEZONE: &str = "UTC";

const APP_NAME_CHUNKS: &str = "backfill_chunks";
const APP_NAME_CHECKPOINTS: &str = "backfill_checkpoints";
const APP_NAME_ADMIN: &str = "backfill_admin";

/// Session options for chunk-processing connections.
///
/// Chunk statements are bulk inserts over large key ranges, so no statement
/// timeout is imposed. Lock waits are bounded to fail fast when a migration
/// collides with concurrent DDL.
pub static BACKFILL_CHUNK_OPTIONS: LazyLock<PgConnectionOptions> =
    LazyLock::new(|| PgConnectionOptions {
        statement_timeout: 0,
        lock_timeout: 30_000,
        idle_in_transaction_session_timeout: 0,
        application_name: APP_NAME_CHUNKS.to_string(),
    });

/// Session options for checkpoint-store connections.
///
/// Checkpoint writes are single-row upserts and should fail fast.
pub static BACKFILL_CHECKPOINT_OPTIONS: LazyLock<PgConnectionOptions> =
    LazyLock::new(|| PgConnectionOptions {
        statement_timeout: 30_000,
        lock_timeout: 10_000,
        idle_in_transaction_session_timeout: 60_000,
        application_name: APP_NAME_CHECKPOINTS.to_string(),
    });

/// Session options for administrative DDL connections.
///
/// Partition attach and index builds may legitimately run for a long time;
/// only lock acquisition is bounded.
pub static BACKFILL_ADMIN_OPTIONS: LazyLock<PgConnectionOptions> =
    LazyLock::new(|| PgConnectionOptions {
        statement_timeout: 0,
        lock_timeout: 60_000,
        idle_in_transaction_session_timeout: 0,
        application_name: APP_NAME_ADMIN.to_string(),
    });

/// Per-session Postgres options applied on top of a connection config.
#[derive(Debug, Clone)]
pub struct PgConnectionOptions {
    /// Statement timeout in milliseconds, 0 disables the timeout.
    pub statement_timeout: u32,
    /// Lock acquisition timeout in milliseconds, 0 disables the timeout.
    pub lock_timeout: u32,
    /// Idle-in-transaction timeout in milliseconds, 0 disables the timeout.
    pub idle_in_transaction_session_timeout: u32,
    /// `application_name` reported to the server for this session.
    pub application_name: String,
}

impl PgConnectionOptions {
    /// Returns the options as key/value pairs for the startup packet.
    pub fn to_key_value_pairs(&self) -> Vec<(String, String)> {
        vec![
            ("datestyle".to_string(), COMMON_DATESTYLE.to_string()),
            (
                "client_encoding".to_string(),
                COMMON_CLIENT_ENCODING.to_string(),
            ),
            ("timezone".to_string(), COMMON_TIMEZONE.to_string()),
            (
                "statement_timeout".to_string(),
                self.statement_timeout.to_string(),
            ),
            ("lock_timeout".to_string(), self.lock_timeout.to_string()),
            (
                "idle_in_transaction_session_timeout".to_string(),
                self.idle_in_transaction_session_timeout.to_string(),
            ),
            (
                "application_name".to_string(),
                self.application_name.clone(),
            ),
        ]
    }
}

/// Connection settings for the Postgres database holding the indexed tables.
///
/// This intentionally does not implement `Serialize` to avoid accidentally
/// leaking the password into serialized forms.
#[derive(Debug, Clone, Deserialize)]
pub struct PgConnectionConfig {
    /// Host on which Postgres is running.
    pub host: String,
    /// Port on which Postgres is listening.
    pub port: u16,
    /// Name of the database.
    pub name: String,
    /// Username used for authentication.
    pub username: String,
    /// Password used for authentication, if any.
    pub password: Option<SecretString>,
    /// Whether a TLS-protected connection is required.
    #[serde(default)]
    pub require_tls: bool,
}

impl PgConnectionConfig {
    /// Builds sqlx connect options without selecting a database.
    pub fn without_db(&self, options: &PgConnectionOptions) -> PgConnectOptions {
        let ssl_mode = if self.require_tls {
            PgSslMode::Require
        } else {
            PgSslMode::Prefer
        };

        let mut connect_options = PgConnectOptions::new_without_pgpass()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .ssl_mode(ssl_mode)
            .options(options.to_key_value_pairs());

        if let Some(password) = &self.password {
            connect_options = connect_options.password(password.expose_secret());
        }

        connect_options
    }

    /// Builds sqlx connect options targeting the configured database.
    pub fn with_db(&self, options: &PgConnectionOptions) -> PgConnectOptions {
        self.without_db(options).database(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_options_disable_statement_timeout() {
        let pairs = BACKFILL_CHUNK_OPTIONS.to_key_value_pairs();
        let statement_timeout = pairs
            .iter()
            .find(|(key, _)| key == "statement_timeout")
            .map(|(_, value)| value.as_str());
        assert_eq!(statement_timeout, Some("0"));
    }

    #[test]
    fn profiles_report_distinct_application_names() {
        assert_ne!(
            BACKFILL_CHUNK_OPTIONS.application_name,
            BACKFILL_CHECKPOINT_OPTIONS.application_name
        );
        assert_ne!(
            BACKFILL_CHUNK_OPTIONS.application_name,
            BACKFILL_ADMIN_OPTIONS.application_name
        );
    }
}
