//! TOML configuration: `[mysql]`, `[clickhouse]`, `[binlog_reader]`,
//! repeatable `[[databases]]`, and tuning overrides for every constant in
//! the orchestrator.

use std::path::{Path, PathBuf};
use std::time::Duration;

use mchr_errors::{ReplicationError, ReplicationResult};
use serde::Deserialize;

fn default_mysql_port() -> u16 {
    3306
}

fn default_clickhouse_port() -> u16 {
    8123
}

fn default_clickhouse_user() -> String {
    "default".to_string()
}

fn default_initial_batch() -> u64 {
    mchr_core::DEFAULT_INITIAL_BATCH
}

fn default_data_dump_batch_size() -> usize {
    10_000
}

fn default_data_dump_interval_ms() -> u64 {
    1_000
}

fn default_save_state_interval_ms() -> u64 {
    10_000
}

fn default_stats_dump_interval_ms() -> u64 {
    60_000
}

fn default_read_log_interval_ms() -> u64 {
    1_000
}

/// Source MySQL connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MysqlConfig {
    pub host: String,
    #[serde(default = "default_mysql_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Unused until a TLS-capable connector is wired in; reserved so the
    /// config schema doesn't need to change when it is.
    #[serde(default)]
    pub use_tls: bool,
}

/// Target ClickHouse connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ClickhouseConfig {
    pub host: String,
    #[serde(default = "default_clickhouse_port")]
    pub port: u16,
    #[serde(default = "default_clickhouse_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Prepended to every target database name, e.g. `shop` -> `repl_shop`.
    #[serde(default)]
    pub database_prefix: String,
}

/// Binlog reader settings shared across every configured database.
#[derive(Debug, Clone, Deserialize)]
pub struct BinlogReaderConfig {
    /// Directory under which each database's `state.bin` is kept.
    pub data_dir: PathBuf,
    /// `server_id` used for `COM_REGISTER_SLAVE`; left unset to use the
    /// reader's own default.
    #[serde(default)]
    pub server_id: Option<u32>,
}

/// One source database to replicate, optionally renamed on the target.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub source: String,
    #[serde(default)]
    pub target: Option<String>,
}

impl DatabaseConfig {
    /// The target-side database name: `target` if given, else `source`.
    pub fn target_name(&self) -> &str {
        self.target.as_deref().unwrap_or(&self.source)
    }
}

/// The full configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mysql: MysqlConfig,
    pub clickhouse: ClickhouseConfig,
    pub binlog_reader: BinlogReaderConfig,
    #[serde(default)]
    pub databases: Vec<DatabaseConfig>,

    #[serde(default = "default_initial_batch")]
    pub initial_batch: u64,
    #[serde(default = "default_data_dump_batch_size")]
    pub data_dump_batch_size: usize,
    #[serde(default = "default_data_dump_interval_ms")]
    pub data_dump_interval_ms: u64,
    #[serde(default = "default_save_state_interval_ms")]
    pub save_state_interval_ms: u64,
    #[serde(default = "default_stats_dump_interval_ms")]
    pub stats_dump_interval_ms: u64,
    #[serde(default = "default_read_log_interval_ms")]
    pub read_log_interval_ms: u64,
}

impl Config {
    /// Load and parse the configuration file at `path`.
    pub fn load(path: &Path) -> ReplicationResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    fn parse(text: &str) -> ReplicationResult<Self> {
        toml::from_str(text).map_err(|e| ReplicationError::Config(e.to_string()))
    }

    /// Build the orchestrator tuning knobs from the millisecond fields.
    pub fn orchestrator_config(&self) -> mchr_core::OrchestratorConfig {
        mchr_core::OrchestratorConfig {
            initial_batch: self.initial_batch,
            data_dump_batch_size: self.data_dump_batch_size,
            data_dump_interval: Duration::from_millis(self.data_dump_interval_ms),
            save_state_interval: Duration::from_millis(self.save_state_interval_ms),
            stats_dump_interval: Duration::from_millis(self.stats_dump_interval_ms),
            read_log_interval: Duration::from_millis(self.read_log_interval_ms),
        }
    }

    /// Path to `database`'s persisted state file.
    pub fn state_path(&self, database: &str) -> PathBuf {
        self.binlog_reader.data_dir.join(database).join("state.bin")
    }

    /// Build `mysql_async` connection options scoped to `database`.
    pub fn mysql_opts(&self, database: &str) -> mysql_async::Opts {
        mysql_async::OptsBuilder::default()
            .ip_or_hostname(self.mysql.host.clone())
            .tcp_port(self.mysql.port)
            .user(Some(self.mysql.user.clone()))
            .pass(Some(self.mysql.password.clone()))
            .db_name(Some(database.to_string()))
            .into()
    }

    /// The target-side database name for `db`, with the configured prefix
    /// applied.
    pub fn target_database_name(&self, db: &DatabaseConfig) -> String {
        format!("{}{}", self.clickhouse.database_prefix, db.target_name())
    }

    /// HTTP URL of the ClickHouse server.
    pub fn clickhouse_url(&self) -> String {
        format!("http://{}:{}", self.clickhouse.host, self.clickhouse.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [mysql]
        host = "127.0.0.1"
        user = "root"

        [clickhouse]
        host = "127.0.0.1"

        [binlog_reader]
        data_dir = "/var/lib/mchr"

        [[databases]]
        source = "shop"
    "#;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config = Config::parse(MINIMAL).unwrap();
        assert_eq!(config.mysql.port, 3306);
        assert_eq!(config.clickhouse.port, 8123);
        assert_eq!(config.clickhouse.user, "default");
        assert_eq!(config.initial_batch, mchr_core::DEFAULT_INITIAL_BATCH);
        assert_eq!(config.databases.len(), 1);
        assert_eq!(config.databases[0].target_name(), "shop");
    }

    #[test]
    fn database_target_name_falls_back_to_source() {
        let mut config = Config::parse(MINIMAL).unwrap();
        config.databases.push(DatabaseConfig {
            source: "orders".into(),
            target: Some("orders_replica".into()),
        });
        assert_eq!(config.databases[0].target_name(), "shop");
        assert_eq!(config.databases[1].target_name(), "orders_replica");
    }

    #[test]
    fn tuning_overrides_are_honored() {
        let text = format!(
            "{MINIMAL}\ndata_dump_batch_size = 500\nsave_state_interval_ms = 2000\n"
        );
        let config = Config::parse(&text).unwrap();
        assert_eq!(config.data_dump_batch_size, 500);
        assert_eq!(
            config.orchestrator_config().save_state_interval,
            Duration::from_millis(2000)
        );
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(
            Config::parse("not valid toml {{{"),
            Err(ReplicationError::Config(_))
        ));
    }
}
