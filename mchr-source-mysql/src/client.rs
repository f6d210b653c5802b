//! `MySqlSourceClient`: the concrete `mysql_async`-backed implementation
//! of the source DB contract.

use async_trait::async_trait;
use mchr_binlog::{Row, Value};
use mchr_errors::{ReplicationError, ReplicationResult};
use mysql_async::prelude::Queryable;
use tracing::debug;

use crate::start_value::StartValue;

/// The source database client contract: introspection plus PK-ordered
/// paged reads. A primary key is required for every table this
/// replicator handles.
#[async_trait]
pub trait SourceClient: Send {
    /// List every table name in the replicated database.
    async fn get_tables(&mut self) -> ReplicationResult<Vec<String>>;

    /// Fetch the `CREATE TABLE` statement for `table`, as the server would
    /// emit it for `SHOW CREATE TABLE`.
    async fn get_table_create_statement(&mut self, table: &str) -> ReplicationResult<String>;

    /// Fetch up to `limit` rows of `table`, ordered ascending by
    /// `order_by`, with that column strictly greater than `start_value`.
    async fn get_records(
        &mut self,
        table: &str,
        order_by: &str,
        limit: u64,
        start_value: &StartValue,
    ) -> ReplicationResult<Vec<Row>>;

    /// Release the underlying connection. Called once, when the
    /// orchestrator transitions into `REALTIME` — the source client is not
    /// used again after that point.
    async fn close(&mut self) -> ReplicationResult<()>;
}

/// `SourceClient` backed by a single `mysql_async` connection.
pub struct MySqlSourceClient {
    conn: mysql_async::Conn,
    database: String,
}

impl MySqlSourceClient {
    /// Connect to `opts` and scope all introspection/read calls to
    /// `database`.
    pub async fn connect(opts: mysql_async::Opts, database: String) -> ReplicationResult<Self> {
        let conn = mysql_async::Conn::new(opts)
            .await
            .map_err(|e| ReplicationError::Source(e.to_string()))?;
        Ok(MySqlSourceClient { conn, database })
    }
}

#[async_trait]
impl SourceClient for MySqlSourceClient {
    async fn get_tables(&mut self) -> ReplicationResult<Vec<String>> {
        let sql = format!("SHOW TABLES FROM `{}`", self.database);
        self.conn
            .query(sql)
            .await
            .map_err(|e| ReplicationError::Source(e.to_string()))
    }

    async fn get_table_create_statement(&mut self, table: &str) -> ReplicationResult<String> {
        let sql = format!("SHOW CREATE TABLE `{}`.`{}`", self.database, table);
        let row: Option<(String, String)> = self
            .conn
            .query_first(sql)
            .await
            .map_err(|e| ReplicationError::Source(e.to_string()))?;
        row.map(|(_, create)| create).ok_or_else(|| {
            ReplicationError::Source(format!("SHOW CREATE TABLE returned no rows for {table}"))
        })
    }

    async fn get_records(
        &mut self,
        table: &str,
        order_by: &str,
        limit: u64,
        start_value: &StartValue,
    ) -> ReplicationResult<Vec<Row>> {
        let where_clause = match start_value {
            StartValue::Unbounded => String::new(),
            other => format!("WHERE `{order_by}` > {other}"),
        };
        let sql = format!(
            "SELECT * FROM `{}`.`{}` {} ORDER BY `{}` ASC LIMIT {}",
            self.database, table, where_clause, order_by, limit
        );
        debug!(target: "mchr_source_mysql", %sql, "paging source table");

        let rows: Vec<mysql_async::Row> = self
            .conn
            .exec(sql, ())
            .await
            .map_err(|e| ReplicationError::Source(e.to_string()))?;

        rows.iter().map(row_to_values).collect()
    }

    async fn close(&mut self) -> ReplicationResult<()> {
        // `mysql_async::Conn` closes its connection on drop; nothing else
        // to release here, but an explicit async close point gives other
        // implementers a place to flush/disconnect pools cleanly.
        Ok(())
    }
}

fn row_to_values(row: &mysql_async::Row) -> ReplicationResult<Row> {
    (0..row.len())
        .map(|idx| {
            let raw: &mysql_common::value::Value = row.as_ref(idx).ok_or_else(|| {
                ReplicationError::Source(format!("missing column at index {idx}"))
            })?;
            Ok(raw_value_to_mchr(raw))
        })
        .collect()
}

fn raw_value_to_mchr(val: &mysql_common::value::Value) -> Value {
    use mysql_common::value::Value as RawValue;
    match val {
        RawValue::NULL => Value::Null,
        RawValue::Int(i) => Value::Int(*i),
        RawValue::UInt(u) => Value::UInt(*u),
        RawValue::Float(f) => Value::Float(*f as f64),
        RawValue::Double(f) => Value::Float(*f),
        RawValue::Bytes(b) => Value::Str(String::from_utf8_lossy(b).into_owned()),
        RawValue::Date(year, month, day, hour, min, sec, micro) => {
            if *hour == 0 && *min == 0 && *sec == 0 && *micro == 0 {
                chrono::NaiveDate::from_ymd_opt(*year as i32, *month as u32, *day as u32)
                    .map(Value::Date)
                    .unwrap_or(Value::Null)
            } else {
                let date = chrono::NaiveDate::from_ymd_opt(*year as i32, *month as u32, *day as u32);
                let time = chrono::NaiveTime::from_hms_micro_opt(
                    *hour as u32,
                    *min as u32,
                    *sec as u32,
                    *micro,
                );
                match (date, time) {
                    (Some(d), Some(t)) => Value::DateTime(chrono::NaiveDateTime::new(d, t)),
                    _ => Value::Null,
                }
            }
        }
        RawValue::Time(..) => Value::Str(format!("{val:?}")),
    }
}
