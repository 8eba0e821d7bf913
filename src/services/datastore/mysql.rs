// MySQL datastore handle using the mysql_async pool
use async_trait::async_trait;
use mysql_async::{prelude::*, Opts, Params, Pool, Row, Value as MySqlValue};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use url::Url;

use crate::api::middleware::AppError;
use crate::models::{DatastoreDescriptor, DatastoreKind, NativeStatement, QueryResult};
use crate::services::datastore::adapter::Datastore;
use crate::services::datastore::{map_placeholders, mask_credentials};

pub struct MySQLDatastore {
    pool: Pool,
    name: String,
}

impl MySQLDatastore {
    pub async fn connect(descriptor: &DatastoreDescriptor) -> Result<Self, AppError> {
        let mut url = Url::parse(&descriptor.connection_url)
            .map_err(|e| AppError::Validation(format!("Invalid MySQL URL: {}", e)))?;
        match url.scheme() {
            "mysql" => {}
            "mariadb" => {
                url.set_scheme("mysql")
                    .map_err(|_| AppError::Validation("Cannot rewrite mariadb:// URL".to_string()))?;
            }
            _ => {
                return Err(AppError::Validation("URL must use mysql:// or mariadb:// scheme".to_string()));
            }
        }

        tracing::info!(
            "Creating MySQL pool for datastore {} at {}",
            descriptor.id,
            mask_credentials(&descriptor.connection_url)
        );

        let opts = Opts::from_url(url.as_str())
            .map_err(|e| AppError::Validation(format!("Invalid MySQL options: {}", e)))?;
        let pool = Pool::new(opts);

        pool.get_conn()
            .await
            .map_err(|e| AppError::Connection(format!("Failed to connect to {}: {}", descriptor.name, e)))?;

        Ok(Self {
            pool,
            name: descriptor.name.clone(),
        })
    }

    fn to_mysql_value(arg: &Value) -> MySqlValue {
        match arg {
            Value::Null => MySqlValue::NULL,
            Value::Bool(b) => MySqlValue::Int(i64::from(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    MySqlValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    MySqlValue::UInt(u)
                } else {
                    MySqlValue::Double(n.as_f64().unwrap_or_default())
                }
            }
            Value::String(s) => MySqlValue::Bytes(s.clone().into_bytes()),
            other => MySqlValue::Bytes(other.to_string().into_bytes()),
        }
    }

    fn mysql_value_to_json(mysql_val: MySqlValue) -> Value {
        match mysql_val {
            MySqlValue::NULL => Value::Null,
            MySqlValue::Bytes(bytes) => match String::from_utf8(bytes) {
                Ok(s) => json!(s),
                Err(_) => Value::Null,
            },
            MySqlValue::Int(i) => json!(i),
            MySqlValue::UInt(u) => json!(u),
            MySqlValue::Float(f) => json!(f),
            MySqlValue::Double(d) => json!(d),
            MySqlValue::Date(y, m, d, h, min, s, _) => {
                json!(format!("{:04}-{:02}-{:02} {:02}:{:02}:{:02}", y, m, d, h, min, s))
            }
            MySqlValue::Time(is_neg, d, h, m, s, _) => {
                let sign = if is_neg { "-" } else { "" };
                let total_hours = d * 24 + h as u32;
                json!(format!("{}{}:{:02}:{:02}", sign, total_hours, m, s))
            }
        }
    }
}

/// Rewrite `$n` placeholders to `?`, reordering the arguments to match.
/// Placeholders inside single-quoted literals are left alone.
pub fn rewrite_placeholders(sql: &str, args: &[Value]) -> Result<(String, Vec<Value>), AppError> {
    let mut ordered = Vec::with_capacity(args.len());
    let rewritten = map_placeholders(sql, |position| {
        let arg = position
            .checked_sub(1)
            .and_then(|i| args.get(i))
            .ok_or_else(|| AppError::Execution(format!("Placeholder ${} has no argument", position)))?;
        ordered.push(arg.clone());
        Ok("?".to_string())
    })?;
    Ok((rewritten, ordered))
}

#[async_trait]
impl Datastore for MySQLDatastore {
    async fn exec(&self, statement: &NativeStatement, timeout_secs: u64) -> Result<QueryResult, AppError> {
        let (sql, args) = rewrite_placeholders(&statement.query, &statement.args)?;
        let params = if args.is_empty() {
            Params::Empty
        } else {
            Params::Positional(args.iter().map(Self::to_mysql_value).collect())
        };

        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| AppError::Connection(format!("Failed to get MySQL connection from pool: {}", e)))?;

        let start_time = Instant::now();
        let rows: Vec<Row> = tokio::time::timeout(Duration::from_secs(timeout_secs), conn.exec(sql, params))
            .await
            .map_err(|_| AppError::Execution(format!("Query timeout after {} seconds on {}", timeout_secs, self.name)))?
            .map_err(|e| AppError::Execution(e.to_string()))?;

        let mut json_rows = Vec::with_capacity(rows.len());
        for row in rows {
            let mut row_obj = serde_json::Map::new();
            let columns = row.columns_ref();
            for (idx, column) in columns.iter().enumerate() {
                let value = match row.get_opt::<MySqlValue, usize>(idx) {
                    Some(Ok(mysql_val)) => Self::mysql_value_to_json(mysql_val),
                    Some(Err(_)) | None => Value::Null,
                };
                row_obj.insert(column.name_str().to_string(), value);
            }
            json_rows.push(Value::Object(row_obj));
        }

        Ok(QueryResult {
            row_count: json_rows.len(),
            rows: json_rows,
            execution_time_ms: start_time.elapsed().as_millis() as u64,
        })
    }

    fn kind(&self) -> DatastoreKind {
        DatastoreKind::MySQL
    }
}
