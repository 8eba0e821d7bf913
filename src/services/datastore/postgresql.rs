// PostgreSQL datastore handle backed by a deadpool connection pool
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use deadpool_postgres::{Config as PoolConfig, ManagerConfig, Object, Pool, RecyclingMethod};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{NoTls, Row};
use url::Url;

use crate::api::middleware::AppError;
use crate::models::{DatastoreDescriptor, DatastoreKind, NativeStatement, QueryResult};
use crate::services::datastore::adapter::Datastore;
use crate::services::datastore::{map_placeholders, mask_credentials};

/// A statement argument converted to the Rust type the server expects for
/// its parameter. tokio-postgres rejects mismatched widths, so an INT4
/// parameter needs an `i32`, not an `i64`.
#[derive(Debug, Clone, PartialEq)]
enum PgArg {
    Bool(Option<bool>),
    Int2(Option<i16>),
    Int4(Option<i32>),
    Int8(Option<i64>),
    Float4(Option<f32>),
    Float8(Option<f64>),
    Text(Option<String>),
    Date(Option<NaiveDate>),
    Timestamp(Option<NaiveDateTime>),
    TimestampTz(Option<DateTime<Utc>>),
    Json(Option<Value>),
}

impl PgArg {
    fn into_sql(self) -> Box<dyn ToSql + Sync + Send> {
        match self {
            PgArg::Bool(v) => Box::new(v),
            PgArg::Int2(v) => Box::new(v),
            PgArg::Int4(v) => Box::new(v),
            PgArg::Int8(v) => Box::new(v),
            PgArg::Float4(v) => Box::new(v),
            PgArg::Float8(v) => Box::new(v),
            PgArg::Text(v) => Box::new(v),
            PgArg::Date(v) => Box::new(v),
            PgArg::Timestamp(v) => Box::new(v),
            PgArg::TimestampTz(v) => Box::new(v),
            PgArg::Json(v) => Box::new(v),
        }
    }
}

/// Parameter types bound directly; anything else goes through a text cast
fn binds_natively(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::BOOL
            | Type::INT2
            | Type::INT4
            | Type::INT8
            | Type::FLOAT4
            | Type::FLOAT8
            | Type::TEXT
            | Type::VARCHAR
            | Type::BPCHAR
            | Type::NAME
            | Type::UNKNOWN
            | Type::DATE
            | Type::TIMESTAMP
            | Type::TIMESTAMPTZ
            | Type::JSON
            | Type::JSONB
    )
}

fn cast_target(ty: &Type) -> String {
    if ty.schema() == "pg_catalog" {
        ty.name().to_string()
    } else {
        format!("\"{}\".\"{}\"", ty.schema(), ty.name())
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn as_naive_datetime(value: &Value) -> Option<NaiveDateTime> {
    let raw = value.as_str()?.trim();
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.naive_utc()))
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn as_date(value: &Value) -> Option<NaiveDate> {
    let raw = value.as_str()?.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| as_naive_datetime(value).map(|dt| dt.date()))
}

fn as_datetime_utc(value: &Value) -> Option<DateTime<Utc>> {
    let raw = value.as_str()?.trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| as_naive_datetime(value).map(|dt| dt.and_utc()))
}

/// Convert one argument for a parameter of type `ty`. `position` is the
/// 1-based placeholder number, used in the error.
fn convert_arg(value: &Value, ty: &Type, position: usize) -> Result<PgArg, AppError> {
    fn typed<T>(value: &Value, ty: &Type, position: usize, parse: impl Fn(&Value) -> Option<T>) -> Result<Option<T>, AppError> {
        if value.is_null() {
            return Ok(None);
        }
        parse(value).map(Some).ok_or_else(|| {
            AppError::Execution(format!(
                "Argument ${} ({}) cannot be bound as {}",
                position,
                value,
                ty.name()
            ))
        })
    }

    let arg = match *ty {
        Type::BOOL => PgArg::Bool(typed(value, ty, position, |v| match v {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.trim().parse().ok(),
            Value::Number(n) => n.as_i64().map(|i| i != 0),
            _ => None,
        })?),
        Type::INT2 => PgArg::Int2(typed(value, ty, position, |v| {
            as_integer(v).and_then(|i| i16::try_from(i).ok())
        })?),
        Type::INT4 => PgArg::Int4(typed(value, ty, position, |v| {
            as_integer(v).and_then(|i| i32::try_from(i).ok())
        })?),
        Type::INT8 => PgArg::Int8(typed(value, ty, position, as_integer)?),
        Type::FLOAT4 => PgArg::Float4(typed(value, ty, position, |v| as_float(v).map(|f| f as f32))?),
        Type::FLOAT8 => PgArg::Float8(typed(value, ty, position, as_float)?),
        Type::DATE => PgArg::Date(typed(value, ty, position, as_date)?),
        Type::TIMESTAMP => PgArg::Timestamp(typed(value, ty, position, as_naive_datetime)?),
        Type::TIMESTAMPTZ => PgArg::TimestampTz(typed(value, ty, position, as_datetime_utc)?),
        Type::JSON | Type::JSONB => PgArg::Json(typed(value, ty, position, |v| Some(v.clone()))?),
        _ => PgArg::Text(typed(value, ty, position, |v| Some(as_text(v)))?),
    };
    Ok(arg)
}

/// Rewrite placeholders whose parameter type has no direct binding as
/// `$n::text::<type>`. Returns `None` when every parameter binds directly.
fn cast_unbound_params(sql: &str, params: &[Type]) -> Result<Option<String>, AppError> {
    if params.iter().all(binds_natively) {
        return Ok(None);
    }
    let rewritten = map_placeholders(sql, |position| {
        match position.checked_sub(1).and_then(|i| params.get(i)) {
            Some(ty) if !binds_natively(ty) => Ok(format!("${}::text::{}", position, cast_target(ty))),
            Some(_) => Ok(format!("${}", position)),
            None => Err(AppError::Execution(format!("Placeholder ${} has no parameter", position))),
        }
    })?;
    Ok(Some(rewritten))
}

fn execution_error(e: tokio_postgres::Error) -> AppError {
    let details = match e.as_db_error() {
        Some(db_error) => format!("Code: {}, Message: {}", db_error.code().code(), db_error.message()),
        None => e.to_string(),
    };
    AppError::Execution(details)
}

pub struct PostgreSQLDatastore {
    pool: Pool,
    name: String,
}

impl PostgreSQLDatastore {
    /// Build the pool and check out one connection to prove the datastore is reachable
    pub async fn connect(descriptor: &DatastoreDescriptor, max_pool_size: usize) -> Result<Self, AppError> {
        let url = Url::parse(&descriptor.connection_url)
            .map_err(|e| AppError::Validation(format!("Invalid PostgreSQL URL: {}", e)))?;
        if url.scheme() != "postgresql" && url.scheme() != "postgres" {
            return Err(AppError::Validation("URL must use postgresql:// or postgres:// scheme".to_string()));
        }

        tracing::info!(
            "Creating PostgreSQL pool for datastore {} at {} (max_size: {})",
            descriptor.id,
            mask_credentials(&descriptor.connection_url),
            max_pool_size
        );

        let mut cfg = PoolConfig::new();
        cfg.url = Some(descriptor.connection_url.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = cfg
            .create_pool(Some(deadpool_postgres::Runtime::Tokio1), NoTls)
            .map_err(|e| AppError::Connection(format!("Failed to create connection pool: {}", e)))?;
        pool.resize(max_pool_size);

        let _client = pool
            .get()
            .await
            .map_err(|e| AppError::Connection(format!("Failed to connect to {}: {}", descriptor.name, e)))?;

        Ok(Self {
            pool,
            name: descriptor.name.clone(),
        })
    }

    fn bind_args(args: &[Value], params: &[Type]) -> Result<Vec<Box<dyn ToSql + Sync + Send>>, AppError> {
        if args.len() != params.len() {
            return Err(AppError::Execution(format!(
                "Statement expects {} arguments, got {}",
                params.len(),
                args.len()
            )));
        }
        args.iter()
            .zip(params)
            .enumerate()
            .map(|(i, (arg, ty))| convert_arg(arg, ty, i + 1).map(PgArg::into_sql))
            .collect()
    }

    /// Prepare with the server's inferred parameter types, then bind each
    /// argument as the type its parameter expects
    async fn run(client: &Object, statement: &NativeStatement) -> Result<Vec<Row>, AppError> {
        let mut prepared = client.prepare_cached(&statement.query).await.map_err(execution_error)?;
        let cast = cast_unbound_params(&statement.query, prepared.params())?;
        if let Some(cast) = cast {
            tracing::debug!("Binding through text casts: {}", cast);
            prepared = client.prepare_cached(&cast).await.map_err(execution_error)?;
        }

        let bound = Self::bind_args(&statement.args, prepared.params())?;
        let params: Vec<&(dyn ToSql + Sync)> = bound.iter().map(|b| b.as_ref() as &(dyn ToSql + Sync)).collect();
        client.query(&prepared, &params).await.map_err(execution_error)
    }

    fn row_to_json(row: &Row) -> Value {
        let mut row_obj = serde_json::Map::new();
        for (idx, column) in row.columns().iter().enumerate() {
            let value = match *column.type_() {
                Type::INT2 => row.try_get::<_, Option<i16>>(idx).ok().flatten().map(|v| json!(v)),
                Type::INT4 => row.try_get::<_, Option<i32>>(idx).ok().flatten().map(|v| json!(v)),
                Type::INT8 => row.try_get::<_, Option<i64>>(idx).ok().flatten().map(|v| json!(v)),
                Type::FLOAT4 => row.try_get::<_, Option<f32>>(idx).ok().flatten().map(|v| json!(v)),
                Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx).ok().flatten().map(|v| json!(v)),
                Type::BOOL => row.try_get::<_, Option<bool>>(idx).ok().flatten().map(|v| json!(v)),
                Type::TIMESTAMP => row
                    .try_get::<_, Option<chrono::NaiveDateTime>>(idx)
                    .ok()
                    .flatten()
                    .map(|v| json!(v.to_string())),
                Type::TIMESTAMPTZ => row
                    .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
                    .ok()
                    .flatten()
                    .map(|v| json!(v.to_rfc3339())),
                Type::DATE => row
                    .try_get::<_, Option<chrono::NaiveDate>>(idx)
                    .ok()
                    .flatten()
                    .map(|v| json!(v.to_string())),
                Type::JSON | Type::JSONB => row.try_get::<_, Option<Value>>(idx).ok().flatten(),
                _ => match row.try_get::<_, Option<String>>(idx) {
                    Ok(v) => v.map(Value::String),
                    // Types without a text mapping show up by name
                    Err(_) => Some(json!(format!("<{}>", column.type_().name()))),
                },
            };
            row_obj.insert(column.name().to_string(), value.unwrap_or(Value::Null));
        }
        Value::Object(row_obj)
    }
}

#[async_trait]
impl Datastore for PostgreSQLDatastore {
    async fn exec(&self, statement: &NativeStatement, timeout_secs: u64) -> Result<QueryResult, AppError> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::Connection(format!("Failed to get connection from pool: {}", e)))?;

        let start_time = Instant::now();
        let rows = tokio::time::timeout(Duration::from_secs(timeout_secs), Self::run(&client, statement))
            .await
            .map_err(|_| AppError::Execution(format!("Query timeout after {} seconds on {}", timeout_secs, self.name)))??;

        let json_rows: Vec<Value> = rows.iter().map(Self::row_to_json).collect();

        Ok(QueryResult {
            row_count: json_rows.len(),
            rows: json_rows,
            execution_time_ms: start_time.elapsed().as_millis() as u64,
        })
    }

    fn kind(&self) -> DatastoreKind {
        DatastoreKind::PostgreSQL
    }
}
