use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::api::middleware::AppError;

/// A table referenced by a query and the datastore that owns it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableRef {
    pub name: String,
    pub datastore_id: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl Aggregate {
    fn as_sql(&self) -> &'static str {
        match self {
            Aggregate::Count => "COUNT",
            Aggregate::Sum => "SUM",
            Aggregate::Avg => "AVG",
            Aggregate::Min => "MIN",
            Aggregate::Max => "MAX",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelectColumn {
    pub column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<Aggregate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
}

impl FilterOp {
    fn as_sql(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::NotEq => "<>",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
            FilterOp::Like => "LIKE",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    #[serde(default)]
    pub value: Value,
}

/// Statement in the backend's native form: text plus positional arguments.
/// Placeholders are written `$1`, `$2`, ...
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NativeStatement {
    pub query: String,
    pub args: Vec<Value>,
}

/// Query execution result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub rows: Vec<Value>,
    pub row_count: usize,
    pub execution_time_ms: u64,
}

/// What the dispatcher needs from an interpreted query: the tables it touches
/// and a way to render itself as a native statement.
pub trait TranslatableQuery: Send + Sync {
    fn tables(&self) -> Vec<&TableRef>;

    fn to_native(&self) -> Result<NativeStatement, AppError>;
}

/// Structured query as produced by the natural-language interpreter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    /// Referenced tables, keyed by table name
    pub tables: BTreeMap<String, TableRef>,
    pub select: Vec<SelectColumn>,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub limit: Option<u64>,
}

impl Query {
    pub fn single_table(table: TableRef, select: Vec<SelectColumn>) -> Self {
        let mut tables = BTreeMap::new();
        tables.insert(table.name.clone(), table);
        Self {
            tables,
            select,
            filters: Vec::new(),
            group_by: Vec::new(),
            limit: None,
        }
    }

    fn render(&self) -> Result<NativeStatement, AppError> {
        let table = match self.tables.values().collect::<Vec<_>>().as_slice() {
            [table] => *table,
            other => {
                return Err(AppError::Translation(format!(
                    "expected exactly one table, found {}",
                    other.len()
                )))
            }
        };
        if self.select.is_empty() {
            return Err(AppError::Translation("no columns selected".to_string()));
        }

        let mut projections = Vec::with_capacity(self.select.len());
        for col in &self.select {
            let expr = match col.aggregate {
                Some(Aggregate::Count) if col.column == "*" => "COUNT(*)".to_string(),
                Some(agg) => format!("{}({})", agg.as_sql(), identifier(&col.column)?),
                None => identifier(&col.column)?.to_string(),
            };
            match &col.alias {
                Some(alias) => projections.push(format!("{} AS {}", expr, identifier(alias)?)),
                None => projections.push(expr),
            }
        }

        let mut sql = format!("SELECT {} FROM {}", projections.join(", "), identifier(&table.name)?);
        let mut args = Vec::new();

        let mut predicates = Vec::with_capacity(self.filters.len());
        for filter in &self.filters {
            let column = identifier(&filter.column)?;
            match (&filter.value, filter.op) {
                (Value::Null, FilterOp::Eq) => predicates.push(format!("{} IS NULL", column)),
                (Value::Null, FilterOp::NotEq) => predicates.push(format!("{} IS NOT NULL", column)),
                (Value::Null, op) => {
                    return Err(AppError::Translation(format!(
                        "operator {} cannot compare {} with null",
                        op.as_sql(),
                        column
                    )))
                }
                (Value::Array(_), _) | (Value::Object(_), _) => {
                    return Err(AppError::Translation(format!(
                        "filter on {} must compare against a scalar value",
                        column
                    )))
                }
                (value, op) => {
                    args.push(value.clone());
                    predicates.push(format!("{} {} ${}", column, op.as_sql(), args.len()));
                }
            }
        }
        if !predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&predicates.join(" AND "));
        }

        if !self.group_by.is_empty() {
            let cols = self
                .group_by
                .iter()
                .map(|c| identifier(c))
                .collect::<Result<Vec<_>, _>>()?;
            sql.push_str(" GROUP BY ");
            sql.push_str(&cols.join(", "));
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        Ok(NativeStatement { query: sql, args })
    }
}

impl TranslatableQuery for Query {
    fn tables(&self) -> Vec<&TableRef> {
        self.tables.values().collect()
    }

    fn to_native(&self) -> Result<NativeStatement, AppError> {
        self.render()
    }
}

/// Identifiers are emitted unquoted so the statement stays valid for every
/// backend dialect; anything outside `[A-Za-z_][A-Za-z0-9_]*` (dot-separated)
/// is refused.
fn identifier(name: &str) -> Result<&str, AppError> {
    let valid = !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if valid {
        Ok(name)
    } else {
        Err(AppError::Translation(format!("invalid identifier: {:?}", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sales_query() -> Query {
        Query::single_table(
            TableRef {
                name: "public.sales".to_string(),
                datastore_id: 7,
            },
            vec![
                SelectColumn {
                    column: "region".to_string(),
                    aggregate: None,
                    alias: None,
                },
                SelectColumn {
                    column: "amount".to_string(),
                    aggregate: Some(Aggregate::Sum),
                    alias: Some("total".to_string()),
                },
            ],
        )
    }

    #[test]
    fn test_render_with_filters_group_and_limit() {
        let mut query = sales_query();
        query.filters = vec![
            Filter {
                column: "year".to_string(),
                op: FilterOp::Gte,
                value: json!(2019),
            },
            Filter {
                column: "channel".to_string(),
                op: FilterOp::Eq,
                value: json!("web"),
            },
        ];
        query.group_by = vec!["region".to_string()];
        query.limit = Some(50);

        let stmt = query.to_native().unwrap();
        assert_eq!(
            stmt.query,
            "SELECT region, SUM(amount) AS total FROM public.sales WHERE year >= $1 AND channel = $2 GROUP BY region LIMIT 50"
        );
        assert_eq!(stmt.args, vec![json!(2019), json!("web")]);
    }

    #[test]
    fn test_null_filters_render_without_arguments() {
        let mut query = sales_query();
        query.filters = vec![
            Filter {
                column: "deleted_at".to_string(),
                op: FilterOp::Eq,
                value: Value::Null,
            },
            Filter {
                column: "region".to_string(),
                op: FilterOp::NotEq,
                value: Value::Null,
            },
        ];

        let stmt = query.to_native().unwrap();
        assert!(stmt.query.ends_with("WHERE deleted_at IS NULL AND region IS NOT NULL"));
        assert!(stmt.args.is_empty());
    }

    #[test]
    fn test_count_star() {
        let query = Query::single_table(
            TableRef {
                name: "orders".to_string(),
                datastore_id: 1,
            },
            vec![SelectColumn {
                column: "*".to_string(),
                aggregate: Some(Aggregate::Count),
                alias: None,
            }],
        );
        assert_eq!(query.to_native().unwrap().query, "SELECT COUNT(*) FROM orders");
    }

    #[test]
    fn test_rejects_injection_in_identifiers() {
        let mut query = sales_query();
        query.select[0].column = "region; DROP TABLE sales".to_string();
        assert!(matches!(query.to_native(), Err(AppError::Translation(_))));
    }

    #[test]
    fn test_rejects_empty_projection() {
        let mut query = sales_query();
        query.select.clear();
        assert!(matches!(query.to_native(), Err(AppError::Translation(_))));
    }

    #[test]
    fn test_deserialize_from_interpreter_payload() {
        let payload = json!({
            "tables": {"sales": {"name": "sales", "datastore_id": 3}},
            "select": [{"column": "amount", "aggregate": "max"}],
            "filters": [{"column": "region", "op": "not_eq", "value": "EU"}]
        });
        let query: Query = serde_json::from_value(payload).unwrap();
        assert_eq!(query.tables().len(), 1);
        assert_eq!(query.tables()[0].datastore_id, 3);

        let stmt = query.to_native().unwrap();
        assert_eq!(stmt.query, "SELECT MAX(amount) FROM sales WHERE region <> $1");
    }
}
