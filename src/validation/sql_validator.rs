use sqlparser::ast::Statement;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::api::middleware::AppError;

/// Guard applied to translated statements before they reach a datastore
pub struct SqlValidator;

impl SqlValidator {
    fn parse(sql: &str) -> Result<Vec<Statement>, AppError> {
        let dialect = PostgreSqlDialect {};
        let ast = Parser::new(&dialect)
            .try_with_sql(sql)
            .and_then(|mut parser| parser.parse_statements())
            .map_err(|e| AppError::InvalidSql(format!("SQL parsing error: {}", e)))?;

        if ast.is_empty() {
            return Err(AppError::InvalidSql("Empty SQL query".to_string()));
        }
        Ok(ast)
    }

    /// Accept exactly one read-only statement
    pub fn validate_select_only(sql: &str) -> Result<Statement, AppError> {
        let mut ast = Self::parse(sql)?;
        if ast.len() > 1 {
            return Err(AppError::InvalidSql(format!(
                "Expected a single statement, found {}",
                ast.len()
            )));
        }

        match ast.remove(0) {
            stmt @ Statement::Query(_) => Ok(stmt),
            Statement::Insert { .. } => Err(AppError::InvalidSql("INSERT statements are not allowed".to_string())),
            Statement::Update { .. } => Err(AppError::InvalidSql("UPDATE statements are not allowed".to_string())),
            Statement::Delete { .. } => Err(AppError::InvalidSql("DELETE statements are not allowed".to_string())),
            Statement::Drop { .. } => Err(AppError::InvalidSql("DROP statements are not allowed".to_string())),
            other => Err(AppError::InvalidSql(format!("Only SELECT queries are permitted. Found: {}", other))),
        }
    }

    /// Append `LIMIT max_rows` unless the statement already limits itself.
    /// Returns the statement and whether a limit was added.
    pub fn ensure_limit(sql: &str, max_rows: u64) -> Result<(String, bool), AppError> {
        let stmt = Self::validate_select_only(sql)?;
        let has_limit = matches!(&stmt, Statement::Query(query) if query.limit_clause.is_some());

        if has_limit {
            Ok((sql.to_string(), false))
        } else {
            let trimmed_sql = sql.trim_end_matches(';').trim();
            Ok((format!("{} LIMIT {}", trimmed_sql, max_rows), true))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_select_only() {
        assert!(SqlValidator::validate_select_only("SELECT region FROM sales WHERE year = $1").is_ok());
        assert!(SqlValidator::validate_select_only("INSERT INTO users VALUES (1)").is_err());
        assert!(SqlValidator::validate_select_only("UPDATE users SET name = 'test'").is_err());
        assert!(SqlValidator::validate_select_only("DELETE FROM users").is_err());
    }

    #[test]
    fn test_rejects_stacked_statements() {
        let err = SqlValidator::validate_select_only("SELECT 1; DROP TABLE users").unwrap_err();
        assert!(matches!(err, AppError::InvalidSql(_)));
    }

    #[test]
    fn test_ensure_limit() {
        let (sql, applied) = SqlValidator::ensure_limit("SELECT * FROM table_limit", 1000).unwrap();
        assert_eq!(sql, "SELECT * FROM table_limit LIMIT 1000");
        assert!(applied);

        let (sql, applied) = SqlValidator::ensure_limit("SELECT * FROM users LIMIT 50", 1000).unwrap();
        assert_eq!(sql, "SELECT * FROM users LIMIT 50");
        assert!(!applied);

        // Comment text is not a LIMIT clause
        let (_, applied) = SqlValidator::ensure_limit("SELECT * FROM users /* LIMIT */", 10).unwrap();
        assert!(applied);
    }
}
