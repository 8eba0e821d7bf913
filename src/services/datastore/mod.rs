// Backend datastore handles and the services that produce them
pub mod adapter;
pub mod connector;
pub mod directory;
pub mod mysql;
pub mod postgresql;

use crate::api::middleware::AppError;

pub use adapter::{Datastore, DatastoreConnector, DatastoreDirectory};
pub use connector::NativeConnector;
pub use directory::HttpDatastoreDirectory;
pub use mysql::MySQLDatastore;
pub use postgresql::PostgreSQLDatastore;

/// Replace every `$n` placeholder with the text `replace(n)` returns.
/// Placeholders inside single-quoted literals are left alone.
pub fn map_placeholders<F>(sql: &str, mut replace: F) -> Result<String, AppError>
where
    F: FnMut(usize) -> Result<String, AppError>,
{
    let mut out = String::with_capacity(sql.len());
    let mut in_literal = false;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\'' {
            in_literal = !in_literal;
            out.push(c);
            continue;
        }
        if c != '$' || in_literal || !chars.peek().is_some_and(|n| n.is_ascii_digit()) {
            out.push(c);
            continue;
        }

        let mut digits = String::new();
        while let Some(d) = chars.peek().copied().filter(|d| d.is_ascii_digit()) {
            digits.push(d);
            chars.next();
        }
        let position: usize = digits
            .parse()
            .map_err(|_| AppError::Execution(format!("Invalid placeholder ${}", digits)))?;
        out.push_str(&replace(position)?);
    }

    Ok(out)
}

/// Mask credentials in connection URL for safe logging
pub fn mask_credentials(url: &str) -> String {
    if let Ok(parsed_url) = url::Url::parse(url) {
        let mut masked = parsed_url.clone();
        if parsed_url.password().is_some() {
            let _ = masked.set_password(Some("***"));
        }
        masked.to_string()
    } else {
        "[invalid-url]".to_string()
    }
}
