//! SQL dialect abstraction for tandem-store
//!
//! The migration engine issues a handful of fixed statement shapes per table
//! (paged selects, select by key, full-column upsert, delete by key), so each
//! dialect renders them by hand:
//! - Identifier quoting
//! - Parameter placeholders ($1 vs ?)
//! - Upsert strategies (ON CONFLICT, ON DUPLICATE KEY)
//! - LIMIT/OFFSET syntax

/// SQL dialect for vendor-specific SQL generation
pub trait SqlDialect: Send + Sync {
    /// Get the dialect name
    fn name(&self) -> &'static str;

    /// Quote an identifier (table, column name)
    fn quote_identifier(&self, name: &str) -> String;

    /// Get the placeholder for a parameter (1-based index)
    fn placeholder(&self, index: usize) -> String;

    /// Get the LIMIT/OFFSET syntax
    fn limit_offset_sql(&self, limit: Option<u64>, offset: Option<u64>) -> String;

    /// Generate a full-column upsert keyed on `key_column`
    ///
    /// One placeholder per column, in `columns` order. Every non-key column
    /// is overwritten on conflict.
    fn upsert_sql(&self, table: &str, key_column: &str, columns: &[&str]) -> String;

    /// Generate a delete statement keyed on `key_column` (one placeholder)
    fn delete_sql(&self, table: &str, key_column: &str) -> String;

    /// Build a SELECT statement
    fn build_select(
        &self,
        table: &str,
        columns: &[&str],
        where_clause: Option<&str>,
        order_by: Option<&[(&str, bool)]>,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> String {
        let cols = if columns.is_empty() {
            "*".to_string()
        } else {
            columns
                .iter()
                .map(|c| self.quote_identifier(c))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut sql = format!("SELECT {} FROM {}", cols, self.quote_identifier(table));

        if let Some(w) = where_clause {
            sql.push_str(&format!(" WHERE {}", w));
        }

        if let Some(orders) = order_by {
            if !orders.is_empty() {
                let order_parts: Vec<_> = orders
                    .iter()
                    .map(|(col, asc)| {
                        format!(
                            "{} {}",
                            self.quote_identifier(col),
                            if *asc { "ASC" } else { "DESC" }
                        )
                    })
                    .collect();
                sql.push_str(&format!(" ORDER BY {}", order_parts.join(", ")));
            }
        }

        sql.push_str(&self.limit_offset_sql(limit, offset));
        sql
    }
}

// ===========================================================================
// PostgreSQL
// ===========================================================================

/// PostgreSQL dialect
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn limit_offset_sql(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        let mut sql = String::new();
        if let Some(l) = limit {
            sql.push_str(&format!(" LIMIT {}", l));
        }
        if let Some(o) = offset {
            sql.push_str(&format!(" OFFSET {}", o));
        }
        sql
    }

    fn upsert_sql(&self, table: &str, key_column: &str, columns: &[&str]) -> String {
        let cols: Vec<_> = columns.iter().map(|c| self.quote_identifier(c)).collect();
        let values: Vec<_> = (1..=columns.len()).map(|i| self.placeholder(i)).collect();
        let updates: Vec<_> = columns
            .iter()
            .filter(|c| **c != key_column)
            .map(|c| {
                format!(
                    "{} = EXCLUDED.{}",
                    self.quote_identifier(c),
                    self.quote_identifier(c)
                )
            })
            .collect();

        format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO UPDATE SET {}",
            self.quote_identifier(table),
            cols.join(", "),
            values.join(", "),
            self.quote_identifier(key_column),
            updates.join(", ")
        )
    }

    fn delete_sql(&self, table: &str, key_column: &str) -> String {
        format!(
            "DELETE FROM {} WHERE {} = {}",
            self.quote_identifier(table),
            self.quote_identifier(key_column),
            self.placeholder(1)
        )
    }
}

// ===========================================================================
// MySQL / MariaDB
// ===========================================================================

/// MySQL dialect
#[derive(Debug, Clone, Default)]
pub struct MySqlDialect;

impl SqlDialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "MySQL"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn limit_offset_sql(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (Some(l), Some(o)) => format!(" LIMIT {} OFFSET {}", l, o),
            (Some(l), None) => format!(" LIMIT {}", l),
            (None, Some(o)) => format!(" LIMIT 18446744073709551615 OFFSET {}", o),
            (None, None) => String::new(),
        }
    }

    fn upsert_sql(&self, table: &str, key_column: &str, columns: &[&str]) -> String {
        let cols: Vec<_> = columns.iter().map(|c| self.quote_identifier(c)).collect();
        let values: Vec<_> = columns.iter().map(|_| "?".to_string()).collect();
        let updates: Vec<_> = columns
            .iter()
            .filter(|c| **c != key_column)
            .map(|c| {
                format!(
                    "{} = VALUES({})",
                    self.quote_identifier(c),
                    self.quote_identifier(c)
                )
            })
            .collect();

        format!(
            "INSERT INTO {} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {}",
            self.quote_identifier(table),
            cols.join(", "),
            values.join(", "),
            updates.join(", ")
        )
    }

    fn delete_sql(&self, table: &str, key_column: &str) -> String {
        format!(
            "DELETE FROM {} WHERE {} = ?",
            self.quote_identifier(table),
            self.quote_identifier(key_column)
        )
    }
}

/// Get a dialect instance by database type name
pub fn dialect_for(name: &str) -> Box<dyn SqlDialect> {
    match name.to_lowercase().as_str() {
        "mysql" | "mariadb" => Box::new(MySqlDialect),
        // Default to PostgreSQL
        _ => Box::new(PostgresDialect),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_dialect() {
        let dialect = PostgresDialect;
        assert_eq!(dialect.quote_identifier("users"), "\"users\"");
        assert_eq!(dialect.placeholder(1), "$1");
        assert_eq!(dialect.limit_offset_sql(Some(1), Some(20)), " LIMIT 1 OFFSET 20");
    }

    #[test]
    fn test_mysql_dialect() {
        let dialect = MySqlDialect;
        assert_eq!(dialect.quote_identifier("users"), "`users`");
        assert_eq!(dialect.placeholder(3), "?");
        assert_eq!(dialect.limit_offset_sql(Some(5), None), " LIMIT 5");
    }

    #[test]
    fn test_postgres_upsert() {
        let sql = PostgresDialect.upsert_sql("users", "id", &["id", "name", "email"]);
        assert!(sql.starts_with("INSERT INTO \"users\""));
        assert!(sql.contains("VALUES ($1, $2, $3)"));
        assert!(sql.contains("ON CONFLICT (\"id\") DO UPDATE SET"));
        assert!(sql.contains("\"name\" = EXCLUDED.\"name\""));
        assert!(sql.contains("\"email\" = EXCLUDED.\"email\""));
        assert!(!sql.contains("\"id\" = EXCLUDED"));
    }

    #[test]
    fn test_mysql_upsert() {
        let sql = MySqlDialect.upsert_sql("orders", "id", &["id", "total", "status"]);
        assert!(sql.starts_with("INSERT INTO `orders`"));
        assert!(sql.contains("VALUES (?, ?, ?)"));
        assert!(sql.contains("ON DUPLICATE KEY UPDATE"));
        assert!(sql.contains("`total` = VALUES(`total`)"));
    }

    #[test]
    fn test_delete_sql() {
        assert_eq!(
            PostgresDialect.delete_sql("users", "id"),
            "DELETE FROM \"users\" WHERE \"id\" = $1"
        );
        assert_eq!(
            MySqlDialect.delete_sql("users", "id"),
            "DELETE FROM `users` WHERE `id` = ?"
        );
    }

    #[test]
    fn test_build_select() {
        let sql = PostgresDialect.build_select(
            "users",
            &["id", "name"],
            Some("\"utime\" >= $1"),
            Some(&[("id", true)]),
            Some(1),
            Some(42),
        );
        assert_eq!(
            sql,
            "SELECT \"id\", \"name\" FROM \"users\" WHERE \"utime\" >= $1 ORDER BY \"id\" ASC LIMIT 1 OFFSET 42"
        );
    }

    #[test]
    fn test_build_select_wildcard() {
        let sql = MySqlDialect.build_select("events", &[], None, None, Some(100), None);
        assert_eq!(sql, "SELECT * FROM `events` LIMIT 100");
    }

    #[test]
    fn test_dialect_for() {
        assert_eq!(dialect_for("postgres").name(), "PostgreSQL");
        assert_eq!(dialect_for("postgresql").name(), "PostgreSQL");
        assert_eq!(dialect_for("mysql").name(), "MySQL");
        assert_eq!(dialect_for("mariadb").name(), "MySQL");
        assert_eq!(dialect_for("anything-else").name(), "PostgreSQL");
    }
}
