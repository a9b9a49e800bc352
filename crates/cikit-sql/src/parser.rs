//! SQL parsing using sqlparser-rs
//!
//! Parses SQL into an AST. Dependency extraction only understands queries,
//! so the parser can be asked to reject anything that is not a SELECT.

use sqlparser::ast::Statement;
use sqlparser::dialect::{BigQueryDialect, Dialect};
use sqlparser::parser::{Parser, ParserError};

/// SQL parser with configurable dialect
pub struct SqlParser {
    dialect: Box<dyn Dialect>,
    require_select: bool,
}

impl SqlParser {
    /// Create a SQL parser for BigQuery
    pub fn bigquery() -> Self {
        Self {
            dialect: Box::new(BigQueryDialect {}),
            require_select: true,
        }
    }

    /// Whether a statement other than a query is rejected (default: true)
    pub fn with_require_select(mut self, require_select: bool) -> Self {
        self.require_select = require_select;
        self
    }

    /// Parse SQL string into AST
    pub fn parse(&self, sql: &str) -> Result<ParsedSql, ParseError> {
        let statements =
            Parser::parse_sql(&*self.dialect, sql).map_err(|error| ParseError::Syntax {
                sql: sql.to_string(),
                error,
            })?;

        if statements.is_empty() {
            return Err(ParseError::Empty);
        }

        if self.require_select {
            if let Some(other) = statements.iter().find(|s| !matches!(s, Statement::Query(_))) {
                return Err(ParseError::NotSelect {
                    sql: sql.to_string(),
                    found: statement_kind(other),
                });
            }
        }

        Ok(ParsedSql {
            sql: sql.to_string(),
            statements,
        })
    }
}

impl Default for SqlParser {
    fn default() -> Self {
        Self::bigquery()
    }
}

/// Leading keywords of a statement, for error messages
fn statement_kind(statement: &Statement) -> String {
    statement
        .to_string()
        .split_whitespace()
        .take(2)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Successfully parsed SQL with AST
#[derive(Debug, Clone)]
pub struct ParsedSql {
    /// Original SQL string
    pub sql: String,

    /// Parsed statements
    pub statements: Vec<Statement>,
}

impl ParsedSql {
    /// Serialize the (possibly modified) statements back to SQL
    pub fn to_sql(&self) -> String {
        self.statements
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(";\n")
    }
}

/// SQL parsing errors
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("SQL parse error: {error}")]
    Syntax {
        sql: String,
        #[source]
        error: ParserError,
    },

    #[error("Expected a SELECT statement, found {found}")]
    NotSelect { sql: String, found: String },

    #[error("No SQL statement found")]
    Empty,
}

impl ParseError {
    /// The SQL text that failed, when available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Syntax { sql, .. } | Self::NotSelect { sql, .. } => Some(sql),
            Self::Empty => None,
        }
    }

    /// Check if this is an unsupported syntax error
    pub fn is_unsupported_syntax(&self) -> bool {
        match self {
            Self::Syntax { error, .. } => {
                let message = error.to_string().to_lowercase();
                message.contains("expected") || message.contains("unexpected")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_select() {
        let parsed = SqlParser::bigquery()
            .parse("SELECT id, name FROM users WHERE active = true")
            .unwrap();

        assert_eq!(parsed.statements.len(), 1);
        assert!(matches!(parsed.statements[0], Statement::Query(_)));
    }

    #[test]
    fn parse_with_cte() {
        let sql = r#"
            WITH active_users AS (
                SELECT * FROM users WHERE active = true
            )
            SELECT id, name FROM active_users
        "#;

        let parsed = SqlParser::bigquery().parse(sql).unwrap();
        assert!(matches!(parsed.statements[0], Statement::Query(_)));
    }

    #[test]
    fn parse_invalid_sql() {
        let error = SqlParser::bigquery().parse("SELECT FROM WHERE").unwrap_err();
        assert!(error.is_unsupported_syntax());
        assert_eq!(error.sql(), Some("SELECT FROM WHERE"));
    }

    #[test]
    fn rejects_non_select_by_default() {
        let error = SqlParser::bigquery()
            .parse("DELETE FROM t WHERE true")
            .unwrap_err();
        assert!(matches!(error, ParseError::NotSelect { .. }));
    }

    #[test]
    fn non_select_allowed_when_relaxed() {
        let parsed = SqlParser::bigquery()
            .with_require_select(false)
            .parse("DELETE FROM t WHERE true")
            .unwrap();
        assert!(matches!(parsed.statements[0], Statement::Delete(_)));
    }

    #[test]
    fn empty_input() {
        assert!(matches!(
            SqlParser::bigquery().parse("  "),
            Err(ParseError::Empty)
        ));
    }

    #[test]
    fn backtick_qualified_names_parse() {
        let sql = "SELECT * FROM `my-project.sales.orders`";
        assert!(SqlParser::bigquery().parse(sql).is_ok());
        assert!(SqlParser::default().parse("SELECT 1").is_ok());
    }
}
