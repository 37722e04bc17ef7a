//! SQL dialects: quoting, literals and type names

use crate::schema::{ColumnType, DefaultValue};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dialect {
    #[default]
    #[serde(rename = "postgres", alias = "postgresql")]
    Postgres,
    #[serde(rename = "mysql")]
    MySql,
    #[serde(rename = "sqlite", alias = "sqlite3")]
    Sqlite,
}

impl Dialect {
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
            Dialect::Sqlite => "sqlite",
        }
    }

    /// Quote an identifier, doubling any embedded quote character.
    pub fn quote_ident(&self, ident: &str) -> String {
        match self {
            Dialect::MySql => format!("`{}`", ident.replace('`', "``")),
            Dialect::Postgres | Dialect::Sqlite => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    /// Quote a list of identifiers as `"a", "b"`.
    pub fn quote_idents(&self, idents: &[String]) -> String {
        idents
            .iter()
            .map(|i| self.quote_ident(i))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Quote a string literal.
    pub fn quote_literal(&self, value: &str) -> String {
        let escaped = value.replace('\'', "''");
        match self {
            Dialect::MySql => format!("'{}'", escaped.replace('\\', "\\\\")),
            Dialect::Postgres | Dialect::Sqlite => format!("'{escaped}'"),
        }
    }

    pub fn default_literal(&self, default: &DefaultValue) -> String {
        match default {
            DefaultValue::Null => "NULL".to_string(),
            DefaultValue::Boolean(value) => match (self, value) {
                (Dialect::Sqlite, true) => "1".to_string(),
                (Dialect::Sqlite, false) => "0".to_string(),
                (_, true) => "TRUE".to_string(),
                (_, false) => "FALSE".to_string(),
            },
            DefaultValue::Number(n) => n.clone(),
            DefaultValue::Text(s) => self.quote_literal(s),
            DefaultValue::Expression(e) => e.clone(),
        }
    }

    /// Concrete type name for a logical column type.
    pub fn column_type(&self, column_type: &ColumnType) -> String {
        use ColumnType::*;

        match self {
            Dialect::Postgres => match column_type {
                SmallInt => "SMALLINT".to_string(),
                Integer => "INTEGER".to_string(),
                BigInt => "BIGINT".to_string(),
                Boolean => "BOOLEAN".to_string(),
                Real => "REAL".to_string(),
                Double => "DOUBLE PRECISION".to_string(),
                Decimal { precision, scale } => format!("NUMERIC({precision}, {scale})"),
                Char { length } => format!("CHAR({length})"),
                Varchar { length } => format!("VARCHAR({length})"),
                Text => "TEXT".to_string(),
                Date => "DATE".to_string(),
                Time => "TIME".to_string(),
                Timestamp => "TIMESTAMP".to_string(),
                TimestampTz => "TIMESTAMPTZ".to_string(),
                Binary => "BYTEA".to_string(),
                Uuid => "UUID".to_string(),
                Json => "JSONB".to_string(),
                Custom { name } => name.clone(),
            },
            Dialect::MySql => match column_type {
                SmallInt => "SMALLINT".to_string(),
                Integer => "INT".to_string(),
                BigInt => "BIGINT".to_string(),
                Boolean => "BOOLEAN".to_string(),
                Real => "FLOAT".to_string(),
                Double => "DOUBLE".to_string(),
                Decimal { precision, scale } => format!("DECIMAL({precision}, {scale})"),
                Char { length } => format!("CHAR({length})"),
                Varchar { length } => format!("VARCHAR({length})"),
                Text => "TEXT".to_string(),
                Date => "DATE".to_string(),
                Time => "TIME".to_string(),
                Timestamp => "DATETIME".to_string(),
                TimestampTz => "TIMESTAMP".to_string(),
                Binary => "BLOB".to_string(),
                Uuid => "CHAR(36)".to_string(),
                Json => "JSON".to_string(),
                Custom { name } => name.clone(),
            },
            // SQLite only knows storage affinities.
            Dialect::Sqlite => match column_type {
                SmallInt | Integer | BigInt | Boolean => "INTEGER".to_string(),
                Real | Double => "REAL".to_string(),
                Decimal { .. } => "NUMERIC".to_string(),
                Char { .. } | Varchar { .. } | Text | Date | Time | Timestamp | TimestampTz
                | Uuid | Json => "TEXT".to_string(),
                Binary => "BLOB".to_string(),
                Custom { name } => name.clone(),
            },
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "mysql" => Ok(Dialect::MySql),
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            other => Err(format!(
                "unknown dialect '{other}', expected one of: postgres, mysql, sqlite"
            )),
        }
    }
}
