//! Shared dialect capability set.
//!
//! Every other crate in the workspace depends on [`Dialect`] instead of
//! re-deriving identifier quoting, default-schema, or length-limit rules:
//! rather than an inheritance chain per database, a single enum plus a
//! handful of methods on it.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    SqlServer,
    Postgres,
    MySql,
    Oracle,
    Sqlite,
}

impl Dialect {
    pub const ALL: [Dialect; 5] = [
        Dialect::SqlServer,
        Dialect::Postgres,
        Dialect::MySql,
        Dialect::Oracle,
        Dialect::Sqlite,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sqlserver" | "mssql" => Some(Dialect::SqlServer),
            "postgresql" | "postgres" | "pg" => Some(Dialect::Postgres),
            "mysql" => Some(Dialect::MySql),
            "oracle" => Some(Dialect::Oracle),
            "sqlite" => Some(Dialect::Sqlite),
            _ => None,
        }
    }

    /// The default/implicit schema namespace for this dialect.
    pub fn default_schema(&self) -> &'static str {
        match self {
            Dialect::SqlServer => "dbo",
            Dialect::Postgres => "public",
            Dialect::MySql => "",
            Dialect::Oracle => "SYSTEM",
            Dialect::Sqlite => "",
        }
    }

    /// Maximum length of an unquoted identifier for this dialect.
    ///
    /// PostgreSQL and MySQL use their documented limits (63 and 64
    /// bytes); SQL Server, SQLite and Oracle (from 12.2 onward) share the
    /// 128-character limit. See DESIGN.md for the Oracle version
    /// assumption.
    pub fn max_identifier_length(&self) -> usize {
        match self {
            Dialect::SqlServer => 128,
            Dialect::Postgres => 63,
            Dialect::MySql => 64,
            Dialect::Oracle => 128,
            Dialect::Sqlite => 128,
        }
    }

    /// Quote a bare identifier using this dialect's quoting convention.
    pub fn quote(&self, name: &str) -> String {
        match self {
            Dialect::SqlServer => format!("[{name}]"),
            Dialect::Postgres => format!("\"{name}\""),
            Dialect::MySql => format!("`{name}`"),
            Dialect::Oracle => format!("\"{name}\""),
            Dialect::Sqlite => format!("[{name}]"),
        }
    }

    /// Render `schema.identifier`, qualifying only when `schema` is set
    /// and differs from the dialect's implicit default.
    pub fn quote_qualified(&self, schema: Option<&str>, name: &str) -> String {
        match schema {
            Some(s) if !s.is_empty() && s != self.default_schema() => {
                format!("{}.{}", self.quote(s), self.quote(name))
            }
            _ => self.quote(name),
        }
    }

    pub fn is_reserved_word(&self, identifier: &str) -> bool {
        reserved_words(*self).contains(&identifier.to_ascii_uppercase().as_str())
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Dialect::SqlServer => "sqlserver",
            Dialect::Postgres => "postgresql",
            Dialect::MySql => "mysql",
            Dialect::Oracle => "oracle",
            Dialect::Sqlite => "sqlite",
        };
        f.write_str(s)
    }
}

/// A small, representative reserved-word list per dialect — enough to
/// exercise the "reserved word used as a column name" warning path.
/// Not exhaustive; exhaustive lists belong to an external catalog, not
/// this core.
fn reserved_words(dialect: Dialect) -> &'static [&'static str] {
    const COMMON: &[&str] = &[
        "SELECT", "TABLE", "ORDER", "GROUP", "WHERE", "INDEX", "KEY", "PRIMARY", "FOREIGN",
        "UNIQUE", "CHECK", "DEFAULT", "NULL", "VALUES", "FROM", "JOIN", "UNION", "USER",
    ];
    match dialect {
        Dialect::SqlServer => COMMON,
        Dialect::Postgres => COMMON,
        Dialect::MySql => COMMON,
        Dialect::Oracle => COMMON,
        Dialect::Sqlite => COMMON,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_matches_dialect_convention() {
        assert_eq!(Dialect::SqlServer.quote("User"), "[User]");
        assert_eq!(Dialect::Postgres.quote("User"), "\"User\"");
        assert_eq!(Dialect::MySql.quote("User"), "`User`");
        assert_eq!(Dialect::Oracle.quote("User"), "\"User\"");
        assert_eq!(Dialect::Sqlite.quote("User"), "[User]");
    }

    #[test]
    fn qualified_name_omits_default_schema() {
        assert_eq!(
            Dialect::SqlServer.quote_qualified(Some("dbo"), "User"),
            "[User]"
        );
        assert_eq!(
            Dialect::SqlServer.quote_qualified(Some("sales"), "User"),
            "[sales].[User]"
        );
        assert_eq!(Dialect::Postgres.quote_qualified(None, "User"), "\"User\"");
    }

    #[test]
    fn parse_accepts_known_aliases() {
        assert_eq!(Dialect::parse("postgres"), Some(Dialect::Postgres));
        assert_eq!(Dialect::parse("mssql"), Some(Dialect::SqlServer));
        assert_eq!(Dialect::parse("nope"), None);
    }

    #[test]
    fn reserved_word_detection_is_case_insensitive() {
        assert!(Dialect::Postgres.is_reserved_word("select"));
        assert!(!Dialect::Postgres.is_reserved_word("widget_count"));
    }
}
