//! Abstract type → dialect SQL type mapping.

use schemist_dialect::Dialect;

/// Length/precision/scale/identity context for a single property, as
/// carried on `DiscoveredProperty` — kept here as a plain struct instead
/// of depending on `schemist-entity-model` so this crate stays a leaf.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeOptions {
    pub max_length: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub identity: bool,
}

/// Abstract default-value tokens recognized across all languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultToken {
    Now,
    Uuid,
}

impl DefaultToken {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "NOW()" => Some(DefaultToken::Now),
            "UUID()" => Some(DefaultToken::Uuid),
            _ => None,
        }
    }
}

/// Map an abstract type token (already lower-cased by the caller) to the
/// dialect's rendered SQL type string, honoring length/precision/scale
/// overrides and identity rendering.
pub fn map_type(dialect: Dialect, abstract_type: &str, opts: TypeOptions) -> String {
    let token = abstract_type.to_ascii_lowercase();

    if opts.identity && matches!(token.as_str(), "int" | "int32" | "short") {
        return render_identity(dialect, IntWidth::ThirtyTwo);
    }
    if opts.identity && token == "int64" {
        return render_identity(dialect, IntWidth::SixtyFour);
    }

    match token.as_str() {
        "int" | "int32" => int_type(dialect, IntWidth::ThirtyTwo),
        "int64" => int_type(dialect, IntWidth::SixtyFour),
        "short" => short_type(dialect),
        "byte" => byte_type(dialect),
        "bool" => bool_type(dialect),
        "string" => string_type(dialect, opts.max_length),
        "datetime" => datetime_type(dialect),
        "decimal" => decimal_type(dialect, opts.precision, opts.scale),
        "double" => double_type(dialect),
        "float" => float_type(dialect),
        "guid" | "uuid" => uuid_type(dialect),
        _ => widest_string_type(dialect),
    }
}

enum IntWidth {
    ThirtyTwo,
    SixtyFour,
}

fn render_identity(dialect: Dialect, width: IntWidth) -> String {
    match (dialect, width) {
        (Dialect::SqlServer, IntWidth::ThirtyTwo) => "INT IDENTITY(1,1)".to_string(),
        (Dialect::SqlServer, IntWidth::SixtyFour) => "BIGINT IDENTITY(1,1)".to_string(),
        (Dialect::Postgres, IntWidth::ThirtyTwo) => "SERIAL".to_string(),
        (Dialect::Postgres, IntWidth::SixtyFour) => "BIGSERIAL".to_string(),
        (Dialect::MySql, IntWidth::ThirtyTwo) => "INT AUTO_INCREMENT".to_string(),
        (Dialect::MySql, IntWidth::SixtyFour) => "BIGINT AUTO_INCREMENT".to_string(),
        (Dialect::Sqlite, _) => "INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
        (Dialect::Oracle, _) => "NUMBER GENERATED BY DEFAULT AS IDENTITY".to_string(),
    }
}

fn int_type(dialect: Dialect, width: IntWidth) -> String {
    match (dialect, width) {
        (Dialect::SqlServer, IntWidth::ThirtyTwo) => "INT",
        (Dialect::SqlServer, IntWidth::SixtyFour) => "BIGINT",
        (Dialect::Postgres, IntWidth::ThirtyTwo) => "INTEGER",
        (Dialect::Postgres, IntWidth::SixtyFour) => "BIGINT",
        (Dialect::MySql, IntWidth::ThirtyTwo) => "INT",
        (Dialect::MySql, IntWidth::SixtyFour) => "BIGINT",
        (Dialect::Oracle, IntWidth::ThirtyTwo) => "NUMBER(10)",
        (Dialect::Oracle, IntWidth::SixtyFour) => "NUMBER(19)",
        (Dialect::Sqlite, _) => "INTEGER",
    }
    .to_string()
}

fn short_type(dialect: Dialect) -> String {
    match dialect {
        Dialect::SqlServer => "SMALLINT",
        Dialect::Postgres => "SMALLINT",
        Dialect::MySql => "SMALLINT",
        Dialect::Oracle => "NUMBER(5)",
        Dialect::Sqlite => "INTEGER",
    }
    .to_string()
}

fn byte_type(dialect: Dialect) -> String {
    match dialect {
        Dialect::SqlServer => "TINYINT",
        Dialect::Postgres => "SMALLINT",
        Dialect::MySql => "TINYINT UNSIGNED",
        Dialect::Oracle => "NUMBER(3)",
        Dialect::Sqlite => "INTEGER",
    }
    .to_string()
}

fn bool_type(dialect: Dialect) -> String {
    match dialect {
        Dialect::SqlServer => "BIT",
        Dialect::Postgres => "BOOLEAN",
        Dialect::MySql => "TINYINT(1)",
        Dialect::Oracle => "NUMBER(1)",
        Dialect::Sqlite => "INTEGER",
    }
    .to_string()
}

fn string_type(dialect: Dialect, max_length: Option<u32>) -> String {
    match max_length {
        Some(n) => match dialect {
            Dialect::SqlServer => format!("NVARCHAR({n})"),
            Dialect::Postgres => format!("VARCHAR({n})"),
            Dialect::MySql => format!("VARCHAR({n})"),
            Dialect::Oracle => format!("VARCHAR2({n})"),
            Dialect::Sqlite => format!("VARCHAR({n})"),
        },
        None => match dialect {
            Dialect::SqlServer => "NVARCHAR(MAX)".to_string(),
            Dialect::Postgres => "TEXT".to_string(),
            Dialect::MySql => "TEXT".to_string(),
            Dialect::Oracle => "CLOB".to_string(),
            Dialect::Sqlite => "TEXT".to_string(),
        },
    }
}

fn datetime_type(dialect: Dialect) -> String {
    match dialect {
        Dialect::SqlServer => "DATETIME2",
        Dialect::Postgres => "TIMESTAMP",
        Dialect::MySql => "DATETIME",
        Dialect::Oracle => "TIMESTAMP",
        Dialect::Sqlite => "TEXT",
    }
    .to_string()
}

fn decimal_type(dialect: Dialect, precision: Option<u32>, scale: Option<u32>) -> String {
    let (p, s) = (precision.unwrap_or(18), scale.unwrap_or(2));
    match dialect {
        Dialect::Sqlite => "NUMERIC".to_string(),
        _ => format!("DECIMAL({p},{s})"),
    }
}

fn double_type(dialect: Dialect) -> String {
    match dialect {
        Dialect::SqlServer => "FLOAT",
        Dialect::Postgres => "DOUBLE PRECISION",
        Dialect::MySql => "DOUBLE",
        Dialect::Oracle => "BINARY_DOUBLE",
        Dialect::Sqlite => "REAL",
    }
    .to_string()
}

fn float_type(dialect: Dialect) -> String {
    match dialect {
        Dialect::SqlServer => "REAL",
        Dialect::Postgres => "REAL",
        Dialect::MySql => "FLOAT",
        Dialect::Oracle => "BINARY_FLOAT",
        Dialect::Sqlite => "REAL",
    }
    .to_string()
}

fn uuid_type(dialect: Dialect) -> String {
    match dialect {
        Dialect::SqlServer => "UNIQUEIDENTIFIER",
        Dialect::Postgres => "UUID",
        Dialect::MySql => "CHAR(36)",
        Dialect::Oracle => "RAW(16)",
        Dialect::Sqlite => "TEXT",
    }
    .to_string()
}

fn widest_string_type(dialect: Dialect) -> String {
    match dialect {
        Dialect::SqlServer => "NVARCHAR(255)",
        Dialect::Postgres => "VARCHAR(255)",
        Dialect::MySql => "VARCHAR(255)",
        Dialect::Oracle => "VARCHAR2(255)",
        Dialect::Sqlite => "TEXT",
    }
    .to_string()
}

/// Render a normalized default-value token for the given dialect and
/// underlying type (used for `NOW()`/`UUID()`, never for literal
/// defaults which pass through the Emitter untouched).
pub fn render_default_token(dialect: Dialect, token: DefaultToken) -> String {
    match (dialect, token) {
        (Dialect::SqlServer, DefaultToken::Now) => "GETUTCDATE()".to_string(),
        (Dialect::Postgres, DefaultToken::Now) => "CURRENT_TIMESTAMP".to_string(),
        (Dialect::MySql, DefaultToken::Now) => "CURRENT_TIMESTAMP".to_string(),
        (Dialect::Oracle, DefaultToken::Now) => "SYSDATE".to_string(),
        (Dialect::Sqlite, DefaultToken::Now) => "datetime('now')".to_string(),
        (Dialect::SqlServer, DefaultToken::Uuid) => "NEWID()".to_string(),
        (Dialect::Postgres, DefaultToken::Uuid) => "gen_random_uuid()".to_string(),
        (Dialect::MySql, DefaultToken::Uuid) => "UUID()".to_string(),
        (Dialect::Oracle, DefaultToken::Uuid) => "SYS_GUID()".to_string(),
        (Dialect::Sqlite, DefaultToken::Uuid) => "(lower(hex(randomblob(16))))".to_string(),
    }
}

/// Normalize a raw default-value string: rewrite recognized abstract
/// tokens, pass everything else through untouched.
pub fn normalize_default(dialect: Dialect, raw: &str) -> String {
    match DefaultToken::parse(raw) {
        Some(token) => render_default_token(dialect, token),
        None => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_rendering_is_dialect_specific() {
        assert_eq!(
            map_type(Dialect::SqlServer, "int", TypeOptions { identity: true, ..Default::default() }),
            "INT IDENTITY(1,1)"
        );
        assert_eq!(
            map_type(Dialect::Postgres, "int64", TypeOptions { identity: true, ..Default::default() }),
            "BIGSERIAL"
        );
        assert_eq!(
            map_type(Dialect::Sqlite, "int", TypeOptions { identity: true, ..Default::default() }),
            "INTEGER PRIMARY KEY AUTOINCREMENT"
        );
        assert_eq!(
            map_type(Dialect::Oracle, "int", TypeOptions { identity: true, ..Default::default() }),
            "NUMBER GENERATED BY DEFAULT AS IDENTITY"
        );
    }

    #[test]
    fn length_override_wins_over_default() {
        let opts = TypeOptions { max_length: Some(50), ..Default::default() };
        assert_eq!(map_type(Dialect::SqlServer, "string", opts), "NVARCHAR(50)");
    }

    #[test]
    fn unknown_type_falls_back_to_widest_string() {
        assert_eq!(
            map_type(Dialect::Postgres, "something_bespoke", TypeOptions::default()),
            "VARCHAR(255)"
        );
        assert_eq!(
            map_type(Dialect::Oracle, "something_bespoke", TypeOptions::default()),
            "VARCHAR2(255)"
        );
    }

    #[test]
    fn default_token_normalization() {
        assert_eq!(normalize_default(Dialect::Postgres, "UUID()"), "gen_random_uuid()");
        assert_eq!(normalize_default(Dialect::Sqlite, "NOW()"), "datetime('now')");
        assert_eq!(normalize_default(Dialect::Postgres, "'literal'"), "'literal'");
    }
}
