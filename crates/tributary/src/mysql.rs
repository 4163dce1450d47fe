//! Built-in MySQL type map
//!
//! Entries are `(source type, auto_incremented, destination type, fixed
//! length)`. A fixed length of `-1` keeps the length declared by the source;
//! `0` suppresses it. `UNSIGNED` variants map like their signed forms — the
//! DDL translator adds a non-negative check constraint for them separately.

/// `(from, autoinc, to, fixed_length)` rows for the registry.
pub(crate) fn builtin_type_map() -> &'static [(&'static str, bool, &'static str, i32)] {
    &[
        // integers
        ("TINYINT", false, "SMALLINT", 0),
        ("TINYINT UNSIGNED", false, "SMALLINT", 0),
        ("SMALLINT", false, "SMALLINT", 0),
        ("SMALLINT UNSIGNED", false, "INT", 0),
        ("MEDIUMINT", false, "INT", 0),
        ("MEDIUMINT UNSIGNED", false, "INT", 0),
        ("INT", false, "INT", 0),
        ("INT UNSIGNED", false, "BIGINT", 0),
        ("INTEGER", false, "INT", 0),
        ("BIGINT", false, "BIGINT", 0),
        ("BIGINT UNSIGNED", false, "NUMERIC", -1),
        // auto-increment integers
        ("SMALLINT", true, "SMALLSERIAL", 0),
        ("INT", true, "SERIAL", 0),
        ("INTEGER", true, "SERIAL", 0),
        ("BIGINT", true, "BIGSERIAL", 0),
        // exact and floating point
        ("DECIMAL", false, "NUMERIC", -1),
        ("DECIMAL UNSIGNED", false, "NUMERIC", -1),
        ("NUMERIC", false, "NUMERIC", -1),
        ("FLOAT", false, "REAL", 0),
        ("FLOAT UNSIGNED", false, "REAL", 0),
        ("DOUBLE", false, "DOUBLE PRECISION", 0),
        ("DOUBLE UNSIGNED", false, "DOUBLE PRECISION", 0),
        // bits
        ("BIT(1)", false, "BOOLEAN", 0),
        ("BIT", false, "BIT", -1),
        ("BOOLEAN", false, "BOOLEAN", 0),
        // temporal
        ("DATE", false, "DATE", 0),
        ("TIME", false, "TIME", -1),
        ("DATETIME", false, "TIMESTAMP", -1),
        ("TIMESTAMP", false, "TIMESTAMPTZ", -1),
        ("YEAR", false, "INT", 0),
        // character
        ("CHAR", false, "CHAR", -1),
        ("VARCHAR", false, "VARCHAR", -1),
        ("TINYTEXT", false, "TEXT", 0),
        ("TEXT", false, "TEXT", 0),
        ("MEDIUMTEXT", false, "TEXT", 0),
        ("LONGTEXT", false, "TEXT", 0),
        // binary
        ("BINARY", false, "BYTEA", 0),
        ("VARBINARY", false, "BYTEA", 0),
        ("TINYBLOB", false, "BYTEA", 0),
        ("BLOB", false, "BYTEA", 0),
        ("MEDIUMBLOB", false, "BYTEA", 0),
        ("LONGBLOB", false, "BYTEA", 0),
        // structured and special
        ("JSON", false, "JSONB", 0),
        ("ENUM", false, "TEXT", 0),
        ("SET", false, "TEXT", 0),
        ("GEOMETRY", false, "TEXT", 0),
        ("GEOMETRYCOLLECTION", false, "TEXT", 0),
        ("POINT", false, "TEXT", 0),
        ("LINESTRING", false, "TEXT", 0),
        ("POLYGON", false, "TEXT", 0),
        ("MULTIPOINT", false, "TEXT", 0),
        ("MULTILINESTRING", false, "TEXT", 0),
        ("MULTIPOLYGON", false, "TEXT", 0),
    ]
}
