//! Built-in SQL Server type map
//!
//! Same row shape as the MySQL table. Identity columns arrive with the
//! auto-increment flag set and map to serial types.

/// `(from, autoinc, to, fixed_length)` rows for the registry.
pub(crate) fn builtin_type_map() -> &'static [(&'static str, bool, &'static str, i32)] {
    &[
        // integers
        ("TINYINT", false, "SMALLINT", 0),
        ("SMALLINT", false, "SMALLINT", 0),
        ("INT", false, "INT", 0),
        ("BIGINT", false, "BIGINT", 0),
        ("SMALLINT", true, "SMALLSERIAL", 0),
        ("INT", true, "SERIAL", 0),
        ("BIGINT", true, "BIGSERIAL", 0),
        // exact and floating point
        ("DECIMAL", false, "NUMERIC", -1),
        ("NUMERIC", false, "NUMERIC", -1),
        ("MONEY", false, "MONEY", 0),
        ("SMALLMONEY", false, "MONEY", 0),
        ("FLOAT", false, "DOUBLE PRECISION", 0),
        ("REAL", false, "REAL", 0),
        // bit
        ("BIT", false, "BOOLEAN", 0),
        // temporal
        ("DATE", false, "DATE", 0),
        ("TIME", false, "TIME", -1),
        ("DATETIME", false, "TIMESTAMP", -1),
        ("DATETIME2", false, "TIMESTAMP", -1),
        ("SMALLDATETIME", false, "TIMESTAMP", 0),
        ("DATETIMEOFFSET", false, "TIMESTAMPTZ", -1),
        // character
        ("CHAR", false, "CHAR", -1),
        ("NCHAR", false, "CHAR", -1),
        ("VARCHAR", false, "VARCHAR", -1),
        ("NVARCHAR", false, "VARCHAR", -1),
        ("TEXT", false, "TEXT", 0),
        ("NTEXT", false, "TEXT", 0),
        ("XML", false, "TEXT", 0),
        // binary
        ("BINARY", false, "BYTEA", 0),
        ("VARBINARY", false, "BYTEA", 0),
        ("IMAGE", false, "BYTEA", 0),
        // special
        ("UNIQUEIDENTIFIER", false, "UUID", 0),
    ]
}
