//! Type-mapping registry
//!
//! Resolves a source-native type name to a destination type and length.
//! Built once per connector from the flavor's built-in table, then overlaid
//! with rule-file overrides. Lookup is two-tier: a fully qualified
//! `db.schema.table.column.TYPE` override wins over the global `TYPE` entry;
//! a miss passes the source name through verbatim.

use std::collections::HashMap;
use tracing::debug;

use crate::config::SourceFlavor;
use crate::rules::DatatypeRule;
use crate::{mysql, oracle, sqlserver};

/// A resolved destination type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMapping {
    pub dest_type: String,
    /// `>= 0` replaces the source-declared length; `-1` keeps it
    pub fixed_length: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TypeKey {
    name: String,
    auto_inc: bool,
}

impl TypeKey {
    fn new(name: &str, auto_inc: bool) -> Self {
        Self {
            name: normalize(name),
            auto_inc,
        }
    }
}

/// Uppercase and collapse interior whitespace (`int   unsigned` → `INT UNSIGNED`).
fn normalize(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_uppercase()
}

/// The per-connector registry.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    map: HashMap<TypeKey, TypeMapping>,
}

impl TypeRegistry {
    /// Built-in table for a flavor. Oracle ships no entries: its types pass
    /// through unchanged unless the rule file says otherwise.
    pub fn for_flavor(flavor: SourceFlavor) -> Self {
        let table = match flavor {
            SourceFlavor::MySql => mysql::builtin_type_map(),
            SourceFlavor::SqlServer => sqlserver::builtin_type_map(),
            SourceFlavor::Oracle => oracle::builtin_type_map(),
        };
        let mut map = HashMap::with_capacity(table.len());
        for (from, auto_inc, to, size) in table {
            map.insert(
                TypeKey::new(from, *auto_inc),
                TypeMapping {
                    dest_type: (*to).to_string(),
                    fixed_length: *size,
                },
            );
        }
        Self { map }
    }

    /// Fold rule-file overrides in; later rules overwrite earlier entries.
    pub fn apply_rules(&mut self, rules: &[DatatypeRule]) {
        for rule in rules {
            self.map.insert(
                TypeKey::new(&rule.translate_from, rule.translate_from_autoinc),
                TypeMapping {
                    dest_type: rule.translate_to.clone(),
                    fixed_length: rule.translate_to_size,
                },
            );
        }
    }

    /// Resolve a column's destination type.
    ///
    /// `fq_column` is the fully qualified `db[.schema].table.column` prefix
    /// used for per-column overrides. Bit types of declared width 1 look up
    /// as `TYPE(1)` so they can map to a boolean.
    pub fn resolve(
        &self,
        fq_column: Option<&str>,
        type_name: &str,
        length: i32,
        auto_inc: bool,
    ) -> TypeMapping {
        let lookup_name = effective_name(type_name, length);

        if let Some(prefix) = fq_column {
            let qualified = format!("{prefix}.{lookup_name}");
            if let Some(hit) = self.map.get(&TypeKey::new(&qualified, auto_inc)) {
                return hit.clone();
            }
        }
        if let Some(hit) = self.map.get(&TypeKey::new(&lookup_name, auto_inc)) {
            return hit.clone();
        }
        // auto-increment entries are sparse; retry without the flag
        if auto_inc {
            if let Some(hit) = self.map.get(&TypeKey::new(&lookup_name, false)) {
                return hit.clone();
            }
        }

        debug!(type_name, "no type mapping; passing source type through");
        TypeMapping {
            dest_type: type_name.to_string(),
            fixed_length: -1,
        }
    }
}

fn effective_name(type_name: &str, length: i32) -> String {
    let normalized = normalize(type_name);
    if length == 1 && matches!(normalized.as_str(), "BIT" | "VARBIT" | "BIT VARYING") {
        format!("{normalized}(1)")
    } else {
        normalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mysql_int_maps_to_int() {
        let reg = TypeRegistry::for_flavor(SourceFlavor::MySql);
        let m = reg.resolve(None, "INT", 0, false);
        assert_eq!(m.dest_type, "INT");
    }

    #[test]
    fn test_mysql_autoinc_int_maps_to_serial() {
        let reg = TypeRegistry::for_flavor(SourceFlavor::MySql);
        assert_eq!(reg.resolve(None, "INT", 0, true).dest_type, "SERIAL");
        assert_eq!(reg.resolve(None, "BIGINT", 0, true).dest_type, "BIGSERIAL");
        assert_eq!(
            reg.resolve(None, "SMALLINT", 0, true).dest_type,
            "SMALLSERIAL"
        );
    }

    #[test]
    fn test_bit_width_one_is_boolean() {
        let reg = TypeRegistry::for_flavor(SourceFlavor::MySql);
        assert_eq!(reg.resolve(None, "BIT", 1, false).dest_type, "BOOLEAN");
        assert_eq!(reg.resolve(None, "BIT", 8, false).dest_type, "BIT");
    }

    #[test]
    fn test_enum_drops_length() {
        let reg = TypeRegistry::for_flavor(SourceFlavor::MySql);
        let m = reg.resolve(None, "ENUM", 7, false);
        assert_eq!(m.dest_type, "TEXT");
        assert_eq!(m.fixed_length, 0);
    }

    #[test]
    fn test_unknown_type_passes_through() {
        let reg = TypeRegistry::for_flavor(SourceFlavor::MySql);
        let m = reg.resolve(None, "HIERARCHYID", 0, false);
        assert_eq!(m.dest_type, "HIERARCHYID");
        assert_eq!(m.fixed_length, -1);
    }

    #[test]
    fn test_oracle_is_passthrough() {
        let reg = TypeRegistry::for_flavor(SourceFlavor::Oracle);
        assert_eq!(reg.resolve(None, "NUMBER", 0, false).dest_type, "NUMBER");
    }

    #[test]
    fn test_rule_override_beats_builtin() {
        let mut reg = TypeRegistry::for_flavor(SourceFlavor::MySql);
        reg.apply_rules(&[DatatypeRule {
            translate_from: "GEOMETRY".into(),
            translate_from_autoinc: false,
            translate_to: "geometry".into(),
            translate_to_size: -1,
        }]);
        assert_eq!(reg.resolve(None, "GEOMETRY", 0, false).dest_type, "geometry");
    }

    #[test]
    fn test_per_column_override_beats_global() {
        let mut reg = TypeRegistry::for_flavor(SourceFlavor::MySql);
        reg.apply_rules(&[DatatypeRule {
            translate_from: "inv.orders.flags.TINYINT".into(),
            translate_from_autoinc: false,
            translate_to: "BOOLEAN".into(),
            translate_to_size: 0,
        }]);
        assert_eq!(
            reg.resolve(Some("inv.orders.flags"), "TINYINT", 0, false)
                .dest_type,
            "BOOLEAN"
        );
        assert_eq!(
            reg.resolve(Some("inv.orders.other"), "TINYINT", 0, false)
                .dest_type,
            "SMALLINT"
        );
    }

    #[test]
    fn test_unsigned_normalization() {
        let reg = TypeRegistry::for_flavor(SourceFlavor::MySql);
        assert_eq!(reg.resolve(None, "int  unsigned", 0, false).dest_type, "INT");
    }
}
