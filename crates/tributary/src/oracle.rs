//! Oracle type handling
//!
//! Oracle ships no built-in entries: every type passes through unchanged
//! unless a rule-file override says otherwise. The passthrough covers the
//! common case of an Oracle-compatible destination; anything else belongs
//! in the user's `transform_datatype_rules`.

/// `(from, autoinc, to, fixed_length)` rows for the registry.
pub(crate) fn builtin_type_map() -> &'static [(&'static str, bool, &'static str, i32)] {
    &[]
}
