//! Glob matching for table include lists
//!
//! Connector configs name tables with `*` / `?` wildcards
//! (`inventory.*`, `dbo.order?`). Patterns compile to case-insensitive
//! regexes once at connector start and are matched per event.

use regex::Regex;

/// A compiled include pattern
#[derive(Debug, Clone)]
pub struct TablePattern {
    pattern: String,
    regex: Regex,
    is_wildcard: bool,
}

impl TablePattern {
    /// Compile a glob pattern (`*` = any run, `?` = one char).
    pub fn compile(pattern: &str) -> Result<Self, regex::Error> {
        let is_wildcard = pattern == "*";
        let escaped = regex::escape(pattern);
        let regex_pattern = format!("^{}$", escaped.replace(r"\*", ".*").replace(r"\?", "."));
        let regex = regex::RegexBuilder::new(&regex_pattern)
            .case_insensitive(true)
            .build()?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
            is_wildcard,
        })
    }

    /// Match a qualified `schema.table` name or the bare table name.
    pub fn matches(&self, schema: &str, table: &str) -> bool {
        if self.is_wildcard {
            return true;
        }
        self.regex.is_match(&format!("{schema}.{table}")) || self.regex.is_match(table)
    }

    /// The original pattern text.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

/// The compiled form of a connector's `table_include_list`.
///
/// An empty list admits every table.
#[derive(Debug, Clone, Default)]
pub struct IncludeList {
    patterns: Vec<TablePattern>,
}

impl IncludeList {
    /// Compile a list of glob patterns.
    pub fn compile(patterns: &[String]) -> Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|p| TablePattern::compile(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Whether events for `schema.table` should be processed.
    pub fn admits(&self, schema: &str, table: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|p| p.matches(schema, table))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match_case_insensitive() {
        let p = TablePattern::compile("inventory.orders").unwrap();
        assert!(p.matches("inventory", "orders"));
        assert!(p.matches("INVENTORY", "ORDERS"));
        assert!(!p.matches("inventory", "customers"));
    }

    #[test]
    fn test_schema_wildcard() {
        let p = TablePattern::compile("inventory.*").unwrap();
        assert!(p.matches("inventory", "orders"));
        assert!(p.matches("inventory", "customers"));
        assert!(!p.matches("sales", "orders"));
    }

    #[test]
    fn test_bare_table_pattern() {
        let p = TablePattern::compile("orders").unwrap();
        assert!(p.matches("inventory", "orders"));
        assert!(p.matches("sales", "orders"));
    }

    #[test]
    fn test_question_mark() {
        let p = TablePattern::compile("dbo.order?").unwrap();
        assert!(p.matches("dbo", "orders"));
        assert!(!p.matches("dbo", "order"));
        assert!(!p.matches("dbo", "orderlines"));
    }

    #[test]
    fn test_dot_is_literal() {
        let p = TablePattern::compile("a.b").unwrap();
        assert!(p.matches("a", "b"));
        assert!(!p.matches("axb", ""));
    }

    #[test]
    fn test_empty_include_list_admits_all() {
        let list = IncludeList::compile(&[]).unwrap();
        assert!(list.admits("any", "thing"));
        assert!(list.is_empty());
    }

    #[test]
    fn test_include_list() {
        let list =
            IncludeList::compile(&["inventory.*".to_string(), "audit_log".to_string()]).unwrap();
        assert!(list.admits("inventory", "orders"));
        assert!(list.admits("sales", "audit_log"));
        assert!(!list.admits("sales", "orders"));
    }
}
