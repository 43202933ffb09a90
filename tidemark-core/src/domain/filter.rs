// tidemark-core/src/domain/filter.rs

// Include/exclude rules over `schema.table` identifiers.

use regex::Regex;

use crate::domain::error::DomainError;
use crate::ports::IdentifierCase;

#[derive(Debug, Clone)]
enum Segment {
    Any,
    Exact(String),
    Glob(Regex),
}

impl Segment {
    fn parse(raw: &str, case: IdentifierCase, pattern: &str) -> Result<Self, DomainError> {
        if raw.is_empty() {
            return Err(DomainError::InvalidPattern(pattern.to_string()));
        }
        if raw == "*" {
            return Ok(Segment::Any);
        }
        let raw = case.apply(raw);
        if !raw.contains('*') {
            return Ok(Segment::Exact(raw));
        }
        let body = raw
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        Regex::new(&format!("^{body}$"))
            .map(Segment::Glob)
            .map_err(|_| DomainError::InvalidPattern(pattern.to_string()))
    }

    fn matches(&self, value: &str) -> bool {
        match self {
            Segment::Any => true,
            Segment::Exact(expected) => expected == value,
            Segment::Glob(re) => re.is_match(value),
        }
    }
}

/// One `schema.table` rule. Either side may be `*` or contain `*` wildcards;
/// anything else is compared case-sensitively.
#[derive(Debug, Clone)]
pub struct TablePattern {
    schema: Segment,
    table: Segment,
}

impl TablePattern {
    pub fn parse(pattern: &str, case: IdentifierCase) -> Result<Self, DomainError> {
        let (schema, table) = pattern
            .split_once('.')
            .ok_or_else(|| DomainError::InvalidPattern(pattern.to_string()))?;
        Ok(Self {
            schema: Segment::parse(schema.trim(), case, pattern)?,
            table: Segment::parse(table.trim(), case, pattern)?,
        })
    }

    pub fn matches(&self, schema: &str, table: &str) -> bool {
        self.schema.matches(schema) && self.table.matches(table)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TableFilter {
    include: Vec<TablePattern>,
    exclude: Vec<TablePattern>,
}

impl TableFilter {
    pub fn new(
        include: &[String],
        exclude: &[String],
        case: IdentifierCase,
    ) -> Result<Self, DomainError> {
        let compile = |patterns: &[String]| -> Result<Vec<TablePattern>, DomainError> {
            patterns
                .iter()
                .map(|p| TablePattern::parse(p, case))
                .collect()
        };
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    /// Include first (when any include rule exists), then exclude.
    pub fn matches(&self, schema: &str, table: &str) -> bool {
        if !self.include.is_empty() && !self.include.iter().any(|p| p.matches(schema, table)) {
            return false;
        }
        !self.exclude.iter().any(|p| p.matches(schema, table))
    }
}

/// Stateless form of [`TableFilter::matches`] for callers holding raw pattern lists.
pub fn matches(
    schema: &str,
    table: &str,
    include: &[String],
    exclude: &[String],
) -> Result<bool, DomainError> {
    Ok(TableFilter::new(include, exclude, IdentifierCase::AsIs)?.matches(schema, table))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_no_patterns_matches_everything() -> Result<()> {
        assert!(matches("main", "users", &[], &[])?);
        assert!(matches("any", "thing", &[], &[])?);
        Ok(())
    }

    #[test]
    fn test_include_restricts() -> Result<()> {
        let include = strings(&["main.users"]);
        assert!(matches("main", "users", &include, &[])?);
        assert!(!matches("main", "orders", &include, &[])?);
        assert!(!matches("other", "users", &include, &[])?);
        Ok(())
    }

    #[test]
    fn test_exclude_applies_after_include() -> Result<()> {
        let include = strings(&["main.*"]);
        let exclude = strings(&["*.orders"]);
        assert!(matches("main", "users", &include, &exclude)?);
        assert!(!matches("main", "orders", &include, &exclude)?);
        // Not included at all, exclude is irrelevant
        assert!(!matches("staging", "users", &include, &exclude)?);
        Ok(())
    }

    #[test]
    fn test_exclude_only() -> Result<()> {
        let exclude = strings(&["tmp.*"]);
        assert!(!matches("tmp", "scratch", &[], &exclude)?);
        assert!(matches("main", "scratch", &[], &exclude)?);
        Ok(())
    }

    #[test]
    fn test_exact_segments_are_case_sensitive() -> Result<()> {
        let include = strings(&["MAIN.USERS"]);
        assert!(!matches("main", "users", &include, &[])?);
        assert!(matches("MAIN", "USERS", &include, &[])?);
        Ok(())
    }

    #[test]
    fn test_partial_wildcards() -> Result<()> {
        let include = strings(&["analytics.fct_*"]);
        assert!(matches("analytics", "fct_orders", &include, &[])?);
        assert!(!matches("analytics", "dim_users", &include, &[])?);
        // Regex metacharacters in names are literal
        let include = strings(&["a.b+c"]);
        assert!(matches("a", "b+c", &include, &[])?);
        assert!(!matches("a", "bbc", &include, &[])?);
        Ok(())
    }

    #[test]
    fn test_upper_case_normalisation() -> Result<()> {
        let filter = TableFilter::new(&strings(&["public.orders"]), &[], IdentifierCase::Upper)?;
        assert!(filter.matches("PUBLIC", "ORDERS"));
        assert!(!filter.matches("public", "orders"));
        Ok(())
    }

    #[test]
    fn test_invalid_patterns_are_rejected() {
        assert!(TablePattern::parse("no_dot", IdentifierCase::AsIs).is_err());
        assert!(TablePattern::parse(".users", IdentifierCase::AsIs).is_err());
        assert!(TablePattern::parse("main.", IdentifierCase::AsIs).is_err());
    }

    #[test]
    fn test_table_names_may_contain_dots() -> Result<()> {
        let include = strings(&["main.events.2024"]);
        assert!(matches("main", "events.2024", &include, &[])?);
        Ok(())
    }
}
