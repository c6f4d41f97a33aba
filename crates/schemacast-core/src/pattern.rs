//! Tenant-name pattern translation.
//!
//! Callers supply glob-like patterns (`cmp_*`); the catalog query speaks
//! SQL `LIKE`. `%` is already valid and passes through unchanged.

/// Translate a glob-like tenant pattern into a SQL `LIKE` pattern.
pub fn to_like_pattern(pattern: &str) -> String {
    pattern.replace('*', "%")
}
