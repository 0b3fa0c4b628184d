//! Savepoints for nested transactions
//!
//! A savepoint is a named point within an open transaction that can be rolled back
//! to without aborting the entire transaction. Nested transaction scopes map one to
//! one onto savepoints: depth 1 is the real transaction, every deeper level owns one
//! savepoint.

/// Prefix used for every generated savepoint name.
const SAVEPOINT_PREFIX: &str = "docket_sp";

/// A savepoint within a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Savepoint {
    /// The name of the savepoint
    name: String,
    /// Transaction depth this savepoint opened
    depth: usize,
}

impl Savepoint {
    /// Create a savepoint with an explicit name.
    ///
    /// Names must be plain identifiers (ASCII alphanumerics and underscores) because
    /// they are interpolated into SQL.
    pub fn new(name: impl Into<String>, depth: usize) -> Self {
        Self {
            name: name.into(),
            depth,
        }
    }

    /// The savepoint that opens nesting level `depth` (2 for the first nested scope).
    pub fn for_depth(depth: usize) -> Self {
        Self::new(format!("{}_{}", SAVEPOINT_PREFIX, depth), depth)
    }

    /// Get the name of the savepoint.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the nesting level this savepoint opened.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Check that the name is safe to interpolate into SQL.
    pub fn is_valid_name(&self) -> bool {
        !self.name.is_empty()
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    /// `SAVEPOINT <name>`
    pub fn create_sql(&self) -> String {
        format!("SAVEPOINT {}", self.name)
    }

    /// `RELEASE SAVEPOINT <name>`
    pub fn release_sql(&self) -> String {
        format!("RELEASE SAVEPOINT {}", self.name)
    }

    /// `ROLLBACK TO SAVEPOINT <name>`
    ///
    /// The savepoint stays on the stack afterwards and must still be released.
    pub fn rollback_to_sql(&self) -> String {
        format!("ROLLBACK TO SAVEPOINT {}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_savepoint_new() {
        let sp = Savepoint::new("test_savepoint", 2);
        assert_eq!(sp.name(), "test_savepoint");
        assert_eq!(sp.depth(), 2);
    }

    #[test]
    fn test_savepoint_for_depth() {
        let sp = Savepoint::for_depth(3);
        assert_eq!(sp.name(), "docket_sp_3");
        assert_eq!(sp.depth(), 3);
        assert!(sp.is_valid_name());
    }

    #[test]
    fn test_savepoint_sql() {
        let sp = Savepoint::for_depth(2);
        assert_eq!(sp.create_sql(), "SAVEPOINT docket_sp_2");
        assert_eq!(sp.release_sql(), "RELEASE SAVEPOINT docket_sp_2");
        assert_eq!(sp.rollback_to_sql(), "ROLLBACK TO SAVEPOINT docket_sp_2");
    }

    #[test]
    fn test_savepoint_rejects_unsafe_names() {
        assert!(!Savepoint::new("sp; DROP TABLE documents", 2).is_valid_name());
        assert!(!Savepoint::new("", 2).is_valid_name());
    }

    #[test]
    fn test_savepoint_equality() {
        assert_eq!(Savepoint::for_depth(2), Savepoint::new("docket_sp_2", 2));
        assert_ne!(Savepoint::for_depth(2), Savepoint::for_depth(3));
    }
}
