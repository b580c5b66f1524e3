//! Minimal SQL text inspection.

use once_cell::sync::Lazy;
use regex::Regex;

/// Leading whitespace and comments, then the `call` keyword.
#[allow(clippy::expect_used)]
static CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^(?:\s+|--[^\n]*(?:\n|$)|/\*.*?\*/)*call\b").expect("valid call regex")
});

/// Whether `sql` is a stored-procedure call.
#[must_use]
pub fn is_call(sql: &str) -> bool {
    CALL.is_match(sql)
}

/// Quote an identifier, doubling embedded quotes.
#[must_use]
pub fn quote_identifier(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_call() {
        assert!(is_call("call p(?)"));
        assert!(is_call("  CALL p"));
        assert!(is_call("-- comment\ncall p"));
        assert!(is_call("/* multi\nline */ Call p()"));
        assert!(!is_call("select * from callers"));
        assert!(!is_call("caller()"));
        assert!(!is_call("insert into t values (1)"));
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("MY_SCHEMA"), "\"MY_SCHEMA\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }
}
