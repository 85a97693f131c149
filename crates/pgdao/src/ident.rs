//! Safe SQL identifier validation.
//!
//! Table, column, and alias names entering a builder from outside generated
//! code are validated here so they cannot smuggle SQL fragments. An
//! identifier is one or more dot-separated parts, each matching
//! `[A-Za-z_][A-Za-z0-9_$]*`.

use crate::error::{DaoError, DaoResult};

fn part_is_valid(part: &str) -> bool {
    let mut chars = part.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c == '$' || c.is_ascii_alphanumeric())
}

/// Check whether `name` is a valid (possibly dotted) identifier.
pub fn is_valid(name: &str) -> bool {
    !name.is_empty() && name.split('.').all(part_is_valid)
}

/// Validate an identifier, returning an [`DaoError::Invalid`] on failure.
pub fn validate(name: &str) -> DaoResult<()> {
    if is_valid(name) {
        Ok(())
    } else {
        Err(DaoError::invalid(format!("invalid identifier: {name:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ident_simple() {
        assert!(is_valid("users"));
        assert!(is_valid("_private"));
        assert!(is_valid("my_var$1"));
    }

    #[test]
    fn ident_dotted() {
        assert!(is_valid("public.users"));
        assert!(is_valid("schema.table.column"));
    }

    #[test]
    fn ident_rejects_empty() {
        assert!(!is_valid(""));
        assert!(validate("").is_err());
    }

    #[test]
    fn ident_rejects_start_digit() {
        assert!(!is_valid("1table"));
    }

    #[test]
    fn ident_rejects_space_and_quotes() {
        assert!(!is_valid("my table"));
        assert!(!is_valid("users; DROP TABLE users"));
        assert!(!is_valid(r#""users""#));
    }

    #[test]
    fn ident_rejects_double_or_trailing_dot() {
        assert!(!is_valid("schema..table"));
        assert!(!is_valid("schema."));
    }
}
