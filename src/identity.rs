//! Identity resolver (§3, §6): folds a commit signature `(name, email)`
//! into a canonical, stable [`AuthorIndex`].
//!
//! spec.md treats the resolver as an external collaborator and specifies
//! only its contract (`(name, email) -> author index | MISSING`). This is
//! a deliberately simple, deterministic first-seen-order policy with no
//! `.mailmap` support — see DESIGN.md for why that Open Question is
//! resolved this way.

use std::collections::HashMap;

use crate::ir::{AuthorIndex, MISSING_AUTHOR};

#[derive(Debug, Default)]
pub struct IdentityResolver {
    by_key: HashMap<String, AuthorIndex>,
    names: Vec<String>,
}

impl IdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonicalizes on lowercased email when present, falling back to
    /// lowercased name; a signature with neither resolves to `MISSING`.
    fn canonical_key(name: &str, email: &str) -> Option<String> {
        let email = email.trim();
        if !email.is_empty() {
            return Some(email.to_lowercase());
        }
        let name = name.trim();
        if !name.is_empty() {
            return Some(format!("name:{}", name.to_lowercase()));
        }
        None
    }

    /// Resolves `(name, email)` to a stable author index, assigning a
    /// fresh one the first time a canonical key is seen.
    pub fn resolve(&mut self, name: &str, email: &str) -> AuthorIndex {
        let Some(key) = Self::canonical_key(name, email) else {
            return MISSING_AUTHOR;
        };
        if let Some(&idx) = self.by_key.get(&key) {
            return idx;
        }
        let idx = self.names.len() as AuthorIndex;
        self.names.push(name.to_string());
        self.by_key.insert(key, idx);
        idx
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name_of(&self, author: AuthorIndex) -> Option<&str> {
        self.names.get(author as usize).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_email_resolves_to_same_author_regardless_of_case() {
        let mut r = IdentityResolver::new();
        let a = r.resolve("Ada Lovelace", "ADA@example.com");
        let b = r.resolve("A. Lovelace", "ada@example.com");
        assert_eq!(a, b);
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn distinct_emails_get_distinct_authors() {
        let mut r = IdentityResolver::new();
        let a = r.resolve("Ada", "ada@example.com");
        let b = r.resolve("Bob", "bob@example.com");
        assert_ne!(a, b);
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn empty_signature_is_missing() {
        let mut r = IdentityResolver::new();
        assert_eq!(r.resolve("", ""), MISSING_AUTHOR);
        assert_eq!(r.len(), 0);
    }

    #[test]
    fn falls_back_to_name_when_email_absent() {
        let mut r = IdentityResolver::new();
        let a = r.resolve("Ada Lovelace", "");
        let b = r.resolve("Ada Lovelace", "");
        assert_eq!(a, b);
    }
}
