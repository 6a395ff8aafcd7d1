//! Wildcard patterns for SKU matching.

use serde::{Deserialize, Serialize};

/// A SKU pattern with SQL-style (`%`, `_`) or glob-style (`*`, `?`) wildcards.
///
/// `%` and `*` match any run of characters (including none), `_` and `?`
/// match exactly one character. Everything else matches literally and
/// case-sensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SkuPattern(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Any,
    One,
    Lit(char),
}

impl SkuPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn tokens(&self) -> Vec<Token> {
        self.0
            .chars()
            .map(|c| match c {
                '%' | '*' => Token::Any,
                '_' | '?' => Token::One,
                c => Token::Lit(c),
            })
            .collect()
    }

    /// Returns true if `sku` matches the whole pattern.
    pub fn matches(&self, sku: &str) -> bool {
        let tokens = self.tokens();
        let text: Vec<char> = sku.chars().collect();

        // Greedy match with single backtrack point on the last `Any`.
        let (mut t, mut p) = (0usize, 0usize);
        let mut backtrack: Option<(usize, usize)> = None;

        while t < text.len() {
            match tokens.get(p) {
                Some(Token::Any) => {
                    backtrack = Some((p, t));
                    p += 1;
                }
                Some(Token::One) => {
                    t += 1;
                    p += 1;
                }
                Some(Token::Lit(c)) if *c == text[t] => {
                    t += 1;
                    p += 1;
                }
                _ => match backtrack {
                    Some((bp, bt)) => {
                        p = bp + 1;
                        t = bt + 1;
                        backtrack = Some((bp, bt + 1));
                    }
                    None => return false,
                },
            }
        }

        tokens[p..].iter().all(|tok| *tok == Token::Any)
    }
}

impl From<&str> for SkuPattern {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl std::fmt::Display for SkuPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_percent_matches_prefix() {
        let p = SkuPattern::new("PROD-A%");
        assert!(p.matches("PROD-A1"));
        assert!(p.matches("PROD-A"));
        assert!(!p.matches("PROD-B2"));
        assert!(!p.matches("XPROD-A1"));
    }

    #[test]
    fn glob_wildcards_are_equivalent() {
        let sql = SkuPattern::new("AB_-%Z");
        let glob = SkuPattern::new("AB?-*Z");
        for sku in ["ABC-Z", "ABC-123Z", "AB-Z", "ABC-Z9"] {
            assert_eq!(sql.matches(sku), glob.matches(sku), "{sku}");
        }
        assert!(sql.matches("ABC-123Z"));
        assert!(!sql.matches("AB-Z"));
    }

    #[test]
    fn literal_pattern_requires_exact_match() {
        let p = SkuPattern::new("SKU-1");
        assert!(p.matches("SKU-1"));
        assert!(!p.matches("sku-1"));
        assert!(!p.matches("SKU-10"));
    }

    #[test]
    fn inner_wildcard_backtracks() {
        let p = SkuPattern::new("%-X-%");
        assert!(p.matches("A-B-X-C"));
        assert!(!p.matches("A-B-Y-C"));
    }

    #[test]
    fn lone_percent_matches_everything() {
        let p = SkuPattern::new("%");
        assert!(p.matches(""));
        assert!(p.matches("anything"));
    }
}
