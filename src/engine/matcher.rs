//! String comparison for the `:is`, `:contains`, `:matches` and `:regex` match types.

use regex::{Regex, RegexBuilder};

use crate::error::{Error, Result};
use crate::model::enums::MatchType;

/// A compiled key. Case folding follows the test's comparator.
#[derive(Debug)]
pub enum Matcher {
    Is(String),
    Contains(String),
    Pattern(Regex),
}

impl Matcher {
    pub fn new(match_type: MatchType, case_sensitive: bool, key: &str) -> Result<Self> {
        let fold = |s: &str| {
            if case_sensitive {
                s.to_string()
            } else {
                s.to_lowercase()
            }
        };
        Ok(match match_type {
            MatchType::Is => Self::Is(fold(key)),
            MatchType::Contains => Self::Contains(fold(key)),
            MatchType::Matches => Self::Pattern(build_regex(&wildcard_to_regex(key), case_sensitive)?),
            MatchType::Regex => Self::Pattern(build_regex(key, case_sensitive)?),
        })
    }

    pub fn matches(&self, value: &str, case_sensitive: bool) -> bool {
        match self {
            Self::Is(key) if case_sensitive => value == key,
            Self::Is(key) => value.to_lowercase() == *key,
            Self::Contains(key) if case_sensitive => value.contains(key.as_str()),
            Self::Contains(key) => value.to_lowercase().contains(key.as_str()),
            Self::Pattern(regex) => regex.is_match(value),
        }
    }
}

fn build_regex(pattern: &str, case_sensitive: bool) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(!case_sensitive)
        .dot_matches_new_line(true)
        .build()
        .map_err(|e| Error::Evaluation(format!("invalid pattern {pattern:?}: {e}")))
}

/// Converts a Sieve wildcard pattern to an anchored regex.
///
/// `*` matches any run of characters (lazily, except the last one), `?` matches one
/// character and `\` escapes the next character.
pub fn wildcard_to_regex(pattern: &str) -> String {
    let stars = pattern.chars().filter(|&c| c == '*').count();
    let mut seen_stars = 0;
    let mut out = String::from("^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                seen_stars += 1;
                out.push_str(if seen_stars == stars { ".*" } else { ".*?" });
            }
            '?' => out.push('.'),
            '\\' => {
                if let Some(next) = chars.next() {
                    out.push_str(&regex::escape(&next.to_string()));
                }
            }
            _ => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out.push('$');
    out
}

/// Whether any value matches any key.
pub fn any_match<'a>(
    match_type: MatchType,
    case_sensitive: bool,
    keys: &[String],
    values: impl IntoIterator<Item = &'a str>,
) -> Result<bool> {
    let matchers = keys
        .iter()
        .map(|k| Matcher::new(match_type, case_sensitive, k))
        .collect::<Result<Vec<_>>>()?;
    Ok(values
        .into_iter()
        .any(|v| matchers.iter().any(|m| m.matches(v, case_sensitive))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(match_type: MatchType, case_sensitive: bool, key: &str, value: &str) -> bool {
        any_match(match_type, case_sensitive, &[key.to_string()], [value]).unwrap()
    }

    #[test]
    fn test_is_and_contains() {
        assert!(check(MatchType::Is, false, "Hello", "hELLO"));
        assert!(!check(MatchType::Is, true, "Hello", "hello"));
        assert!(check(MatchType::Contains, false, "INVOICE", "your invoice #12"));
        assert!(!check(MatchType::Contains, true, "INVOICE", "your invoice #12"));
    }

    #[test]
    fn test_wildcards() {
        assert_eq!(wildcard_to_regex("a*b*c?"), "^a.*?b.*c.$");
        assert!(check(MatchType::Matches, false, "*@EXAMPLE.com", "bob@example.com"));
        assert!(check(MatchType::Matches, false, "re: ?", "Re: x"));
        assert!(!check(MatchType::Matches, false, "re: ?", "Re: xy"));
        assert!(check(MatchType::Matches, true, "1\\*2", "1*2"));
        assert!(!check(MatchType::Matches, true, "1\\*2", "1x2"));
        assert!(check(MatchType::Matches, false, "a.b", "A.B"));
        assert!(!check(MatchType::Matches, false, "a.b", "axb"));
    }

    #[test]
    fn test_regex() {
        assert!(check(MatchType::Regex, false, "^re:\\s+\\d+$", "RE:  42"));
        assert!(matches!(
            Matcher::new(MatchType::Regex, false, "(unclosed"),
            Err(Error::Evaluation(_))
        ));
    }

    #[test]
    fn test_no_values_never_match() {
        assert!(!any_match(MatchType::Contains, false, &["x".into()], []).unwrap());
    }
}
