use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    #[default]
    Is,
    Contains,
    Matches,
    Regex,
}

impl MatchType {
    pub fn as_sieve(&self) -> &'static str {
        match self {
            Self::Is => ":is",
            Self::Contains => ":contains",
            Self::Matches => ":matches",
            Self::Regex => ":regex",
        }
    }

    pub fn from_sieve(s: &str) -> Option<Self> {
        match s {
            ":is" => Some(Self::Is),
            ":contains" => Some(Self::Contains),
            ":matches" => Some(Self::Matches),
            ":regex" => Some(Self::Regex),
            _ => None,
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sieve())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressPartType {
    #[default]
    All,
    Localpart,
    Domain,
}

impl AddressPartType {
    pub fn as_sieve(&self) -> &'static str {
        match self {
            Self::All => ":all",
            Self::Localpart => ":localpart",
            Self::Domain => ":domain",
        }
    }

    pub fn from_sieve(s: &str) -> Option<Self> {
        match s {
            ":all" => Some(Self::All),
            ":localpart" => Some(Self::Localpart),
            ":domain" => Some(Self::Domain),
            _ => None,
        }
    }
}

impl fmt::Display for AddressPartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sieve())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeComparator {
    Over,
    Under,
}

impl SizeComparator {
    pub fn as_sieve(&self) -> &'static str {
        match self {
            Self::Over => ":over",
            Self::Under => ":under",
        }
    }

    pub fn from_sieve(s: &str) -> Option<Self> {
        match s {
            ":over" => Some(Self::Over),
            ":under" => Some(Self::Under),
            _ => None,
        }
    }
}

impl fmt::Display for SizeComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sieve())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateComparator {
    Before,
    After,
}

impl DateComparator {
    pub fn as_sieve(&self) -> &'static str {
        match self {
            Self::Before => ":before",
            Self::After => ":after",
        }
    }

    pub fn from_sieve(s: &str) -> Option<Self> {
        match s {
            ":before" => Some(Self::Before),
            ":after" => Some(Self::After),
            _ => None,
        }
    }
}

impl fmt::Display for DateComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sieve())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicOperator {
    #[default]
    AllOf,
    AnyOf,
}

impl LogicOperator {
    pub fn as_sieve(&self) -> &'static str {
        match self {
            Self::AllOf => "allof",
            Self::AnyOf => "anyof",
        }
    }

    pub fn from_sieve(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "allof" => Some(Self::AllOf),
            "anyof" => Some(Self::AnyOf),
            _ => None,
        }
    }
}

impl fmt::Display for LogicOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sieve())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sieve_names_roundtrip() {
        for m in [MatchType::Is, MatchType::Contains, MatchType::Matches, MatchType::Regex] {
            assert_eq!(MatchType::from_sieve(m.as_sieve()), Some(m));
        }
        assert_eq!(AddressPartType::from_sieve(":domain"), Some(AddressPartType::Domain));
        assert_eq!(DateComparator::from_sieve(":after"), Some(DateComparator::After));
        assert_eq!(LogicOperator::from_sieve("AnyOf"), Some(LogicOperator::AnyOf));
        assert_eq!(SizeComparator::from_sieve(":value"), None);
    }

    #[test]
    fn test_json_names() {
        let json = serde_json::to_string(&MatchType::Contains).unwrap();
        assert_eq!(json, "\"contains\"");
        let op: LogicOperator = serde_json::from_str("\"anyof\"").unwrap();
        assert_eq!(op, LogicOperator::AnyOf);
    }
}
