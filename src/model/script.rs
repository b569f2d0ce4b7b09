use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::rule::FilterRule;

/// The structured form of an account's rule set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterRules {
    #[serde(default)]
    pub rules: Vec<FilterRule>,
}

impl FilterRules {
    pub fn from_json(json: &str) -> Result<Self> {
        let mut rules: Self = serde_json::from_str(json)?;
        for rule in &mut rules.rules {
            rule.normalize_indices();
        }
        Ok(rules)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name.as_str()).collect()
    }
}
