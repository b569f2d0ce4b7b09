use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::enums::{
    AddressPartType, DateComparator, LogicOperator, MatchType, SizeComparator,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterRule {
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub tests: FilterTests,
    #[serde(default)]
    pub actions: Vec<FilterAction>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterTests {
    #[serde(default)]
    pub condition: LogicOperator,
    #[serde(default)]
    pub tests: Vec<FilterTest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterTest {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub negative: bool,
    #[serde(flatten)]
    pub kind: FilterTestKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FilterTestKind {
    #[serde(rename_all = "camelCase")]
    Header {
        headers: Vec<String>,
        #[serde(default)]
        match_type: MatchType,
        #[serde(default)]
        case_sensitive: bool,
        values: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Address {
        headers: Vec<String>,
        #[serde(default)]
        part: AddressPartType,
        #[serde(default)]
        match_type: MatchType,
        #[serde(default)]
        case_sensitive: bool,
        values: Vec<String>,
    },
    HeaderExists {
        headers: Vec<String>,
    },
    Size {
        comparator: SizeComparator,
        /// Bytes
        size: u64,
    },
    Date {
        comparator: DateComparator,
        date: NaiveDate,
    },
    #[serde(rename_all = "camelCase")]
    Body {
        #[serde(default)]
        match_type: MatchType,
        #[serde(default)]
        case_sensitive: bool,
        values: Vec<String>,
    },
    Attachment,
    True,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterAction {
    #[serde(default)]
    pub index: usize,
    #[serde(flatten)]
    pub kind: FilterActionKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FilterActionKind {
    Keep,
    Discard,
    FileInto {
        folder: String,
        #[serde(default)]
        copy: bool,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        flags: Vec<String>,
    },
    Redirect {
        address: String,
        #[serde(default)]
        copy: bool,
    },
    Reply {
        content: String,
    },
    #[serde(rename_all = "camelCase")]
    Notify {
        address: String,
        #[serde(default)]
        subject: String,
        #[serde(default)]
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_body_bytes: Option<u64>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        orig_headers: Vec<String>,
    },
    Tag {
        tag: String,
    },
    Flag {
        flag: String,
        #[serde(default = "default_true")]
        set: bool,
    },
    Stop,
}

impl FilterRule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: true,
            tests: FilterTests::default(),
            actions: Vec::new(),
        }
    }

    /// Orders tests and actions by index. A duplicate index moves to the next free one.
    pub fn normalize_indices(&mut self) {
        self.tests.tests.sort_by_key(|t| t.index);
        let mut next = 0;
        for test in &mut self.tests.tests {
            test.index = test.index.max(next);
            next = test.index + 1;
        }
        self.actions.sort_by_key(|a| a.index);
        let mut next = 0;
        for action in &mut self.actions {
            action.index = action.index.max(next);
            next = action.index + 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_shape() {
        let rule = FilterRule {
            name: "Bills".into(),
            active: true,
            tests: FilterTests {
                condition: LogicOperator::AnyOf,
                tests: vec![FilterTest {
                    index: 0,
                    negative: false,
                    kind: FilterTestKind::Header {
                        headers: vec!["Subject".into()],
                        match_type: MatchType::Contains,
                        case_sensitive: false,
                        values: vec!["invoice".into()],
                    },
                }],
            },
            actions: vec![FilterAction {
                index: 0,
                kind: FilterActionKind::FileInto {
                    folder: "Bills".into(),
                    copy: false,
                    flags: Vec::new(),
                },
            }],
        };
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["tests"]["condition"], "anyof");
        assert_eq!(json["tests"]["tests"][0]["type"], "header");
        assert_eq!(json["tests"]["tests"][0]["matchType"], "contains");
        assert_eq!(json["actions"][0]["type"], "fileInto");
        assert_eq!(json["actions"][0]["folder"], "Bills");

        let back: FilterRule = serde_json::from_value(json).unwrap();
        assert_eq!(back, rule);
    }

    #[test]
    fn test_defaults_when_fields_missing() {
        let rule: FilterRule = serde_json::from_str(
            r#"{"name": "x", "actions": [{"type": "flag", "flag": "flagged"}]}"#,
        )
        .unwrap();
        assert!(rule.active);
        assert!(rule.tests.tests.is_empty());
        assert_eq!(
            rule.actions[0].kind,
            FilterActionKind::Flag {
                flag: "flagged".into(),
                set: true
            }
        );
    }

    #[test]
    fn test_duplicate_indices_shift() {
        let mut rule = FilterRule::new("x");
        for (index, tag) in [(2, "c"), (0, "a"), (0, "b")] {
            rule.actions.push(FilterAction {
                index,
                kind: FilterActionKind::Tag { tag: tag.into() },
            });
        }
        rule.normalize_indices();
        let order: Vec<_> = rule
            .actions
            .iter()
            .map(|a| match &a.kind {
                FilterActionKind::Tag { tag } => (a.index, tag.as_str()),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(order, vec![(0, "a"), (1, "b"), (2, "c")]);
    }
}
