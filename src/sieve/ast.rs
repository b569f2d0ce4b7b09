//! AST node types for Sieve scripts (RFC 5228 plus the filing extensions the engine runs).
//! A complete script is a list of commands.
use chrono::NaiveDate;

use crate::model::enums::{AddressPartType, DateComparator, MatchType, SizeComparator};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Script {
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `require ["ext1", "ext2"];`
    Require(Vec<String>),

    /// `if <test> { ... }` or `disabled_if <test> { ... }` with optional elsif/else chain
    If(IfBlock),

    /// A known action like `keep;`, `stop;`, `fileinto "X";`
    Action(Action),

    /// A command the engine does not model. Its block is still walked.
    Unrecognized(UnknownCommand),
}

/// The node tag of a rule root. The enabled state lives here and nowhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleTag {
    If,
    DisabledIf,
}

impl RuleTag {
    pub fn as_sieve(&self) -> &'static str {
        match self {
            Self::If => "if",
            Self::DisabledIf => "disabled_if",
        }
    }

    pub fn from_sieve(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "if" => Some(Self::If),
            "disabled_if" => Some(Self::DisabledIf),
            _ => None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::If)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfBlock {
    /// The rule name taken from the `# name` comment right before the rule
    pub name: Option<String>,
    pub tag: RuleTag,
    pub condition: Test,
    pub block: Vec<Command>,
    /// elsif/else chain
    pub alternatives: Vec<Alternative>,
}

impl IfBlock {
    pub fn enabled(&self) -> bool {
        self.tag.is_enabled()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Alternative {
    ElsIf { condition: Test, block: Vec<Command> },
    Else { block: Vec<Command> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnknownCommand {
    pub name: String,
    pub arguments: Vec<Argument>,
    pub tests: Vec<Test>,
    pub block: Option<Vec<Command>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Test {
    /// `allof (test1, test2, ...)`
    AllOf(Vec<Test>),
    /// `anyof (test1, test2, ...)`
    AnyOf(Vec<Test>),
    /// `not <test>`
    Not(Box<Test>),
    /// `header [:comparator "i;octet"] :match_type "Header" "value"`
    Header {
        match_type: MatchType,
        case_sensitive: bool,
        header_names: Vec<String>,
        keys: Vec<String>,
    },
    /// `address [:address_part] :match_type "Header" "value"`
    Address {
        address_part: AddressPartType,
        match_type: MatchType,
        case_sensitive: bool,
        header_names: Vec<String>,
        keys: Vec<String>,
    },
    /// `exists "Header"`
    Exists { header_names: Vec<String> },
    /// `size :over/:under <limit>`, limit in bytes
    Size { comparator: SizeComparator, limit: u64 },
    /// `date :before/:after "yyyyMMdd"`
    Date {
        comparator: DateComparator,
        date: NaiveDate,
    },
    /// `body :match_type "value"`
    Body {
        match_type: MatchType,
        case_sensitive: bool,
        keys: Vec<String>,
    },
    /// `attachment`
    Attachment,
    True,
    False,
    /// A test (or a known test with a tag the engine does not support).
    /// Evaluates as absent; nested tests are still walked.
    Unrecognized {
        name: String,
        arguments: Vec<Argument>,
        tests: Vec<Test>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Keep,
    Discard,
    FileInto {
        path: String,
        copy: bool,
        flags: Vec<String>,
    },
    Redirect {
        address: String,
        copy: bool,
    },
    Reply {
        body: String,
    },
    Notify {
        address: String,
        subject: String,
        body: String,
        max_bytes: Option<u64>,
        headers: Vec<String>,
    },
    Tag {
        name: String,
    },
    Flag {
        name: String,
        set: bool,
    },
    Stop,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Keep => "keep",
            Self::Discard => "discard",
            Self::FileInto { .. } => "fileinto",
            Self::Redirect { .. } => "redirect",
            Self::Reply { .. } => "reply",
            Self::Notify { .. } => "notify",
            Self::Tag { .. } => "tag",
            Self::Flag { set: true, .. } => "flag",
            Self::Flag { set: false, .. } => "removeflag",
            Self::Stop => "stop",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    QuotedString(String),
    MultiLine(String),
    Number(String),
    Tag(String),
    StringList(Vec<String>),
}

impl Argument {
    /// The string values of a string or string-list argument.
    pub fn strings(&self) -> Option<Vec<String>> {
        match self {
            Self::QuotedString(s) | Self::MultiLine(s) => Some(vec![s.clone()]),
            Self::StringList(items) => Some(items.clone()),
            _ => None,
        }
    }

    /// A single string value; one-element lists count.
    pub fn string(&self) -> Option<&str> {
        match self {
            Self::QuotedString(s) | Self::MultiLine(s) => Some(s),
            Self::StringList(items) if items.len() == 1 => Some(&items[0]),
            _ => None,
        }
    }
}

impl Script {
    /// The top-level rules with their command index.
    pub fn rules(&self) -> impl Iterator<Item = (usize, &IfBlock)> {
        self.commands.iter().enumerate().filter_map(|(i, c)| match c {
            Command::If(block) => Some((i, block)),
            _ => None,
        })
    }

    /// Retag the top-level rule at `index`. Returns whether anything changed.
    pub fn set_rule_tag(&mut self, index: usize, tag: RuleTag) -> bool {
        match self.commands.get_mut(index) {
            Some(Command::If(block)) if block.tag != tag => {
                block.tag = tag;
                true
            }
            _ => false,
        }
    }

    /// Apply `f` to every action anywhere in the script, including nested blocks.
    pub fn for_each_action_mut(&mut self, f: &mut impl FnMut(&mut Action)) {
        for_each_action_in(&mut self.commands, f);
    }
}

fn for_each_action_in(commands: &mut [Command], f: &mut impl FnMut(&mut Action)) {
    for cmd in commands {
        match cmd {
            Command::Action(action) => f(action),
            Command::If(block) => {
                for_each_action_in(&mut block.block, f);
                for alt in &mut block.alternatives {
                    match alt {
                        Alternative::ElsIf { block, .. } | Alternative::Else { block } => {
                            for_each_action_in(block, f)
                        }
                    }
                }
            }
            Command::Unrecognized(unknown) => {
                if let Some(block) = &mut unknown.block {
                    for_each_action_in(block, f);
                }
            }
            Command::Require(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(tag: RuleTag, block: Vec<Command>) -> Command {
        Command::If(IfBlock {
            name: None,
            tag,
            condition: Test::True,
            block,
            alternatives: Vec::new(),
        })
    }

    #[test]
    fn test_set_rule_tag_reports_change() {
        let mut script = Script {
            commands: vec![
                Command::Require(vec!["fileinto".into()]),
                rule(RuleTag::If, vec![Command::Action(Action::Keep)]),
            ],
        };
        assert!(!script.set_rule_tag(0, RuleTag::DisabledIf));
        assert!(script.set_rule_tag(1, RuleTag::DisabledIf));
        assert!(!script.set_rule_tag(1, RuleTag::DisabledIf));
        assert_eq!(script.rules().next().map(|(_, r)| r.enabled()), Some(false));
    }

    #[test]
    fn test_for_each_action_reaches_nested_blocks() {
        let inner = rule(
            RuleTag::If,
            vec![Command::Action(Action::Tag { name: "a".into() })],
        );
        let mut script = Script {
            commands: vec![rule(RuleTag::If, vec![inner, Command::Action(Action::Stop)])],
        };
        let mut seen = Vec::new();
        script.for_each_action_mut(&mut |a| seen.push(a.name()));
        assert_eq!(seen, vec!["tag", "stop"]);
    }
}
