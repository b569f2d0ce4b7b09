//! Bidirectional conversion between Sieve script text and the structured `FilterRules` form.
//!
//! `script_to_rules()`: compiled script → visitor pass → structured rules
//! `rules_to_script()`: structured rules → validation → AST → emitted text
use chrono::NaiveDate;

use crate::error::{Error, Result};
use crate::model::enums::{
    AddressPartType, DateComparator, LogicOperator, MatchType, SizeComparator,
};
use crate::model::rule::{
    FilterAction, FilterActionKind, FilterRule, FilterTest, FilterTestKind,
};
use crate::model::script::FilterRules;
use crate::sieve::ast::*;
use crate::sieve::emitter;
use crate::sieve::visitor::{self, RuleProperties, RuleVisitor, VisitPhase};

/// Convert a compiled script into the structured form.
///
/// Rules the structured form cannot hold (elsif/else chains, nested rules, nested
/// compound tests, unrecognized tests or commands) are logged and left out.
pub fn script_to_rules(script: &Script) -> FilterRules {
    let mut unsupported = Vec::new();
    for (index, cmd) in script.commands.iter().enumerate() {
        if representable(cmd) {
            continue;
        }
        let name = match cmd {
            Command::If(rule) => rule.name.as_deref().unwrap_or(""),
            Command::Unrecognized(unknown) => unknown.name.as_str(),
            _ => "",
        };
        tracing::warn!(index, name, "rule cannot be represented in structured form, skipped");
        unsupported.push(index);
    }

    let mut collector = RuleCollector {
        unsupported,
        rules: Vec::new(),
        in_rule: false,
        compound_depth: 0,
        last_loose: None,
    };
    visitor::accept(script, &mut collector);
    FilterRules {
        rules: collector.rules,
    }
}

/// Whether a top-level command fits the structured form.
fn representable(cmd: &Command) -> bool {
    match cmd {
        Command::Require(_) | Command::Action(_) => true,
        Command::Unrecognized(_) => false,
        Command::If(rule) => {
            rule.alternatives.is_empty()
                && rule.block.iter().all(|c| matches!(c, Command::Action(_)))
                && match &rule.condition {
                    Test::AllOf(tests) | Test::AnyOf(tests) => tests.iter().all(is_leaf),
                    other => is_leaf(other),
                }
        }
    }
}

fn is_leaf(test: &Test) -> bool {
    match test {
        Test::Not(inner) => is_leaf(inner),
        Test::AllOf(_) | Test::AnyOf(_) | Test::Unrecognized { .. } => false,
        _ => true,
    }
}

struct RuleCollector {
    unsupported: Vec<usize>,
    rules: Vec<FilterRule>,
    in_rule: bool,
    compound_depth: usize,
    /// Command index of the last action seen outside any rule
    last_loose: Option<usize>,
}

impl RuleCollector {
    fn skipped(&self, props: &RuleProperties) -> bool {
        self.unsupported.contains(&props.rule_index)
    }

    fn push_test(&mut self, phase: VisitPhase, props: &RuleProperties, kind: FilterTestKind) {
        if phase != VisitPhase::Begin || self.skipped(props) {
            return;
        }
        if let Some(rule) = self.rules.last_mut() {
            let index = rule.tests.tests.len();
            rule.tests.tests.push(FilterTest {
                index,
                negative: props.negated,
                kind,
            });
        }
    }

    fn push_action(&mut self, phase: VisitPhase, props: &RuleProperties, kind: FilterActionKind) {
        if phase != VisitPhase::Begin || self.skipped(props) {
            return;
        }
        if !self.in_rule {
            // consecutive actions outside any rule form one rule without tests
            let continues = props
                .rule_index
                .checked_sub(1)
                .is_some_and(|prev| self.last_loose == Some(prev));
            if !continues {
                self.rules.push(FilterRule::new(""));
            }
            self.last_loose = Some(props.rule_index);
        }
        if let Some(rule) = self.rules.last_mut() {
            let index = rule.actions.len();
            rule.actions.push(FilterAction { index, kind });
        }
    }
}

impl RuleVisitor for RuleCollector {
    fn visit_rule(&mut self, phase: VisitPhase, props: &RuleProperties, rule: &IfBlock) {
        if self.skipped(props) {
            return;
        }
        match phase {
            VisitPhase::Begin => {
                let mut filter = FilterRule::new(rule.name.clone().unwrap_or_default());
                filter.active = props.enabled;
                self.rules.push(filter);
                self.in_rule = true;
            }
            VisitPhase::End => self.in_rule = false,
        }
    }

    fn visit_allof(&mut self, phase: VisitPhase, props: &RuleProperties) {
        self.visit_compound(phase, props, LogicOperator::AllOf);
    }

    fn visit_anyof(&mut self, phase: VisitPhase, props: &RuleProperties) {
        self.visit_compound(phase, props, LogicOperator::AnyOf);
    }

    fn visit_header_test(
        &mut self,
        phase: VisitPhase,
        props: &RuleProperties,
        header_names: &[String],
        match_type: MatchType,
        case_sensitive: bool,
        keys: &[String],
    ) {
        let kind = FilterTestKind::Header {
            headers: header_names.to_vec(),
            match_type,
            case_sensitive,
            values: keys.to_vec(),
        };
        self.push_test(phase, props, kind);
    }

    fn visit_address_test(
        &mut self,
        phase: VisitPhase,
        props: &RuleProperties,
        header_names: &[String],
        address_part: AddressPartType,
        match_type: MatchType,
        case_sensitive: bool,
        keys: &[String],
    ) {
        let kind = FilterTestKind::Address {
            headers: header_names.to_vec(),
            part: address_part,
            match_type,
            case_sensitive,
            values: keys.to_vec(),
        };
        self.push_test(phase, props, kind);
    }

    fn visit_exists_test(
        &mut self,
        phase: VisitPhase,
        props: &RuleProperties,
        header_names: &[String],
    ) {
        let kind = FilterTestKind::HeaderExists {
            headers: header_names.to_vec(),
        };
        self.push_test(phase, props, kind);
    }

    fn visit_size_test(
        &mut self,
        phase: VisitPhase,
        props: &RuleProperties,
        comparator: SizeComparator,
        limit: u64,
    ) {
        let kind = FilterTestKind::Size {
            comparator,
            size: limit,
        };
        self.push_test(phase, props, kind);
    }

    fn visit_date_test(
        &mut self,
        phase: VisitPhase,
        props: &RuleProperties,
        comparator: DateComparator,
        date: NaiveDate,
    ) {
        self.push_test(phase, props, FilterTestKind::Date { comparator, date });
    }

    fn visit_body_test(
        &mut self,
        phase: VisitPhase,
        props: &RuleProperties,
        match_type: MatchType,
        case_sensitive: bool,
        keys: &[String],
    ) {
        let kind = FilterTestKind::Body {
            match_type,
            case_sensitive,
            values: keys.to_vec(),
        };
        self.push_test(phase, props, kind);
    }

    fn visit_attachment_test(&mut self, phase: VisitPhase, props: &RuleProperties) {
        self.push_test(phase, props, FilterTestKind::Attachment);
    }

    fn visit_true_test(&mut self, phase: VisitPhase, props: &RuleProperties) {
        // a bare `true` condition is how a rule without tests is written
        if self.compound_depth == 0 && !props.negated {
            return;
        }
        self.push_test(phase, props, FilterTestKind::True);
    }

    fn visit_false_test(&mut self, phase: VisitPhase, props: &RuleProperties) {
        let flipped = RuleProperties {
            negated: !props.negated,
            ..props.clone()
        };
        self.push_test(phase, &flipped, FilterTestKind::True);
    }

    fn visit_keep(&mut self, phase: VisitPhase, props: &RuleProperties) {
        self.push_action(phase, props, FilterActionKind::Keep);
    }

    fn visit_discard(&mut self, phase: VisitPhase, props: &RuleProperties) {
        self.push_action(phase, props, FilterActionKind::Discard);
    }

    fn visit_fileinto(
        &mut self,
        phase: VisitPhase,
        props: &RuleProperties,
        path: &str,
        copy: bool,
        flags: &[String],
    ) {
        let kind = FilterActionKind::FileInto {
            folder: path.to_string(),
            copy,
            flags: flags.to_vec(),
        };
        self.push_action(phase, props, kind);
    }

    fn visit_redirect(&mut self, phase: VisitPhase, props: &RuleProperties, address: &str, copy: bool) {
        let kind = FilterActionKind::Redirect {
            address: address.to_string(),
            copy,
        };
        self.push_action(phase, props, kind);
    }

    fn visit_reply(&mut self, phase: VisitPhase, props: &RuleProperties, body: &str) {
        let kind = FilterActionKind::Reply {
            content: body.to_string(),
        };
        self.push_action(phase, props, kind);
    }

    fn visit_notify(
        &mut self,
        phase: VisitPhase,
        props: &RuleProperties,
        address: &str,
        subject: &str,
        body: &str,
        max_bytes: Option<u64>,
        headers: &[String],
    ) {
        let kind = FilterActionKind::Notify {
            address: address.to_string(),
            subject: subject.to_string(),
            content: body.to_string(),
            max_body_bytes: max_bytes,
            orig_headers: headers.to_vec(),
        };
        self.push_action(phase, props, kind);
    }

    fn visit_tag(&mut self, phase: VisitPhase, props: &RuleProperties, name: &str) {
        let kind = FilterActionKind::Tag {
            tag: name.to_string(),
        };
        self.push_action(phase, props, kind);
    }

    fn visit_flag(&mut self, phase: VisitPhase, props: &RuleProperties, name: &str, set: bool) {
        let kind = FilterActionKind::Flag {
            flag: name.to_string(),
            set,
        };
        self.push_action(phase, props, kind);
    }

    fn visit_stop(&mut self, phase: VisitPhase, props: &RuleProperties) {
        self.push_action(phase, props, FilterActionKind::Stop);
    }
}

impl RuleCollector {
    fn visit_compound(&mut self, phase: VisitPhase, props: &RuleProperties, op: LogicOperator) {
        match phase {
            VisitPhase::Begin => {
                if self.compound_depth == 0 && !self.skipped(props) {
                    if let Some(rule) = self.rules.last_mut() {
                        rule.tests.condition = op;
                    }
                }
                self.compound_depth += 1;
            }
            VisitPhase::End => self.compound_depth = self.compound_depth.saturating_sub(1),
        }
    }
}

/// Convert the structured form to script text.
///
/// Leaf values are never escaped: a value holding `\` or `"` is rejected, as are
/// empty targets and rules without actions.
pub fn rules_to_script(rules: &FilterRules) -> Result<String> {
    let mut commands = Vec::new();
    for rule in &rules.rules {
        commands.push(Command::If(rule_to_ast(rule)?));
    }
    let mut script = Script { commands };
    let requires = emitter::compute_requires(&script);
    if !requires.is_empty() {
        script.commands.insert(0, Command::Require(requires));
    }
    Ok(emitter::emit(&script))
}

fn rule_to_ast(rule: &FilterRule) -> Result<IfBlock> {
    let mut rule = rule.clone();
    rule.normalize_indices();

    if rule.actions.is_empty() {
        return Err(Error::InvalidRequest(format!(
            "Missing action in rule '{}'",
            rule.name
        )));
    }

    let condition = if rule.tests.tests.is_empty() {
        Test::True
    } else {
        let tests = rule
            .tests
            .tests
            .iter()
            .map(test_to_ast)
            .collect::<Result<Vec<_>>>()?;
        match rule.tests.condition {
            LogicOperator::AllOf => Test::AllOf(tests),
            LogicOperator::AnyOf => Test::AnyOf(tests),
        }
    };

    let block = rule
        .actions
        .iter()
        .map(|a| action_to_ast(&a.kind).map(Command::Action))
        .collect::<Result<Vec<_>>>()?;

    check_value(&rule.name)?;
    if rule.name.contains(['\r', '\n']) {
        return Err(invalid("Rule name spans more than one line"));
    }
    Ok(IfBlock {
        name: Some(rule.name.clone()).filter(|n| !n.is_empty()),
        tag: if rule.active {
            RuleTag::If
        } else {
            RuleTag::DisabledIf
        },
        condition,
        block,
        alternatives: Vec::new(),
    })
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidRequest(message.into())
}

/// Leaf values go out verbatim, so quoting characters cannot be allowed in them.
fn check_value(value: &str) -> Result<()> {
    if value.contains(['\\', '"']) {
        return Err(invalid(format!("Value contains a quote or backslash: {value}")));
    }
    Ok(())
}

/// IMAP system flags such as `\\Seen` keep their leading backslash; the emitter escapes it.
fn check_flag(flag: &str) -> Result<()> {
    match flag.strip_prefix('\\') {
        Some("") => Err(invalid("System flag has no name")),
        Some(name) => check_value(name),
        None => check_value(flag),
    }
}

fn check_values(values: &[String], match_type: MatchType) -> Result<()> {
    for value in values {
        check_value(value)?;
        if match_type == MatchType::Matches && value.contains("*****") {
            return Err(invalid(
                "Wildcard match value cannot contain more than four asterisks in a row",
            ));
        }
    }
    Ok(())
}

fn check_headers(headers: &[String]) -> Result<()> {
    if headers.is_empty() || headers.iter().any(|h| h.trim().is_empty()) {
        return Err(invalid("Header name is empty"));
    }
    check_values(headers, MatchType::Is)
}

fn test_to_ast(test: &FilterTest) -> Result<Test> {
    let node = match &test.kind {
        FilterTestKind::Header {
            headers,
            match_type,
            case_sensitive,
            values,
        } => {
            check_headers(headers)?;
            check_values(values, *match_type)?;
            Test::Header {
                match_type: *match_type,
                case_sensitive: *case_sensitive,
                header_names: headers.clone(),
                keys: values.clone(),
            }
        }
        FilterTestKind::Address {
            headers,
            part,
            match_type,
            case_sensitive,
            values,
        } => {
            check_headers(headers)?;
            check_values(values, *match_type)?;
            Test::Address {
                address_part: *part,
                match_type: *match_type,
                case_sensitive: *case_sensitive,
                header_names: headers.clone(),
                keys: values.clone(),
            }
        }
        FilterTestKind::HeaderExists { headers } => {
            check_headers(headers)?;
            Test::Exists {
                header_names: headers.clone(),
            }
        }
        FilterTestKind::Size { comparator, size } => Test::Size {
            comparator: *comparator,
            limit: *size,
        },
        FilterTestKind::Date { comparator, date } => Test::Date {
            comparator: *comparator,
            date: *date,
        },
        FilterTestKind::Body {
            match_type,
            case_sensitive,
            values,
        } => {
            check_values(values, *match_type)?;
            Test::Body {
                match_type: *match_type,
                case_sensitive: *case_sensitive,
                keys: values.clone(),
            }
        }
        FilterTestKind::Attachment => Test::Attachment,
        FilterTestKind::True => Test::True,
    };
    Ok(if test.negative {
        Test::Not(Box::new(node))
    } else {
        node
    })
}

fn require_non_empty(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(invalid(format!("Missing {what}")));
    }
    check_value(value)
}

fn action_to_ast(kind: &FilterActionKind) -> Result<Action> {
    Ok(match kind {
        FilterActionKind::Keep => Action::Keep,
        FilterActionKind::Discard => Action::Discard,
        FilterActionKind::Stop => Action::Stop,
        FilterActionKind::FileInto {
            folder,
            copy,
            flags,
        } => {
            require_non_empty(folder, "folder path")?;
            for flag in flags {
                check_flag(flag)?;
            }
            Action::FileInto {
                path: folder.clone(),
                copy: *copy,
                flags: flags.clone(),
            }
        }
        FilterActionKind::Redirect { address, copy } => {
            require_non_empty(address, "address")?;
            Action::Redirect {
                address: address.clone(),
                copy: *copy,
            }
        }
        FilterActionKind::Reply { content } => {
            if content.is_empty() {
                return Err(invalid("Missing reply content"));
            }
            Action::Reply {
                body: content.clone(),
            }
        }
        FilterActionKind::Notify {
            address,
            subject,
            content,
            max_body_bytes,
            orig_headers,
        } => {
            require_non_empty(address, "address")?;
            check_value(subject)?;
            check_values(orig_headers, MatchType::Is)?;
            if !subject.is_empty() && orig_headers.iter().any(|h| h.eq_ignore_ascii_case("subject"))
            {
                return Err(invalid("subject conflict"));
            }
            Action::Notify {
                address: address.clone(),
                subject: subject.clone(),
                body: content.clone(),
                max_bytes: *max_body_bytes,
                headers: orig_headers.clone(),
            }
        }
        FilterActionKind::Tag { tag } => {
            require_non_empty(tag, "tag")?;
            Action::Tag { name: tag.clone() }
        }
        FilterActionKind::Flag { flag, set } => {
            if flag.trim().is_empty() {
                return Err(invalid("Missing flag"));
            }
            check_flag(flag)?;
            Action::Flag {
                name: flag.clone(),
                set: *set,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sieve::parser::parse;

    const SIMPLE_FILEINTO: &str = r#"require "fileinto";

# Move spam
if allof (header :contains "Subject" "SPAM") {
    fileinto "Junk";
    stop;
}
"#;

    const MIXED: &str = r#"require ["fileinto", "flag", "reply", "tag"];

# VIP mail
if anyof (header :is "From" "boss@example.com",
  not header :contains "Subject" "urgent",
  size :over 10M,
  date :before "20240101") {
    fileinto :copy "Important";
    tag "vip";
    flag "flagged";
}

# Away
disabled_if allof (exists "X-List",
  address :is :domain "From" "example.com",
  body :contains "unsubscribe",
  attachment) {
    reply text:
I am away
.
;
}
"#;

    fn to_rules(text: &str) -> FilterRules {
        script_to_rules(&parse(text).unwrap())
    }

    #[test]
    fn test_parse_simple_fileinto() {
        let rules = to_rules(SIMPLE_FILEINTO);
        assert_eq!(rules.rules.len(), 1);

        let rule = &rules.rules[0];
        assert_eq!(rule.name, "Move spam");
        assert!(rule.active);
        assert_eq!(rule.tests.condition, LogicOperator::AllOf);
        assert_eq!(
            rule.tests.tests[0].kind,
            FilterTestKind::Header {
                headers: vec!["Subject".into()],
                match_type: MatchType::Contains,
                case_sensitive: false,
                values: vec!["SPAM".into()],
            }
        );
        assert_eq!(
            rule.actions[0].kind,
            FilterActionKind::FileInto {
                folder: "Junk".into(),
                copy: false,
                flags: Vec::new(),
            }
        );
        assert_eq!(rule.actions[1].kind, FilterActionKind::Stop);
    }

    #[test]
    fn test_roundtrip_simple_is_exact() {
        let text = rules_to_script(&to_rules(SIMPLE_FILEINTO)).unwrap();
        assert_eq!(text, SIMPLE_FILEINTO);
    }

    #[test]
    fn test_roundtrip_mixed() {
        let first = to_rules(MIXED);
        assert_eq!(first.rules.len(), 2);
        assert_eq!(first.rules[0].tests.condition, LogicOperator::AnyOf);
        assert!(first.rules[0].tests.tests[1].negative);
        assert!(!first.rules[1].active);
        assert_eq!(first.rules[1].tests.tests.len(), 4);

        let text = rules_to_script(&first).unwrap();
        let second = to_rules(&text);
        assert_eq!(first, second);
        assert_eq!(parse(&text).unwrap(), parse(&rules_to_script(&second).unwrap()).unwrap());
    }

    #[test]
    fn test_roundtrip_system_flags() {
        let input = r#"require ["fileinto", "imap4flags"];
# seen bills
if header :contains "subject" "x" {
    fileinto :flags "\\Seen" "Bills";
    addflag "\\Flagged";
}
"#;
        let first = to_rules(input);
        assert_eq!(
            first.rules[0].actions[0].kind,
            FilterActionKind::FileInto {
                folder: "Bills".into(),
                copy: false,
                flags: vec!["\\Seen".into()],
            }
        );
        let text = rules_to_script(&first).unwrap();
        assert!(text.contains(r#"fileinto :flags ["\\Seen"] "Bills";"#));
        assert_eq!(to_rules(&text), first);

        let bad = single_action_rule(FilterActionKind::Flag {
            flag: "\\".into(),
            set: true,
        });
        assert!(rules_to_script(&bad).is_err());
        let bad = single_action_rule(FilterActionKind::Flag {
            flag: "\\Se\"en".into(),
            set: true,
        });
        assert!(rules_to_script(&bad).is_err());
    }

    #[test]
    fn test_rule_without_tests_keeps_name_and_state() {
        let mut rule = FilterRule::new("always");
        rule.active = false;
        rule.actions.push(FilterAction {
            index: 0,
            kind: FilterActionKind::Tag { tag: "seen".into() },
        });
        let rules = FilterRules { rules: vec![rule] };
        let text = rules_to_script(&rules).unwrap();
        assert!(text.contains("# always\ndisabled_if true {\n    tag \"seen\";\n}"));
        assert_eq!(to_rules(&text), rules);
    }

    #[test]
    fn test_unsupported_rules_are_skipped() {
        let input = r#"# chain
if header :is "a" "b" { keep; } else { discard; }
# nested
if anyof (allof (true, false), true) { keep; }
# unknown
if header :count "ge" "To" "3" { keep; }
# plain
if true { discard; }
"#;
        let rules = to_rules(input);
        assert_eq!(rules.names(), vec!["plain"]);
        assert!(rules.rules[0].tests.tests.is_empty());
    }

    #[test]
    fn test_loose_actions_form_one_rule() {
        let rules = to_rules("keep;\ntag \"x\";\nif true { stop; }\ndiscard;");
        assert_eq!(rules.rules.len(), 3);
        assert_eq!(rules.rules[0].actions.len(), 2);
        assert_eq!(rules.rules[2].actions[0].kind, FilterActionKind::Discard);
    }

    #[test]
    fn test_false_becomes_negated_true() {
        let rules = to_rules("if allof (false) { keep; }");
        let test = &rules.rules[0].tests.tests[0];
        assert!(test.negative);
        assert_eq!(test.kind, FilterTestKind::True);
    }

    fn single_action_rule(kind: FilterActionKind) -> FilterRules {
        let mut rule = FilterRule::new("r");
        rule.actions.push(FilterAction { index: 0, kind });
        FilterRules { rules: vec![rule] }
    }

    #[test]
    fn test_rejects_quotes_and_backslashes() {
        let rules = single_action_rule(FilterActionKind::FileInto {
            folder: "a\"b".into(),
            copy: false,
            flags: Vec::new(),
        });
        assert!(matches!(rules_to_script(&rules), Err(Error::InvalidRequest(_))));

        let mut rules = single_action_rule(FilterActionKind::Keep);
        rules.rules[0].tests.tests.push(FilterTest {
            index: 0,
            negative: false,
            kind: FilterTestKind::Body {
                match_type: MatchType::Contains,
                case_sensitive: false,
                values: vec!["back\\slash".into()],
            },
        });
        assert!(rules_to_script(&rules).is_err());
    }

    #[test]
    fn test_rejects_empty_targets() {
        let empty = [
            FilterActionKind::FileInto {
                folder: " ".into(),
                copy: false,
                flags: Vec::new(),
            },
            FilterActionKind::Tag { tag: String::new() },
            FilterActionKind::Redirect {
                address: String::new(),
                copy: true,
            },
            FilterActionKind::Reply {
                content: String::new(),
            },
        ];
        for kind in empty {
            assert!(rules_to_script(&single_action_rule(kind)).is_err());
        }
        assert!(rules_to_script(&FilterRules {
            rules: vec![FilterRule::new("no actions")]
        })
        .is_err());
    }

    #[test]
    fn test_rejects_too_many_asterisks() {
        let mut rules = single_action_rule(FilterActionKind::Keep);
        rules.rules[0].tests.tests.push(FilterTest {
            index: 0,
            negative: false,
            kind: FilterTestKind::Header {
                headers: vec!["Subject".into()],
                match_type: MatchType::Matches,
                case_sensitive: false,
                values: vec!["a*****b".into()],
            },
        });
        assert!(rules_to_script(&rules).is_err());
        if let FilterTestKind::Header { values, .. } = &mut rules.rules[0].tests.tests[0].kind {
            values[0] = "a****b".into();
        }
        assert!(rules_to_script(&rules).is_ok());
    }

    #[test]
    fn test_notify_subject_conflict() {
        let notify = |subject: &str| FilterActionKind::Notify {
            address: "me@example.com".into(),
            subject: subject.into(),
            content: "${body}".into(),
            max_body_bytes: Some(100),
            orig_headers: vec!["From".into(), "Subject".into()],
        };
        assert!(rules_to_script(&single_action_rule(notify("New mail"))).is_err());
        let text = rules_to_script(&single_action_rule(notify(""))).unwrap();
        assert!(text.contains("notify \"me@example.com\" \"\" text:\r\n${body}\r\n.\r\n 100 [\"From\", \"Subject\"];"));
    }
}
