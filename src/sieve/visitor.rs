//! Begin/end tree walker over compiled scripts.
//!
//! `accept` walks every command in order and fires typed callbacks for the nodes the
//! engine models. Unrecognized tests and commands have no callback of their own, but
//! their nested tests and blocks are still walked.
use chrono::NaiveDate;

use crate::model::enums::{
    AddressPartType, DateComparator, LogicOperator, MatchType, SizeComparator,
};
use crate::sieve::ast::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitPhase {
    Begin,
    End,
}

/// Per-rule state. Every rule root (`if`, `disabled_if`, `elsif`, `else`) gets a fresh one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleProperties {
    pub enabled: bool,
    pub condition: LogicOperator,
    pub negated: bool,
    /// Index of the top-level command this node belongs to
    pub rule_index: usize,
}

impl RuleProperties {
    fn new(enabled: bool, rule_index: usize) -> Self {
        Self {
            enabled,
            condition: LogicOperator::AllOf,
            negated: false,
            rule_index,
        }
    }
}

#[allow(unused_variables)]
pub trait RuleVisitor {
    fn visit_rule(&mut self, phase: VisitPhase, props: &RuleProperties, rule: &IfBlock) {}
    fn visit_elsif(&mut self, phase: VisitPhase, props: &RuleProperties) {}
    fn visit_else(&mut self, phase: VisitPhase, props: &RuleProperties) {}

    fn visit_allof(&mut self, phase: VisitPhase, props: &RuleProperties) {}
    fn visit_anyof(&mut self, phase: VisitPhase, props: &RuleProperties) {}
    fn visit_not(&mut self, phase: VisitPhase, props: &RuleProperties) {}

    fn visit_header_test(
        &mut self,
        phase: VisitPhase,
        props: &RuleProperties,
        header_names: &[String],
        match_type: MatchType,
        case_sensitive: bool,
        keys: &[String],
    ) {
    }
    #[allow(clippy::too_many_arguments)]
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
    }
    fn visit_exists_test(
        &mut self,
        phase: VisitPhase,
        props: &RuleProperties,
        header_names: &[String],
    ) {
    }
    fn visit_size_test(
        &mut self,
        phase: VisitPhase,
        props: &RuleProperties,
        comparator: SizeComparator,
        limit: u64,
    ) {
    }
    fn visit_date_test(
        &mut self,
        phase: VisitPhase,
        props: &RuleProperties,
        comparator: DateComparator,
        date: NaiveDate,
    ) {
    }
    fn visit_body_test(
        &mut self,
        phase: VisitPhase,
        props: &RuleProperties,
        match_type: MatchType,
        case_sensitive: bool,
        keys: &[String],
    ) {
    }
    fn visit_attachment_test(&mut self, phase: VisitPhase, props: &RuleProperties) {}
    fn visit_true_test(&mut self, phase: VisitPhase, props: &RuleProperties) {}
    fn visit_false_test(&mut self, phase: VisitPhase, props: &RuleProperties) {}

    fn visit_keep(&mut self, phase: VisitPhase, props: &RuleProperties) {}
    fn visit_discard(&mut self, phase: VisitPhase, props: &RuleProperties) {}
    fn visit_fileinto(
        &mut self,
        phase: VisitPhase,
        props: &RuleProperties,
        path: &str,
        copy: bool,
        flags: &[String],
    ) {
    }
    fn visit_redirect(
        &mut self,
        phase: VisitPhase,
        props: &RuleProperties,
        address: &str,
        copy: bool,
    ) {
    }
    fn visit_reply(&mut self, phase: VisitPhase, props: &RuleProperties, body: &str) {}
    #[allow(clippy::too_many_arguments)]
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
    }
    fn visit_tag(&mut self, phase: VisitPhase, props: &RuleProperties, name: &str) {}
    fn visit_flag(&mut self, phase: VisitPhase, props: &RuleProperties, name: &str, set: bool) {}
    fn visit_stop(&mut self, phase: VisitPhase, props: &RuleProperties) {}
}

/// Walk the whole script. Commands outside any rule see properties for their own index.
pub fn accept<V: RuleVisitor + ?Sized>(script: &Script, visitor: &mut V) {
    for (index, cmd) in script.commands.iter().enumerate() {
        let mut props = RuleProperties::new(true, index);
        walk_command(cmd, &mut props, visitor);
    }
}

fn walk_commands<V: RuleVisitor + ?Sized>(
    commands: &[Command],
    props: &mut RuleProperties,
    visitor: &mut V,
) {
    for cmd in commands {
        walk_command(cmd, props, visitor);
    }
}

fn walk_command<V: RuleVisitor + ?Sized>(
    cmd: &Command,
    props: &mut RuleProperties,
    visitor: &mut V,
) {
    match cmd {
        Command::Require(_) => {}
        Command::If(rule) => walk_rule(rule, props, visitor),
        Command::Action(action) => {
            visit_action(action, VisitPhase::Begin, props, visitor);
            visit_action(action, VisitPhase::End, props, visitor);
        }
        Command::Unrecognized(unknown) => {
            for test in &unknown.tests {
                walk_test(test, props, visitor);
            }
            if let Some(block) = &unknown.block {
                walk_commands(block, props, visitor);
            }
        }
    }
}

fn walk_rule<V: RuleVisitor + ?Sized>(rule: &IfBlock, outer: &RuleProperties, visitor: &mut V) {
    let enabled = outer.enabled && rule.enabled();

    let mut props = RuleProperties::new(enabled, outer.rule_index);
    visitor.visit_rule(VisitPhase::Begin, &props, rule);
    walk_test(&rule.condition, &mut props, visitor);
    walk_commands(&rule.block, &mut props, visitor);
    visitor.visit_rule(VisitPhase::End, &props, rule);

    for alt in &rule.alternatives {
        let mut props = RuleProperties::new(enabled, outer.rule_index);
        match alt {
            Alternative::ElsIf { condition, block } => {
                visitor.visit_elsif(VisitPhase::Begin, &props);
                walk_test(condition, &mut props, visitor);
                walk_commands(block, &mut props, visitor);
                visitor.visit_elsif(VisitPhase::End, &props);
            }
            Alternative::Else { block } => {
                visitor.visit_else(VisitPhase::Begin, &props);
                walk_commands(block, &mut props, visitor);
                visitor.visit_else(VisitPhase::End, &props);
            }
        }
    }
}

fn walk_test<V: RuleVisitor + ?Sized>(test: &Test, props: &mut RuleProperties, visitor: &mut V) {
    match test {
        Test::AllOf(tests) | Test::AnyOf(tests) => {
            let saved = props.condition;
            let is_all = matches!(test, Test::AllOf(_));
            props.condition = if is_all {
                LogicOperator::AllOf
            } else {
                LogicOperator::AnyOf
            };
            if is_all {
                visitor.visit_allof(VisitPhase::Begin, props);
            } else {
                visitor.visit_anyof(VisitPhase::Begin, props);
            }
            for t in tests {
                walk_test(t, props, visitor);
            }
            if is_all {
                visitor.visit_allof(VisitPhase::End, props);
            } else {
                visitor.visit_anyof(VisitPhase::End, props);
            }
            props.condition = saved;
        }
        Test::Not(inner) => {
            let saved = props.negated;
            props.negated = !saved;
            visitor.visit_not(VisitPhase::Begin, props);
            walk_test(inner, props, visitor);
            visitor.visit_not(VisitPhase::End, props);
            props.negated = saved;
        }
        Test::Unrecognized { tests, .. } => {
            for t in tests {
                walk_test(t, props, visitor);
            }
        }
        leaf => {
            visit_leaf_test(leaf, VisitPhase::Begin, props, visitor);
            visit_leaf_test(leaf, VisitPhase::End, props, visitor);
        }
    }
}

fn visit_leaf_test<V: RuleVisitor + ?Sized>(
    test: &Test,
    phase: VisitPhase,
    props: &RuleProperties,
    visitor: &mut V,
) {
    match test {
        Test::Header {
            match_type,
            case_sensitive,
            header_names,
            keys,
        } => visitor.visit_header_test(phase, props, header_names, *match_type, *case_sensitive, keys),
        Test::Address {
            address_part,
            match_type,
            case_sensitive,
            header_names,
            keys,
        } => visitor.visit_address_test(
            phase,
            props,
            header_names,
            *address_part,
            *match_type,
            *case_sensitive,
            keys,
        ),
        Test::Exists { header_names } => visitor.visit_exists_test(phase, props, header_names),
        Test::Size { comparator, limit } => {
            visitor.visit_size_test(phase, props, *comparator, *limit)
        }
        Test::Date { comparator, date } => visitor.visit_date_test(phase, props, *comparator, *date),
        Test::Body {
            match_type,
            case_sensitive,
            keys,
        } => visitor.visit_body_test(phase, props, *match_type, *case_sensitive, keys),
        Test::Attachment => visitor.visit_attachment_test(phase, props),
        Test::True => visitor.visit_true_test(phase, props),
        Test::False => visitor.visit_false_test(phase, props),
        Test::AllOf(_) | Test::AnyOf(_) | Test::Not(_) | Test::Unrecognized { .. } => {}
    }
}

fn visit_action<V: RuleVisitor + ?Sized>(
    action: &Action,
    phase: VisitPhase,
    props: &RuleProperties,
    visitor: &mut V,
) {
    match action {
        Action::Keep => visitor.visit_keep(phase, props),
        Action::Discard => visitor.visit_discard(phase, props),
        Action::FileInto { path, copy, flags } => {
            visitor.visit_fileinto(phase, props, path, *copy, flags)
        }
        Action::Redirect { address, copy } => visitor.visit_redirect(phase, props, address, *copy),
        Action::Reply { body } => visitor.visit_reply(phase, props, body),
        Action::Notify {
            address,
            subject,
            body,
            max_bytes,
            headers,
        } => visitor.visit_notify(phase, props, address, subject, body, *max_bytes, headers),
        Action::Tag { name } => visitor.visit_tag(phase, props, name),
        Action::Flag { name, set } => visitor.visit_flag(phase, props, name, *set),
        Action::Stop => visitor.visit_stop(phase, props),
    }
}
