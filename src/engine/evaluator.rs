//! Runs a compiled script against a message and collects the resulting actions.

use chrono::NaiveDate;

use crate::engine::matcher::any_match;
use crate::error::Result;
use crate::message::ParsedMessage;
use crate::mime::header::{parse_addresses, parse_date};
use crate::model::enums::{AddressPartType, DateComparator, MatchType, SizeComparator};
use crate::sieve::ast::{Action, Alternative, Command, Script, Test};

/// What a script decided for one message.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Actions in the order they were reached. `stop` is not recorded.
    pub actions: Vec<Action>,
    /// Still set when no action took responsibility for the message.
    pub implicit_keep: bool,
}

impl Evaluation {
    pub fn has_discard(&self) -> bool {
        self.actions.iter().any(|a| matches!(a, Action::Discard))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

pub struct Evaluator<'a> {
    message: &'a ParsedMessage,
    actions: Vec<Action>,
    implicit_keep: bool,
}

impl<'a> Evaluator<'a> {
    pub fn new(message: &'a ParsedMessage) -> Self {
        Self {
            message,
            actions: Vec::new(),
            implicit_keep: true,
        }
    }

    pub fn evaluate(mut self, script: &Script) -> Result<Evaluation> {
        self.run(&script.commands)?;
        Ok(Evaluation {
            actions: self.actions,
            implicit_keep: self.implicit_keep,
        })
    }

    fn run(&mut self, commands: &[Command]) -> Result<Flow> {
        for command in commands {
            let flow = match command {
                Command::Require(_) => Flow::Continue,
                Command::If(rule) if !rule.enabled() => {
                    tracing::trace!(rule = rule.name.as_deref().unwrap_or(""), "rule disabled");
                    Flow::Continue
                }
                Command::If(rule) => {
                    if self.test(&rule.condition)? == Some(true) {
                        tracing::debug!(rule = rule.name.as_deref().unwrap_or(""), "rule matched");
                        self.run(&rule.block)?
                    } else {
                        self.run_alternatives(&rule.alternatives)?
                    }
                }
                Command::Action(Action::Stop) => Flow::Stop,
                Command::Action(action) => {
                    self.collect(action);
                    Flow::Continue
                }
                Command::Unrecognized(unknown) => {
                    tracing::debug!(command = %unknown.name, "skipping unsupported command");
                    Flow::Continue
                }
            };
            if flow == Flow::Stop {
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    fn run_alternatives(&mut self, alternatives: &[Alternative]) -> Result<Flow> {
        for alternative in alternatives {
            match alternative {
                Alternative::ElsIf { condition, block } => {
                    if self.test(condition)? == Some(true) {
                        return self.run(block);
                    }
                }
                Alternative::Else { block } => return self.run(block),
            }
        }
        Ok(Flow::Continue)
    }

    fn collect(&mut self, action: &Action) {
        let cancels_keep = match action {
            Action::Keep | Action::Discard => true,
            Action::FileInto { copy, .. } | Action::Redirect { copy, .. } => !copy,
            _ => false,
        };
        if cancels_keep {
            self.implicit_keep = false;
        }
        self.actions.push(action.clone());
    }

    /// `None` means the test could not be evaluated and counts as absent.
    fn test(&self, test: &Test) -> Result<Option<bool>> {
        Ok(match test {
            Test::True => Some(true),
            Test::False => Some(false),
            Test::Not(inner) => self.test(inner)?.map(|r| !r),
            Test::AllOf(tests) => {
                let mut result = None;
                for t in tests {
                    match self.test(t)? {
                        Some(false) => return Ok(Some(false)),
                        Some(true) => result = Some(true),
                        None => {}
                    }
                }
                result
            }
            Test::AnyOf(tests) => {
                let mut result = None;
                for t in tests {
                    match self.test(t)? {
                        Some(true) => return Ok(Some(true)),
                        Some(false) => result = Some(false),
                        None => {}
                    }
                }
                result
            }
            Test::Header {
                match_type,
                case_sensitive,
                header_names,
                keys,
            } => Some(self.header_test(header_names, *match_type, *case_sensitive, keys)?),
            Test::Address {
                address_part,
                match_type,
                case_sensitive,
                header_names,
                keys,
            } => Some(self.address_test(
                header_names,
                *address_part,
                *match_type,
                *case_sensitive,
                keys,
            )?),
            Test::Exists { header_names } => Some(
                header_names
                    .iter()
                    .all(|name| self.message.headers().contains(name)),
            ),
            Test::Size { comparator, limit } => {
                let size = self.message.size() as u64;
                Some(match comparator {
                    SizeComparator::Over => size > *limit,
                    SizeComparator::Under => size < *limit,
                })
            }
            Test::Date { comparator, date } => Some(self.date_test(*comparator, *date)),
            Test::Body {
                match_type,
                case_sensitive,
                keys,
            } => Some(any_match(
                *match_type,
                *case_sensitive,
                keys,
                [self.message.body_text()],
            )?),
            Test::Attachment => Some(self.message.has_attachments()),
            Test::Unrecognized { name, .. } => {
                tracing::debug!(test = %name, "unsupported test treated as absent");
                None
            }
        })
    }

    fn header_test(
        &self,
        names: &[String],
        match_type: MatchType,
        case_sensitive: bool,
        keys: &[String],
    ) -> Result<bool> {
        let values: Vec<String> = names
            .iter()
            .flat_map(|name| self.message.header_values(name))
            .collect();
        any_match(match_type, case_sensitive, keys, values.iter().map(String::as_str))
    }

    fn address_test(
        &self,
        names: &[String],
        part: AddressPartType,
        match_type: MatchType,
        case_sensitive: bool,
        keys: &[String],
    ) -> Result<bool> {
        let values: Vec<String> = names
            .iter()
            .flat_map(|name| self.message.header_values(name))
            .flat_map(|value| parse_addresses(&value))
            .map(|address| address_part(&address, part).to_string())
            .collect();
        any_match(match_type, case_sensitive, keys, values.iter().map(String::as_str))
    }

    fn date_test(&self, comparator: DateComparator, date: NaiveDate) -> bool {
        let Some(sent) = self.message.headers().get("date").and_then(parse_date) else {
            return false;
        };
        let sent = sent.date_naive();
        match comparator {
            DateComparator::Before => sent < date,
            DateComparator::After => sent > date,
        }
    }
}

fn address_part(address: &str, part: AddressPartType) -> &str {
    match (part, address.rfind('@')) {
        (AddressPartType::All, _) => address,
        (AddressPartType::Localpart, Some(at)) => &address[..at],
        (AddressPartType::Localpart, None) => address,
        (AddressPartType::Domain, Some(at)) => &address[at + 1..],
        (AddressPartType::Domain, None) => "",
    }
}

/// Evaluates `script` against `message`.
pub fn evaluate(script: &Script, message: &ParsedMessage) -> Result<Evaluation> {
    Evaluator::new(message).evaluate(script)
}
