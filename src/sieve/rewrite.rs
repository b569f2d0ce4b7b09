//! Maintenance rewriters run when folders or tags change under existing rules.
//!
//! Each returns `None` when the script is untouched, so callers only persist real changes.
//! Running any of them twice gives the same result as running it once.
use crate::sieve::ast::*;
use crate::sieve::visitor::{self, RuleProperties, RuleVisitor, VisitPhase};

/// Collects the command index of every enabled rule holding a matching action.
struct RuleFinder<F> {
    matches: F,
    found: Vec<usize>,
}

impl<F: Fn(&Action) -> bool> RuleFinder<F> {
    fn check(&mut self, phase: VisitPhase, props: &RuleProperties, action: Action) {
        if phase == VisitPhase::Begin
            && props.enabled
            && (self.matches)(&action)
            && !self.found.contains(&props.rule_index)
        {
            self.found.push(props.rule_index);
        }
    }
}

impl<F: Fn(&Action) -> bool> RuleVisitor for RuleFinder<F> {
    fn visit_fileinto(
        &mut self,
        phase: VisitPhase,
        props: &RuleProperties,
        path: &str,
        copy: bool,
        flags: &[String],
    ) {
        let action = Action::FileInto {
            path: path.to_string(),
            copy,
            flags: flags.to_vec(),
        };
        self.check(phase, props, action);
    }

    fn visit_tag(&mut self, phase: VisitPhase, props: &RuleProperties, name: &str) {
        let action = Action::Tag {
            name: name.to_string(),
        };
        self.check(phase, props, action);
    }
}

fn disable_rules_where(script: &Script, matches: impl Fn(&Action) -> bool) -> Option<Script> {
    let mut finder = RuleFinder {
        matches,
        found: Vec::new(),
    };
    visitor::accept(script, &mut finder);

    let mut updated = script.clone();
    let mut changed = false;
    for index in finder.found {
        changed |= updated.set_rule_tag(index, RuleTag::DisabledIf);
    }
    changed.then_some(updated)
}

fn strip_leading_slashes(path: &str) -> (&str, &str) {
    let trimmed = path.trim_start_matches('/');
    (&path[..path.len() - trimmed.len()], trimmed)
}

/// Whether `path` is `folder` or lies below it. Leading slashes are ignored.
fn path_within(path: &str, folder: &str) -> bool {
    let (_, path) = strip_leading_slashes(path);
    let (_, folder) = strip_leading_slashes(folder);
    path == folder
        || path
            .strip_prefix(folder)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Disables every rule that files into `folder` or one of its subfolders.
pub fn folder_deleted(script: &Script, folder: &str) -> Option<Script> {
    disable_rules_where(script, |action| {
        matches!(action, Action::FileInto { path, .. } if path_within(path, folder))
    })
}

/// Disables every rule that applies the tag `name`.
pub fn tag_deleted(script: &Script, name: &str) -> Option<Script> {
    disable_rules_where(script, |action| {
        matches!(action, Action::Tag { name: tag } if tag == name)
    })
}

fn renamed_path(path: &str, old: &str, new: &str) -> Option<String> {
    let (lead, rest) = strip_leading_slashes(path);
    let (_, old) = strip_leading_slashes(old);
    let (_, new) = strip_leading_slashes(new);
    if rest == old {
        return Some(format!("{lead}{new}"));
    }
    let below = rest.strip_prefix(old)?.strip_prefix('/')?;
    Some(format!("{lead}{new}/{below}"))
}

/// Rewrites fileinto targets at or below `old` to point under `new`.
pub fn folder_renamed(script: &Script, old: &str, new: &str) -> Option<Script> {
    let mut updated = script.clone();
    let mut changed = false;
    updated.for_each_action_mut(&mut |action| {
        if let Action::FileInto { path, .. } = action {
            if let Some(renamed) = renamed_path(path, old, new).filter(|r| r != path) {
                *path = renamed;
                changed = true;
            }
        }
    });
    changed.then_some(updated)
}

/// Rewrites `tag "old"` to `tag "new"`.
pub fn tag_renamed(script: &Script, old: &str, new: &str) -> Option<Script> {
    let mut updated = script.clone();
    let mut changed = false;
    updated.for_each_action_mut(&mut |action| {
        if let Action::Tag { name } = action {
            if name == old && old != new {
                *name = new.to_string();
                changed = true;
            }
        }
    });
    changed.then_some(updated)
}
