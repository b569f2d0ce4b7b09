//! Emit Sieve script text from AST nodes.
//!
//! Output parses back to an equal AST. A rule's top-level `allof`/`anyof` puts one
//! test per line; nested compound tests stay inline.
use std::collections::BTreeSet;

use crate::model::enums::MatchType;
use crate::sieve::ast::*;

pub fn emit(script: &Script) -> String {
    let mut out = String::new();
    let mut first = true;

    // Collect all requires into a single statement
    let mut all_requires: Vec<&str> = Vec::new();
    for cmd in &script.commands {
        if let Command::Require(exts) = cmd {
            for ext in exts {
                if !all_requires.contains(&ext.as_str()) {
                    all_requires.push(ext);
                }
            }
        }
    }
    if !all_requires.is_empty() {
        emit_require(&mut out, &all_requires);
        first = false;
    }

    for cmd in &script.commands {
        match cmd {
            Command::Require(_) => {}
            Command::If(block) => {
                if !first {
                    out.push('\n');
                }
                emit_if_block(&mut out, block, 0);
                first = false;
            }
            other => {
                emit_command(&mut out, other, 0);
                first = false;
            }
        }
    }

    out
}

pub(crate) fn emit_require(out: &mut String, requires: &[&str]) {
    if let [single] = requires {
        out.push_str(&format!("require \"{}\";\n", escape_sieve_string(single)));
    } else {
        let list = requires
            .iter()
            .map(|e| format!("\"{}\"", escape_sieve_string(e)))
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str(&format!("require [{list}];\n"));
    }
}

fn emit_commands(out: &mut String, commands: &[Command], indent: usize) {
    for cmd in commands {
        emit_command(out, cmd, indent);
    }
}

fn emit_command(out: &mut String, cmd: &Command, indent: usize) {
    match cmd {
        Command::Require(exts) => {
            out.push_str(&"    ".repeat(indent));
            let exts: Vec<&str> = exts.iter().map(String::as_str).collect();
            emit_require(out, &exts);
        }
        Command::If(block) => emit_if_block(out, block, indent),
        Command::Action(action) => emit_action(out, action, indent),
        Command::Unrecognized(unknown) => {
            out.push_str(&"    ".repeat(indent));
            out.push_str(&unknown.name);
            emit_arguments(out, &unknown.arguments);
            emit_nested_tests(out, &unknown.tests);
            match &unknown.block {
                Some(block) => {
                    out.push_str(" {\n");
                    emit_commands(out, block, indent + 1);
                    out.push_str(&"    ".repeat(indent));
                    out.push_str("}\n");
                }
                None => out.push_str(";\n"),
            }
        }
    }
}

fn emit_if_block(out: &mut String, block: &IfBlock, indent: usize) {
    let prefix = "    ".repeat(indent);
    if let Some(name) = &block.name {
        out.push_str(&format!("{prefix}# {name}\n"));
    }

    out.push_str(&prefix);
    out.push_str(block.tag.as_sieve());
    out.push(' ');
    emit_rule_condition(out, &block.condition, indent);
    out.push_str(" {\n");
    emit_commands(out, &block.block, indent + 1);
    out.push_str(&prefix);
    out.push('}');

    for alt in &block.alternatives {
        match alt {
            Alternative::ElsIf { condition, block } => {
                out.push_str(" elsif ");
                emit_rule_condition(out, condition, indent);
                out.push_str(" {\n");
                emit_commands(out, block, indent + 1);
                out.push_str(&prefix);
                out.push('}');
            }
            Alternative::Else { block } => {
                out.push_str(" else {\n");
                emit_commands(out, block, indent + 1);
                out.push_str(&prefix);
                out.push('}');
            }
        }
    }

    out.push('\n');
}

fn emit_rule_condition(out: &mut String, test: &Test, indent: usize) {
    let (keyword, tests) = match test {
        Test::AllOf(tests) => ("allof", tests),
        Test::AnyOf(tests) => ("anyof", tests),
        other => return emit_test(out, other),
    };
    let separator = format!(",\n{}  ", "    ".repeat(indent));
    out.push_str(keyword);
    out.push_str(" (");
    for (i, test) in tests.iter().enumerate() {
        if i > 0 {
            out.push_str(&separator);
        }
        emit_test(out, test);
    }
    out.push(')');
}

fn emit_test_list(out: &mut String, tests: &[Test]) {
    out.push('(');
    for (i, test) in tests.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        emit_test(out, test);
    }
    out.push(')');
}

fn emit_nested_tests(out: &mut String, tests: &[Test]) {
    match tests {
        [] => {}
        [single] => {
            out.push(' ');
            emit_test(out, single);
        }
        many => {
            out.push(' ');
            emit_test_list(out, many);
        }
    }
}

fn emit_match(out: &mut String, match_type: MatchType, case_sensitive: bool) {
    if case_sensitive {
        out.push_str(" :comparator \"i;octet\"");
    }
    out.push(' ');
    out.push_str(match_type.as_sieve());
}

pub(crate) fn emit_test(out: &mut String, test: &Test) {
    match test {
        Test::AllOf(tests) => {
            out.push_str("allof ");
            emit_test_list(out, tests);
        }
        Test::AnyOf(tests) => {
            out.push_str("anyof ");
            emit_test_list(out, tests);
        }
        Test::Not(inner) => {
            out.push_str("not ");
            emit_test(out, inner);
        }
        Test::Header {
            match_type,
            case_sensitive,
            header_names,
            keys,
        } => {
            out.push_str("header");
            emit_match(out, *match_type, *case_sensitive);
            out.push(' ');
            emit_string_or_list(out, header_names);
            out.push(' ');
            emit_string_or_list(out, keys);
        }
        Test::Address {
            address_part,
            match_type,
            case_sensitive,
            header_names,
            keys,
        } => {
            out.push_str("address");
            emit_match(out, *match_type, *case_sensitive);
            out.push(' ');
            out.push_str(address_part.as_sieve());
            out.push(' ');
            emit_string_or_list(out, header_names);
            out.push(' ');
            emit_string_or_list(out, keys);
        }
        Test::Exists { header_names } => {
            out.push_str("exists ");
            emit_string_or_list(out, header_names);
        }
        Test::Size { comparator, limit } => {
            out.push_str(&format!("size {} {}", comparator.as_sieve(), format_size(*limit)));
        }
        Test::Date { comparator, date } => {
            out.push_str(&format!(
                "date {} \"{}\"",
                comparator.as_sieve(),
                date.format("%Y%m%d")
            ));
        }
        Test::Body {
            match_type,
            case_sensitive,
            keys,
        } => {
            out.push_str("body");
            emit_match(out, *match_type, *case_sensitive);
            out.push(' ');
            emit_string_or_list(out, keys);
        }
        Test::Attachment => out.push_str("attachment"),
        Test::True => out.push_str("true"),
        Test::False => out.push_str("false"),
        Test::Unrecognized {
            name,
            arguments,
            tests,
        } => {
            out.push_str(name);
            emit_arguments(out, arguments);
            emit_nested_tests(out, tests);
        }
    }
}

/// Prints a byte count in the largest unit that divides it exactly.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [(u64, &str); 3] = [(1 << 30, "G"), (1 << 20, "M"), (1 << 10, "K")];
    if bytes > 0 {
        for (unit, suffix) in UNITS {
            if bytes % unit == 0 {
                return format!("{}{suffix}", bytes / unit);
            }
        }
    }
    bytes.to_string()
}

fn emit_string_or_list(out: &mut String, items: &[String]) {
    if items.len() == 1 {
        out.push_str(&format!("\"{}\"", escape_sieve_string(&items[0])));
    } else {
        out.push('[');
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(&format!("\"{}\"", escape_sieve_string(item)));
        }
        out.push(']');
    }
}

fn escape_sieve_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Writes a `text:` multi-line string, dot-stuffing lines that start with a period.
pub(crate) fn emit_multiline(out: &mut String, body: &str) {
    out.push_str("text:\r\n");
    for (i, line) in body.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
    }
    out.push_str("\r\n.\r\n");
}

fn emit_arguments(out: &mut String, arguments: &[Argument]) {
    for arg in arguments {
        out.push(' ');
        match arg {
            Argument::QuotedString(s) => {
                out.push_str(&format!("\"{}\"", escape_sieve_string(s)));
            }
            Argument::MultiLine(s) => emit_multiline(out, s),
            Argument::Number(n) => out.push_str(n),
            Argument::Tag(t) => out.push_str(t),
            Argument::StringList(items) => emit_bracketed(out, items),
        }
    }
}

fn emit_action(out: &mut String, action: &Action, indent: usize) {
    out.push_str(&"    ".repeat(indent));
    out.push_str(action.name());
    match action {
        Action::Keep | Action::Discard | Action::Stop => {}
        Action::FileInto { path, copy, flags } => {
            if *copy {
                out.push_str(" :copy");
            }
            if !flags.is_empty() {
                out.push_str(" :flags ");
                emit_bracketed(out, flags);
            }
            out.push(' ');
            emit_string_or_list(out, std::slice::from_ref(path));
        }
        Action::Redirect { address, copy } => {
            if *copy {
                out.push_str(" :copy");
            }
            out.push(' ');
            emit_string_or_list(out, std::slice::from_ref(address));
        }
        Action::Reply { body } => {
            out.push(' ');
            emit_multiline(out, body);
        }
        Action::Notify {
            address,
            subject,
            body,
            max_bytes,
            headers,
        } => {
            out.push_str(&format!(
                " \"{}\" \"{}\" ",
                escape_sieve_string(address),
                escape_sieve_string(subject)
            ));
            emit_multiline(out, body);
            if let Some(max) = max_bytes {
                out.push_str(&format!(" {max}"));
            }
            if !headers.is_empty() {
                out.push(' ');
                emit_bracketed(out, headers);
            }
        }
        Action::Tag { name } | Action::Flag { name, .. } => {
            out.push(' ');
            emit_string_or_list(out, std::slice::from_ref(name));
        }
    }
    out.push_str(";\n");
}

/// Always bracketed, even for a single item.
fn emit_bracketed(out: &mut String, items: &[String]) {
    out.push('[');
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&format!("\"{}\"", escape_sieve_string(item)));
    }
    out.push(']');
}

/// Compute what `require` extensions a script's AST needs.
pub fn compute_requires(script: &Script) -> Vec<String> {
    let mut requires = BTreeSet::new();
    collect_command_requires(&script.commands, &mut requires);
    requires.into_iter().map(str::to_string).collect()
}

fn collect_command_requires(commands: &[Command], requires: &mut BTreeSet<&'static str>) {
    for cmd in commands {
        match cmd {
            Command::If(block) => {
                collect_test_requires(&block.condition, requires);
                collect_command_requires(&block.block, requires);
                for alt in &block.alternatives {
                    match alt {
                        Alternative::ElsIf { condition, block } => {
                            collect_test_requires(condition, requires);
                            collect_command_requires(block, requires);
                        }
                        Alternative::Else { block } => collect_command_requires(block, requires),
                    }
                }
            }
            Command::Action(action) => collect_action_requires(action, requires),
            Command::Unrecognized(unknown) => {
                for test in &unknown.tests {
                    collect_test_requires(test, requires);
                }
                if let Some(block) = &unknown.block {
                    collect_command_requires(block, requires);
                }
            }
            Command::Require(_) => {}
        }
    }
}

fn collect_test_requires(test: &Test, requires: &mut BTreeSet<&'static str>) {
    match test {
        Test::AllOf(tests) | Test::AnyOf(tests) | Test::Unrecognized { tests, .. } => {
            for t in tests {
                collect_test_requires(t, requires);
            }
        }
        Test::Not(inner) => collect_test_requires(inner, requires),
        Test::Body { match_type, .. } => {
            requires.insert("body");
            if *match_type == MatchType::Regex {
                requires.insert("regex");
            }
        }
        Test::Header { match_type, .. } | Test::Address { match_type, .. } => {
            if *match_type == MatchType::Regex {
                requires.insert("regex");
            }
        }
        Test::Date { .. } => {
            requires.insert("date");
        }
        _ => {}
    }
}

fn collect_action_requires(action: &Action, requires: &mut BTreeSet<&'static str>) {
    match action {
        Action::FileInto { copy, flags, .. } => {
            requires.insert("fileinto");
            if *copy {
                requires.insert("copy");
            }
            if !flags.is_empty() {
                requires.insert("imap4flags");
            }
        }
        Action::Redirect { copy: true, .. } => {
            requires.insert("copy");
        }
        Action::Reply { .. } => {
            requires.insert("reply");
        }
        Action::Notify { .. } => {
            requires.insert("notify");
        }
        Action::Tag { .. } => {
            requires.insert("tag");
        }
        Action::Flag { .. } => {
            requires.insert("flag");
        }
        _ => {}
    }
}
