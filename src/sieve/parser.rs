//! Recursive descent Sieve parser.
//!
//! Parses tokenized scripts into an AST. Commands and tests the engine does not
//! model are kept as `Unrecognized` nodes so they survive a round trip; a known
//! test carrying an unsupported tag is downgraded to `Unrecognized` with a warning.
//! Grammar violations fail the whole compilation.
use chrono::NaiveDate;

use crate::error::CompileError;
use crate::model::enums::{AddressPartType, DateComparator, MatchType, SizeComparator};
use crate::sieve::ast::*;
use crate::sieve::lexer::{tokenize, Span, Token};

pub fn parse(input: &str) -> Result<Script, CompileError> {
    parse_tokens(input).map_err(|e| e.locate(input))
}

fn parse_tokens(input: &str) -> Result<Script, CompileError> {
    let spans = tokenize(input)?;
    let mut pos = 0;
    let commands = parse_commands(&spans, &mut pos, false)?;
    Ok(Script { commands })
}

/// Names of the rules in a script, taken from the `# name` comment right before each rule.
pub fn rule_names(input: &str) -> Result<Vec<String>, CompileError> {
    let script = parse(input)?;
    Ok(script
        .rules()
        .filter_map(|(_, rule)| rule.name.clone())
        .collect())
}

/// Parses a Sieve size string: an integer with an optional K, M or G suffix.
pub fn parse_size(size: &str) -> Option<u64> {
    let size = size.trim();
    let (digits, multiplier) = match size.chars().last()?.to_ascii_uppercase() {
        'K' => (&size[..size.len() - 1], 1024),
        'M' => (&size[..size.len() - 1], 1024 * 1024),
        'G' => (&size[..size.len() - 1], 1024 * 1024 * 1024),
        _ => (size, 1),
    };
    digits.parse::<u64>().ok()?.checked_mul(multiplier)
}

fn error_at(tokens: &[Span], pos: usize, message: impl Into<String>) -> CompileError {
    let offset = match tokens.get(pos) {
        Some(span) => span.offset,
        None => tokens.last().map(|s| s.offset + s.len).unwrap_or(0),
    };
    CompileError::new(offset, message)
}

fn expect(tokens: &[Span], pos: &mut usize, want: Token, what: &str) -> Result<(), CompileError> {
    match tokens.get(*pos) {
        Some(span) if span.token == want => {
            *pos += 1;
            Ok(())
        }
        Some(span) => Err(error_at(
            tokens,
            *pos,
            format!("Expected {what}, got {:?}", span.token),
        )),
        None => Err(error_at(tokens, *pos, format!("Expected {what}, got end of input"))),
    }
}

fn parse_commands(
    tokens: &[Span],
    pos: &mut usize,
    in_block: bool,
) -> Result<Vec<Command>, CompileError> {
    let mut commands = Vec::new();
    let mut pending_comment: Option<String> = None;

    loop {
        let Some(span) = tokens.get(*pos) else {
            if in_block {
                return Err(error_at(tokens, *pos, "Unexpected end of input in block"));
            }
            break;
        };
        match &span.token {
            Token::RBrace if in_block => {
                *pos += 1;
                break;
            }
            Token::Comment(text) => {
                pending_comment = Some(text.clone());
                *pos += 1;
            }
            Token::BlockComment(_) => {
                *pos += 1;
            }
            Token::Identifier(_) => {
                let comment = pending_comment.take();
                commands.push(parse_command(tokens, pos, comment)?);
            }
            other => {
                return Err(error_at(tokens, *pos, format!("Unexpected token {other:?}")));
            }
        }
    }

    Ok(commands)
}

fn parse_command(
    tokens: &[Span],
    pos: &mut usize,
    comment: Option<String>,
) -> Result<Command, CompileError> {
    let start = *pos;
    let Some(Token::Identifier(ident)) = tokens.get(*pos).map(|s| &s.token) else {
        return Err(error_at(tokens, *pos, "Expected command"));
    };
    let lower = ident.to_lowercase();
    *pos += 1;

    match lower.as_str() {
        "require" => {
            let exts = match tokens.get(*pos).map(|s| &s.token) {
                Some(Token::QuotedString(s)) => {
                    *pos += 1;
                    vec![s.clone()]
                }
                Some(Token::LBracket) => parse_string_list(tokens, pos)?,
                _ => return Err(error_at(tokens, *pos, "Expected extension name after require")),
            };
            expect(tokens, pos, Token::Semicolon, "';'")?;
            Ok(Command::Require(exts))
        }
        "if" | "disabled_if" => {
            let tag = RuleTag::from_sieve(&lower).unwrap_or(RuleTag::If);
            let name = comment.map(|c| c.trim().to_string()).filter(|c| !c.is_empty());
            Ok(Command::If(parse_if_block(tokens, pos, name, tag)?))
        }
        "elsif" | "else" => Err(error_at(tokens, start, format!("'{lower}' without 'if'"))),
        _ => {
            let arguments = parse_arguments(tokens, pos)?;
            let tests = parse_optional_tests(tokens, pos)?;
            let block = if matches!(tokens.get(*pos).map(|s| &s.token), Some(Token::LBrace)) {
                *pos += 1;
                Some(parse_commands(tokens, pos, true)?)
            } else {
                expect(tokens, pos, Token::Semicolon, "';'")?;
                None
            };

            if block.is_none() && tests.is_empty() {
                if let Some(action) = build_action(&lower, &arguments, tokens, start)? {
                    return Ok(Command::Action(action));
                }
            }
            tracing::debug!(command = %ident, "keeping unrecognized command");
            Ok(Command::Unrecognized(UnknownCommand {
                name: ident.clone(),
                arguments,
                tests,
                block,
            }))
        }
    }
}

fn parse_if_block(
    tokens: &[Span],
    pos: &mut usize,
    name: Option<String>,
    tag: RuleTag,
) -> Result<IfBlock, CompileError> {
    let condition = parse_test(tokens, pos)?;
    expect(tokens, pos, Token::LBrace, "'{' to start block")?;
    let block = parse_commands(tokens, pos, true)?;
    let mut alternatives = Vec::new();

    loop {
        match tokens.get(*pos).map(|s| &s.token) {
            Some(Token::Identifier(s)) if s.eq_ignore_ascii_case("elsif") => {
                *pos += 1;
                let condition = parse_test(tokens, pos)?;
                expect(tokens, pos, Token::LBrace, "'{' to start block")?;
                let block = parse_commands(tokens, pos, true)?;
                alternatives.push(Alternative::ElsIf { condition, block });
            }
            Some(Token::Identifier(s)) if s.eq_ignore_ascii_case("else") => {
                *pos += 1;
                expect(tokens, pos, Token::LBrace, "'{' to start block")?;
                let block = parse_commands(tokens, pos, true)?;
                alternatives.push(Alternative::Else { block });
                break;
            }
            _ => break,
        }
    }

    Ok(IfBlock {
        name,
        tag,
        condition,
        block,
        alternatives,
    })
}

fn parse_test(tokens: &[Span], pos: &mut usize) -> Result<Test, CompileError> {
    let start = *pos;
    let ident = match tokens.get(*pos).map(|s| &s.token) {
        Some(Token::Identifier(ident)) => ident.clone(),
        Some(other) => {
            return Err(error_at(tokens, *pos, format!("Expected test, got {other:?}")))
        }
        None => return Err(error_at(tokens, *pos, "Expected test, got end of input")),
    };
    *pos += 1;
    let lower = ident.to_lowercase();

    match lower.as_str() {
        "allof" => Ok(Test::AllOf(parse_test_list(tokens, pos)?)),
        "anyof" => Ok(Test::AnyOf(parse_test_list(tokens, pos)?)),
        "not" => Ok(Test::Not(Box::new(parse_test(tokens, pos)?))),
        "true" => Ok(Test::True),
        "false" => Ok(Test::False),
        _ => {
            let arguments = parse_arguments(tokens, pos)?;
            let nested = parse_optional_tests(tokens, pos)?;
            build_test(&ident, arguments, nested, tokens, start)
        }
    }
}

fn parse_optional_tests(tokens: &[Span], pos: &mut usize) -> Result<Vec<Test>, CompileError> {
    match tokens.get(*pos).map(|s| &s.token) {
        Some(Token::LParen) => parse_test_list(tokens, pos),
        Some(Token::Identifier(_)) => Ok(vec![parse_test(tokens, pos)?]),
        _ => Ok(Vec::new()),
    }
}

fn parse_test_list(tokens: &[Span], pos: &mut usize) -> Result<Vec<Test>, CompileError> {
    expect(tokens, pos, Token::LParen, "'(' in test list")?;
    let mut tests = vec![parse_test(tokens, pos)?];
    loop {
        match tokens.get(*pos).map(|s| &s.token) {
            Some(Token::Comma) => {
                *pos += 1;
                tests.push(parse_test(tokens, pos)?);
            }
            Some(Token::RParen) => {
                *pos += 1;
                break;
            }
            _ => return Err(error_at(tokens, *pos, "Expected ',' or ')' in test list")),
        }
    }
    Ok(tests)
}

fn parse_arguments(tokens: &[Span], pos: &mut usize) -> Result<Vec<Argument>, CompileError> {
    let mut arguments = Vec::new();
    loop {
        let argument = match tokens.get(*pos).map(|s| &s.token) {
            Some(Token::QuotedString(s)) => Argument::QuotedString(s.clone()),
            Some(Token::MultiLineString(s)) => Argument::MultiLine(s.clone()),
            Some(Token::Number(n)) => Argument::Number(n.clone()),
            Some(Token::Tag(t)) => Argument::Tag(t.clone()),
            Some(Token::LBracket) => {
                arguments.push(Argument::StringList(parse_string_list(tokens, pos)?));
                continue;
            }
            _ => break,
        };
        arguments.push(argument);
        *pos += 1;
    }
    Ok(arguments)
}

fn parse_string_list(tokens: &[Span], pos: &mut usize) -> Result<Vec<String>, CompileError> {
    expect(tokens, pos, Token::LBracket, "'['")?;
    let mut items = Vec::new();
    loop {
        match tokens.get(*pos).map(|s| &s.token) {
            Some(Token::QuotedString(s)) => {
                items.push(s.clone());
                *pos += 1;
            }
            _ => return Err(error_at(tokens, *pos, "Expected string in string list")),
        }
        match tokens.get(*pos).map(|s| &s.token) {
            Some(Token::Comma) => *pos += 1,
            Some(Token::RBracket) => {
                *pos += 1;
                break;
            }
            _ => return Err(error_at(tokens, *pos, "Expected ',' or ']' in string list")),
        }
    }
    Ok(items)
}

/// Splits string-test arguments into match type, case sensitivity and positional
/// arguments. Returns `None` if a tag is not supported.
struct StringTestArgs<'a> {
    match_type: MatchType,
    case_sensitive: bool,
    address_part: Option<AddressPartType>,
    positional: Vec<&'a Argument>,
}

fn split_string_test_args<'a>(
    test: &str,
    arguments: &'a [Argument],
    allow_address_part: bool,
) -> Option<StringTestArgs<'a>> {
    let mut parsed = StringTestArgs {
        match_type: MatchType::Is,
        case_sensitive: false,
        address_part: None,
        positional: Vec::new(),
    };
    let mut iter = arguments.iter();
    while let Some(arg) = iter.next() {
        match arg {
            Argument::Tag(tag) if tag == ":comparator" => {
                match iter.next().and_then(Argument::string) {
                    Some("i;octet") => parsed.case_sensitive = true,
                    Some("i;ascii-casemap") => parsed.case_sensitive = false,
                    other => {
                        tracing::warn!(test, comparator = ?other, "unsupported comparator, test ignored");
                        return None;
                    }
                }
            }
            Argument::Tag(tag) => {
                if let Some(m) = MatchType::from_sieve(tag) {
                    parsed.match_type = m;
                } else if let Some(part) =
                    AddressPartType::from_sieve(tag).filter(|_| allow_address_part)
                {
                    parsed.address_part = Some(part);
                } else if test == "body" && tag == ":text" {
                    // the default body transform
                } else {
                    tracing::warn!(test, tag = %tag, "unsupported tag, test ignored");
                    return None;
                }
            }
            other => parsed.positional.push(other),
        }
    }
    Some(parsed)
}

fn unrecognized(name: &str, arguments: Vec<Argument>, tests: Vec<Test>) -> Test {
    Test::Unrecognized {
        name: name.to_string(),
        arguments,
        tests,
    }
}

fn build_test(
    name: &str,
    arguments: Vec<Argument>,
    nested: Vec<Test>,
    tokens: &[Span],
    start: usize,
) -> Result<Test, CompileError> {
    let lower = name.to_lowercase();
    let known = matches!(
        lower.as_str(),
        "header" | "address" | "exists" | "size" | "date" | "body" | "attachment"
    );
    if !known {
        tracing::debug!(test = %name, "keeping unrecognized test");
        return Ok(unrecognized(name, arguments, nested));
    }
    if !nested.is_empty() {
        return Err(error_at(tokens, start, format!("'{lower}' does not take nested tests")));
    }
    let bad_args = |what: &str| error_at(tokens, start, format!("'{lower}' requires {what}"));

    match lower.as_str() {
        "header" | "address" => {
            let Some(args) = split_string_test_args(&lower, &arguments, lower == "address")
            else {
                return Ok(unrecognized(name, arguments, nested));
            };
            let [names, keys] = args.positional.as_slice() else {
                return Err(bad_args("header names and keys"));
            };
            let (Some(header_names), Some(keys)) = (names.strings(), keys.strings()) else {
                return Err(bad_args("header names and keys"));
            };
            if lower == "header" {
                Ok(Test::Header {
                    match_type: args.match_type,
                    case_sensitive: args.case_sensitive,
                    header_names,
                    keys,
                })
            } else {
                Ok(Test::Address {
                    address_part: args.address_part.unwrap_or_default(),
                    match_type: args.match_type,
                    case_sensitive: args.case_sensitive,
                    header_names,
                    keys,
                })
            }
        }
        "body" => {
            let Some(args) = split_string_test_args(&lower, &arguments, false) else {
                return Ok(unrecognized(name, arguments, nested));
            };
            let [keys] = args.positional.as_slice() else {
                return Err(bad_args("keys"));
            };
            let keys = keys.strings().ok_or_else(|| bad_args("keys"))?;
            Ok(Test::Body {
                match_type: args.match_type,
                case_sensitive: args.case_sensitive,
                keys,
            })
        }
        "exists" => match arguments.as_slice() {
            [Argument::Tag(tag), ..] => {
                tracing::warn!(test = "exists", tag = %tag, "unsupported tag, test ignored");
                Ok(unrecognized(name, arguments, nested))
            }
            [names] => Ok(Test::Exists {
                header_names: names.strings().ok_or_else(|| bad_args("header names"))?,
            }),
            _ => Err(bad_args("header names")),
        },
        "size" => match arguments.as_slice() {
            [Argument::Tag(tag), value] => {
                let Some(comparator) = SizeComparator::from_sieve(tag) else {
                    tracing::warn!(test = "size", tag = %tag, "unsupported tag, test ignored");
                    return Ok(unrecognized(name, arguments, nested));
                };
                let limit = match value {
                    Argument::Number(n) => parse_size(n),
                    other => other.string().and_then(parse_size),
                }
                .ok_or_else(|| bad_args("a numeric limit"))?;
                Ok(Test::Size { comparator, limit })
            }
            _ => Err(bad_args(":over or :under and a limit")),
        },
        "date" => match arguments.as_slice() {
            [Argument::Tag(tag), value] => {
                let Some(comparator) = DateComparator::from_sieve(tag) else {
                    tracing::warn!(test = "date", tag = %tag, "unsupported tag, test ignored");
                    return Ok(unrecognized(name, arguments, nested));
                };
                let date = value
                    .string()
                    .and_then(|s| NaiveDate::parse_from_str(s, "%Y%m%d").ok())
                    .ok_or_else(|| bad_args("a date in yyyyMMdd form"))?;
                Ok(Test::Date { comparator, date })
            }
            _ => Err(bad_args(":before or :after and a date")),
        },
        _ => {
            if arguments.is_empty() {
                Ok(Test::Attachment)
            } else {
                Err(bad_args("no arguments"))
            }
        }
    }
}

fn build_action(
    name: &str,
    arguments: &[Argument],
    tokens: &[Span],
    start: usize,
) -> Result<Option<Action>, CompileError> {
    let bad_args = |what: &str| error_at(tokens, start, format!("'{name}' requires {what}"));
    let single_string = |args: &[Argument]| match args {
        [arg] => arg.string().map(str::to_string),
        _ => None,
    };

    let action = match name {
        "keep" | "discard" | "stop" => {
            if !arguments.is_empty() {
                return Err(bad_args("no arguments"));
            }
            match name {
                "keep" => Action::Keep,
                "discard" => Action::Discard,
                _ => Action::Stop,
            }
        }
        "fileinto" | "redirect" => {
            let mut copy = false;
            let mut flags = Vec::new();
            let mut positional = Vec::new();
            let mut iter = arguments.iter();
            while let Some(arg) = iter.next() {
                match arg {
                    Argument::Tag(tag) if tag == ":copy" => copy = true,
                    Argument::Tag(tag) if tag == ":flags" && name == "fileinto" => {
                        flags = iter
                            .next()
                            .and_then(Argument::strings)
                            .ok_or_else(|| bad_args("a flag list after :flags"))?;
                    }
                    Argument::Tag(tag) => {
                        tracing::warn!(action = name, tag = %tag, "unsupported tag, action ignored");
                        return Ok(None);
                    }
                    other => positional.push(other.clone()),
                }
            }
            let target = single_string(&positional).ok_or_else(|| bad_args("one string"))?;
            if name == "fileinto" {
                Action::FileInto {
                    path: target,
                    copy,
                    flags,
                }
            } else {
                Action::Redirect {
                    address: target,
                    copy,
                }
            }
        }
        "reply" => Action::Reply {
            body: single_string(arguments).ok_or_else(|| bad_args("a body"))?,
        },
        "notify" => {
            if matches!(arguments.first(), Some(Argument::Tag(_))) {
                // RFC 5435 style notify is not modelled
                return Ok(None);
            }
            let text = |i: usize| arguments.get(i).and_then(Argument::string).map(str::to_string);
            let (Some(address), Some(subject), Some(body)) = (text(0), text(1), text(2)) else {
                return Err(bad_args("an address, a subject and a body"));
            };
            let mut max_bytes = None;
            let mut headers = Vec::new();
            for arg in &arguments[3..] {
                match arg {
                    Argument::Number(n) if max_bytes.is_none() && headers.is_empty() => {
                        max_bytes = Some(n.parse::<u64>().map_err(|_| bad_args("a byte limit"))?);
                    }
                    Argument::StringList(items) if headers.is_empty() => headers = items.clone(),
                    _ => return Err(bad_args("an optional byte limit and header list")),
                }
            }
            Action::Notify {
                address,
                subject,
                body,
                max_bytes,
                headers,
            }
        }
        "tag" => Action::Tag {
            name: single_string(arguments).ok_or_else(|| bad_args("a tag name"))?,
        },
        "flag" | "addflag" | "setflag" | "removeflag" => Action::Flag {
            name: single_string(arguments).ok_or_else(|| bad_args("a flag name"))?,
            set: name != "removeflag",
        },
        _ => return Ok(None),
    };
    Ok(Some(action))
}
