//! Header block parsing and the structured header values the filter looks at.

use std::borrow::Cow;

use chrono::{DateTime, FixedOffset};
use encoding_rs::{Encoding, WINDOWS_1252};
use lazy_static::lazy_static;
use regex::Regex;

use crate::mime::encoding::{decode_base64, decode_quoted_printable};

lazy_static! {
    static ref ENCODED_WORD: Regex =
        Regex::new(r"^=\?([^?\s]*)\?([bBqQ])\?([^?\s]*)\?=$").expect("valid regex");
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    /// Unfolded value with surrounding whitespace trimmed. Encoded words are left alone.
    pub value: String,
}

/// Headers in message order. Lookups ignore case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    headers: Vec<Header>,
}

impl HeaderMap {
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push(Header {
            name: name.into(),
            value: value.into(),
        });
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn get_all<'a, 'b>(
        &'a self,
        name: &'b str,
    ) -> impl Iterator<Item = &'a str> + use<'a, 'b> {
        self.headers
            .iter()
            .filter(move |h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.headers.iter()
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

/// Raw header bytes: UTF-8 when valid, windows-1252 otherwise.
pub fn decode_header_bytes(raw: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(raw) {
        Ok(s) => Cow::Borrowed(s),
        Err(_) => WINDOWS_1252.decode_without_bom_handling(raw).0,
    }
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\r' | b'\n') {
        end -= 1;
    }
    &line[..end]
}

/// Parses the header block at the start of `data`.
///
/// Returns the headers and the offset where the body starts. The block ends at a blank line,
/// which is consumed, or at the first line that is neither `name:` nor a continuation, which
/// becomes the first body line. With neither the whole input is headers. A leading mbox
/// `From ` envelope line is skipped.
pub fn parse_header_block(data: &[u8]) -> (HeaderMap, usize) {
    fn finish(current: &mut Option<(String, Vec<u8>)>, headers: &mut HeaderMap) {
        if let Some((name, value)) = current.take() {
            let value = decode_header_bytes(&value).trim().to_string();
            headers.push(name, value);
        }
    }

    let mut headers = HeaderMap::default();
    let mut current: Option<(String, Vec<u8>)> = None;
    let mut pos = 0;

    while pos < data.len() {
        let line_start = pos;
        let line_end = memchr::memchr(b'\n', &data[pos..])
            .map(|p| pos + p + 1)
            .unwrap_or(data.len());
        let line = trim_line_end(&data[pos..line_end]);
        pos = line_end;

        if line.is_empty() {
            finish(&mut current, &mut headers);
            return (headers, pos);
        }

        if matches!(line[0], b' ' | b'\t') {
            if let Some((_, value)) = &mut current {
                value.extend_from_slice(line);
                continue;
            }
        } else if line_start == 0 && line.starts_with(b"From ") {
            continue;
        } else if let Some(name) = field_name(line) {
            finish(&mut current, &mut headers);
            let colon = name.len();
            let name = decode_header_bytes(name).trim_end().to_string();
            current = Some((name, line[colon + 1..].to_vec()));
            continue;
        }

        tracing::debug!(offset = line_start, "header block ended by a non-header line");
        finish(&mut current, &mut headers);
        return (headers, line_start);
    }

    finish(&mut current, &mut headers);
    (headers, data.len())
}

/// The bytes before the colon when `line` starts with a field name: printable ASCII without
/// spaces, optionally followed by whitespace before the colon.
fn field_name(line: &[u8]) -> Option<&[u8]> {
    let colon = memchr::memchr(b':', line)?;
    let name = &line[..colon];
    let trimmed = name
        .iter()
        .rposition(|&b| !matches!(b, b' ' | b'\t'))
        .map(|last| &name[..=last])?;
    trimmed
        .iter()
        .all(|b| b.is_ascii_graphic() || *b >= 0x80)
        .then_some(name)
}

/// `Name: value` parameters with RFC 2231 continuations already joined and decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    fn set(&mut self, name: String, value: String) {
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.0.push((name, value)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Lower-cased `type/subtype`
    pub mime_type: String,
    pub params: Params,
}

pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";

impl ContentType {
    /// Parses a Content-Type value. A missing or malformed type falls back to `default`,
    /// keeping whatever parameters could be read.
    pub fn parse(value: Option<&str>, default: &str) -> Self {
        let (head, params) = match value {
            Some(v) => split_params(v),
            None => (String::new(), Params::default()),
        };
        let valid = head
            .split_once('/')
            .is_some_and(|(t, s)| is_token(t) && is_token(s));
        if !valid && value.is_some() {
            tracing::debug!(content_type = %head, "malformed content type, using {default}");
        }
        Self {
            mime_type: if valid { head } else { default.to_string() },
            params,
        }
    }

    pub fn primary_type(&self) -> &str {
        self.mime_type.split('/').next().unwrap_or("")
    }
}

fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?=".contains(&b))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Disposition {
    /// Lower-cased disposition type, empty when absent
    pub kind: String,
    pub params: Params,
}

impl Disposition {
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) => {
                let (kind, params) = split_params(v);
                Self { kind, params }
            }
            None => Self::default(),
        }
    }
}

/// Splits `head; a=b; c="d"` into the lower-cased head and its parameters.
fn split_params(value: &str) -> (String, Params) {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;
    for c in value.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ';' if !in_quotes => segments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    segments.push(current);

    let mut iter = segments.into_iter();
    let head = iter
        .next()
        .map(|h| h.trim().to_ascii_lowercase())
        .unwrap_or_default();

    let mut raw = Vec::new();
    for segment in iter {
        let Some((name, value)) = segment.split_once('=') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        if name.is_empty() {
            continue;
        }
        raw.push((name, unquote(value.trim())));
    }
    (head, join_rfc2231(raw))
}

fn unquote(value: &str) -> String {
    let Some(inner) = value.strip_prefix('"') else {
        return value.to_string();
    };
    let inner = inner.strip_suffix('"').unwrap_or(inner);
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

struct Section {
    index: u32,
    encoded: bool,
    value: String,
}

/// Joins `name*0`, `name*1*` sections and decodes `name*=charset'lang'%XX` values.
/// An extended value wins over a plain one of the same name.
fn join_rfc2231(raw: Vec<(String, String)>) -> Params {
    let mut params = Params::default();
    let mut extended: Vec<(String, Vec<Section>)> = Vec::new();

    for (name, value) in raw {
        let Some((base, rest)) = name.split_once('*') else {
            if !extended.iter().any(|(b, _)| *b == name) {
                params.set(name, value);
            }
            continue;
        };
        let section = if rest.is_empty() {
            Section {
                index: 0,
                encoded: true,
                value,
            }
        } else {
            let (number, encoded) = match rest.strip_suffix('*') {
                Some(n) => (n, true),
                None => (rest, false),
            };
            let Ok(index) = number.parse::<u32>() else {
                continue;
            };
            Section {
                index,
                encoded,
                value,
            }
        };
        match extended.iter_mut().find(|(b, _)| b == base) {
            Some((_, sections)) => sections.push(section),
            None => extended.push((base.to_string(), vec![section])),
        }
    }

    for (base, mut sections) in extended {
        sections.sort_by_key(|s| s.index);
        let mut charset = None;
        let mut bytes = Vec::new();
        for (i, section) in sections.iter().enumerate() {
            let mut value = section.value.as_str();
            if i == 0 && section.encoded {
                let mut pieces = value.splitn(3, '\'');
                if let (Some(cs), Some(_lang), Some(data)) =
                    (pieces.next(), pieces.next(), pieces.next())
                {
                    charset = Some(cs.to_string()).filter(|c| !c.is_empty());
                    value = data;
                }
            }
            if section.encoded {
                bytes.extend(percent_decode(value));
            } else {
                bytes.extend_from_slice(value.as_bytes());
            }
        }
        let decoded = charset
            .and_then(|cs| Encoding::for_label(cs.as_bytes()))
            .map(|enc| enc.decode_without_bom_handling(&bytes).0.into_owned())
            .unwrap_or_else(|| String::from_utf8_lossy(&bytes).into_owned());
        params.set(base, decoded);
    }
    params
}

fn percent_decode(value: &str) -> Vec<u8> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(b) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

/// Decodes one RFC 2047 encoded word, or returns `None` if `word` is not one.
fn decode_encoded_word(word: &str) -> Option<String> {
    let captures = ENCODED_WORD.captures(word)?;
    let charset = captures.get(1)?.as_str();
    // RFC 2231 allows a language suffix: utf-8*en
    let charset = charset.split('*').next().unwrap_or(charset);
    let encoding = captures.get(2)?.as_str();
    let text = captures.get(3)?.as_str();

    let bytes = match encoding {
        "b" | "B" => decode_base64(text.as_bytes()),
        _ => decode_quoted_printable(text.replace('_', " ").as_bytes()),
    };
    let encoding = Encoding::for_label_no_replacement(charset.as_bytes())?;
    Some(encoding.decode_with_bom_removal(&bytes).0.into_owned())
}

/// Decodes RFC 2047 encoded words in a header value. Whitespace between two adjacent
/// encoded words is dropped; everything else is kept as is.
pub fn decode_encoded_words(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    let mut last_was_encoded = false;

    while !rest.is_empty() {
        let word_start = rest
            .find(|c: char| !c.is_whitespace())
            .unwrap_or(rest.len());
        let (space, after) = rest.split_at(word_start);
        let word_len = after.find(char::is_whitespace).unwrap_or(after.len());
        let (word, tail) = after.split_at(word_len);
        rest = tail;

        if word.is_empty() {
            out.push_str(space);
            break;
        }
        match decode_encoded_word(word) {
            Some(decoded) => {
                if !last_was_encoded {
                    out.push_str(space);
                }
                out.push_str(&decoded);
                last_was_encoded = true;
            }
            None => {
                out.push_str(space);
                out.push_str(word);
                last_was_encoded = false;
            }
        }
    }
    out
}

/// Expands `&#NNN;` and `&#xHH;` references. Malformed references are left as they are.
pub fn expand_char_refs(value: &str) -> String {
    if !value.contains("&#") {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(at) = rest.find("&#") {
        out.push_str(&rest[..at]);
        let candidate = &rest[at + 2..];
        let (radix, digits_start) = match candidate.as_bytes().first() {
            Some(b'x' | b'X') => (16, 1),
            _ => (10, 0),
        };
        let digits = &candidate[digits_start..];
        let digits_len = digits
            .find(|c: char| !c.is_digit(radix))
            .unwrap_or(digits.len());
        let expanded = (digits_len > 0 && digits[digits_len..].starts_with(';'))
            .then(|| u32::from_str_radix(&digits[..digits_len], radix).ok())
            .flatten()
            .and_then(char::from_u32);
        match expanded {
            Some(c) => {
                out.push(c);
                rest = &digits[digits_len + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[at + 1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Bare addresses (`local@domain`) from an address-list header value.
pub fn parse_addresses(value: &str) -> Vec<String> {
    let mut addresses = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut angle_depth = 0u32;
    let mut comment_depth = 0u32;

    let mut flush = |current: &mut String| {
        let item = std::mem::take(current);
        let item = item.trim();
        let address = match (item.rfind('<'), item.rfind('>')) {
            (Some(open), Some(close)) if open < close => item[open + 1..close].trim(),
            _ => item,
        };
        // group syntax `name: a@b, c@d;`
        let address = address.rsplit(':').next().unwrap_or(address);
        let address = address.trim_end_matches(';').trim();
        if !address.is_empty() {
            addresses.push(address.to_string());
        }
    };

    for c in value.chars() {
        match c {
            '"' if comment_depth == 0 => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '(' if !in_quotes => comment_depth += 1,
            ')' if !in_quotes && comment_depth > 0 => comment_depth -= 1,
            _ if comment_depth > 0 => {}
            '<' if !in_quotes => {
                angle_depth += 1;
                current.push(c);
            }
            '>' if !in_quotes => {
                angle_depth = angle_depth.saturating_sub(1);
                current.push(c);
            }
            ',' if !in_quotes && angle_depth == 0 => flush(&mut current),
            _ => current.push(c),
        }
    }
    flush(&mut current);
    addresses
}

/// Parses an RFC 2822 date, tolerating a trailing comment such as `(UTC)`.
pub fn parse_date(value: &str) -> Option<DateTime<FixedOffset>> {
    let value = value.trim();
    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date);
    }
    let without_comment = match value.find('(') {
        Some(at) => value[..at].trim(),
        None => value,
    };
    DateTime::parse_from_rfc2822(without_comment).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_block_unfolds_continuations() {
        let raw = b"Subject: hello\r\n  world\r\nX-Test :  v  \r\n\r\nbody";
        let (headers, body) = parse_header_block(raw);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("subject"), Some("hello  world"));
        assert_eq!(headers.get("X-TEST"), Some("v"));
        assert_eq!(&raw[body..], b"body");
    }

    #[test]
    fn test_header_block_ends_at_non_header_line() {
        let raw = b"X-Test: v\r\nnot a header\r\nNote: still body\r\n";
        let (headers, body) = parse_header_block(raw);
        assert_eq!(headers.len(), 1);
        assert_eq!(&raw[body..], b"not a header\r\nNote: still body\r\n");

        let raw = b"Hello there, this is the body\r\nsecond line\r\n";
        let (headers, body) = parse_header_block(raw);
        assert!(headers.is_empty());
        assert_eq!(body, 0);

        let raw = b"  indented body\r\n";
        assert_eq!(parse_header_block(raw).1, 0);
    }

    #[test]
    fn test_header_block_skips_mbox_envelope() {
        let raw = b"From a@b.com Mon Jan  1 00:00:00 2024\nSubject: hi\n\nbody";
        let (headers, body) = parse_header_block(raw);
        assert_eq!(headers.get("subject"), Some("hi"));
        assert_eq!(&raw[body..], b"body");
    }

    #[test]
    fn test_header_block_without_blank_line() {
        let raw = b"From: a@b.com\nTo: c@d.com";
        let (headers, body) = parse_header_block(raw);
        assert_eq!(headers.get_all("to").collect::<Vec<_>>(), vec!["c@d.com"]);
        assert_eq!(body, raw.len());
    }

    #[test]
    fn test_lookups_outlive_the_name() {
        let (headers, _) = parse_header_block(b"Subject: hi\nSubject: again\n\n");
        let first = {
            let name = String::from("subject");
            headers.get(&name)
        };
        let all: Vec<&str> = {
            let name = String::from("SUBJECT");
            headers.get_all(&name).collect()
        };
        assert_eq!(first, Some("hi"));
        assert_eq!(all, vec!["hi", "again"]);
    }

    #[test]
    fn test_eight_bit_header_falls_back_to_windows_1252() {
        let (headers, _) = parse_header_block(b"Subject: caf\xe9\n\n");
        assert_eq!(headers.get("subject"), Some("café"));
    }

    #[test]
    fn test_content_type_params() {
        let ct = ContentType::parse(
            Some("Multipart/Mixed; boundary=\"a;b\"; charset=UTF-8"),
            DEFAULT_CONTENT_TYPE,
        );
        assert_eq!(ct.mime_type, "multipart/mixed");
        assert_eq!(ct.primary_type(), "multipart");
        assert_eq!(ct.params.get("BOUNDARY"), Some("a;b"));
        assert_eq!(ct.params.get("charset"), Some("UTF-8"));
    }

    #[test]
    fn test_malformed_content_type_defaults() {
        let ct = ContentType::parse(Some("text; charset=latin1"), DEFAULT_CONTENT_TYPE);
        assert_eq!(ct.mime_type, "text/plain");
        assert_eq!(ct.params.get("charset"), Some("latin1"));
        assert_eq!(
            ContentType::parse(None, "message/rfc822").mime_type,
            "message/rfc822"
        );
    }

    #[test]
    fn test_rfc2231_parameters() {
        let disp = Disposition::parse(Some(
            "ATTACHMENT; filename*0*=utf-8''%E6%97%A5; filename*1=\"-report.txt\"; filename=\"plain.txt\"",
        ));
        assert_eq!(disp.kind, "attachment");
        assert_eq!(disp.params.get("filename"), Some("日-report.txt"));

        let disp = Disposition::parse(Some("inline; filename*=iso-8859-1'en'caf%E9.txt"));
        assert_eq!(disp.params.get("filename"), Some("café.txt"));
    }

    #[test]
    fn test_encoded_words() {
        assert_eq!(
            decode_encoded_words("=?UTF-8?B?SGVsbG8=?= =?utf-8?Q?_w=C3=B6rld?= and more"),
            "Hello wörld and more"
        );
        assert_eq!(decode_encoded_words("no =?bogus words"), "no =?bogus words");
        assert_eq!(
            decode_encoded_words("Re: =?iso-8859-1?q?caf=E9?="),
            "Re: café"
        );
    }

    #[test]
    fn test_char_refs() {
        assert_eq!(expand_char_refs("&#26085;&#x40;.txt"), "日@.txt");
        assert_eq!(expand_char_refs("a&;&#;&#x;&#&#55"), "a&;&#;&#x;&#&#55");
    }

    #[test]
    fn test_parse_addresses() {
        let addresses = parse_addresses(
            "\"Doe, John\" <john@example.com>, jane@example.org (Jane), team: a@b.c, d@e.f;",
        );
        assert_eq!(
            addresses,
            vec!["john@example.com", "jane@example.org", "a@b.c", "d@e.f"]
        );
    }

    #[test]
    fn test_parse_date() {
        let date = parse_date("Tue, 1 Jul 2003 10:52:37 +0200 (CEST)").unwrap();
        assert_eq!(date.format("%Y%m%d").to_string(), "20030701");
        assert!(parse_date("yesterday").is_none());
    }
}
