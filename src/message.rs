//! `ParsedMessage`: a parsed MIME tree plus everything derived from it,
//! each computed the first time it is asked for.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use crate::mime::body;
use crate::mime::header::{decode_encoded_words, HeaderMap};
use crate::mime::{self, AnalysisFailure, FailureKind, MimeTree, PartId, PartInfo};

pub const DEFAULT_FRAGMENT_LENGTH: usize = 150;
const MAX_SUBJECT_LENGTH: usize = 1024;
const MAX_PREFIX_LENGTH: usize = 3;
const FWD_TRAILER: &str = "(fwd)";
const CALENDAR_PREFIXES: [&str; 8] = [
    "Accept:",
    "Accepted:",
    "Decline:",
    "Declined:",
    "Tentative:",
    "Cancelled:",
    "CANCELLED:",
    "New Time Proposed:",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageOptions {
    pub default_charset: Option<String>,
    pub prefer_html: bool,
    pub fragment_length: usize,
}

impl Default for MessageOptions {
    fn default() -> Self {
        Self {
            default_charset: None,
            prefer_html: false,
            fragment_length: DEFAULT_FRAGMENT_LENGTH,
        }
    }
}

/// Why a part could not be analyzed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartError {
    pub kind: FailureKind,
    pub message: String,
}

impl fmt::Display for PartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Per-part content analysis, such as text extraction for indexing.
pub trait PartAnalyzer {
    fn analyze(&self, part: &PartInfo, content: &[u8]) -> Result<(), PartError>;
}

/// Checks that text parts decode in the charset they declare.
#[derive(Debug, Default)]
pub struct TextAnalyzer;

impl PartAnalyzer for TextAnalyzer {
    fn analyze(&self, part: &PartInfo, _content: &[u8]) -> Result<(), PartError> {
        if !part.is_text() {
            return Ok(());
        }
        match part.charset() {
            Some(cs) if encoding_rs::Encoding::for_label(cs.trim().as_bytes()).is_none() => {
                Err(PartError {
                    kind: FailureKind::Permanent,
                    message: format!("unsupported charset {cs}"),
                })
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Subject {
    decoded: String,
    normalized: String,
    prefixed: bool,
}

pub struct ParsedMessage {
    tree: MimeTree,
    options: MessageOptions,
    parts: OnceLock<Vec<PartId>>,
    bodies: OnceLock<Vec<PartId>>,
    filter_bodies: OnceLock<Vec<PartId>>,
    body_text: OnceLock<String>,
    fragment: OnceLock<String>,
    subject: OnceLock<Subject>,
    attachment_types: OnceLock<BTreeSet<String>>,
    has_attachments: OnceLock<bool>,
    references: OnceLock<Vec<String>>,
    analysis: OnceLock<Vec<AnalysisFailure>>,
}

impl fmt::Debug for ParsedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParsedMessage")
            .field("size", &self.size())
            .field("parts", &self.tree.len())
            .finish_non_exhaustive()
    }
}

impl ParsedMessage {
    pub fn parse(raw: &[u8]) -> Self {
        Self::with_options(raw, MessageOptions::default())
    }

    pub fn with_options(raw: &[u8], options: MessageOptions) -> Self {
        Self {
            tree: mime::parse(raw),
            options,
            parts: OnceLock::new(),
            bodies: OnceLock::new(),
            filter_bodies: OnceLock::new(),
            body_text: OnceLock::new(),
            fragment: OnceLock::new(),
            subject: OnceLock::new(),
            attachment_types: OnceLock::new(),
            has_attachments: OnceLock::new(),
            references: OnceLock::new(),
            analysis: OnceLock::new(),
        }
    }

    pub fn tree(&self) -> &MimeTree {
        &self.tree
    }

    /// Raw message size in bytes.
    pub fn size(&self) -> usize {
        self.tree.message_size()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.tree.headers()
    }

    /// Every occurrence of a top-level header, encoded words decoded.
    pub fn header_values(&self, name: &str) -> Vec<String> {
        self.headers()
            .get_all(name)
            .map(decode_encoded_words)
            .collect()
    }

    /// Every part, root first.
    pub fn parts(&self) -> &[PartId] {
        self.parts
            .get_or_init(|| self.tree.iter().map(|(id, _)| id).collect())
    }

    /// Body parts chosen with the configured html preference.
    pub fn body_parts(&self) -> &[PartId] {
        self.bodies
            .get_or_init(|| body::get_body(&self.tree, self.options.prefer_html))
    }

    /// Attachment classification always works from the html-preferring body set.
    fn filter_bodies(&self) -> &[PartId] {
        self.filter_bodies
            .get_or_init(|| body::get_body(&self.tree, true))
    }

    /// Decoded text of the text body parts, joined with a space.
    pub fn body_text(&self) -> &str {
        self.body_text.get_or_init(|| {
            let mut text = String::new();
            for &id in self.body_parts() {
                if !self.tree.part(id).is_text() {
                    continue;
                }
                let piece = self
                    .tree
                    .text(id, self.options.default_charset.as_deref());
                if piece.is_empty() {
                    continue;
                }
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(&piece);
            }
            text
        })
    }

    /// The start of the body with whitespace compressed.
    pub fn fragment(&self) -> &str {
        self.fragment.get_or_init(|| {
            let compressed = compress_whitespace(self.body_text());
            let trimmed = compressed.trim();
            match trimmed.char_indices().nth(self.options.fragment_length) {
                Some((end, _)) => trimmed[..end].trim_end().to_string(),
                None => trimmed.to_string(),
            }
        })
    }

    fn subject_info(&self) -> &Subject {
        self.subject.get_or_init(|| {
            let decoded = self
                .headers()
                .get("subject")
                .map(decode_encoded_words)
                .unwrap_or_default();
            let (normalized, prefixed) = normalize_subject(&decoded);
            Subject {
                decoded,
                normalized,
                prefixed,
            }
        })
    }

    pub fn subject(&self) -> &str {
        &self.subject_info().decoded
    }

    /// The subject without reply/forward prefixes and with whitespace compressed.
    pub fn normalized_subject(&self) -> &str {
        &self.subject_info().normalized
    }

    /// Whether the subject carried a reply or forward prefix.
    pub fn is_reply(&self) -> bool {
        self.subject_info().prefixed
    }

    pub fn has_attachments(&self) -> bool {
        *self
            .has_attachments
            .get_or_init(|| body::has_attachment(&self.tree, self.filter_bodies()))
    }

    pub fn attachment_types(&self) -> &BTreeSet<String> {
        self.attachment_types
            .get_or_init(|| body::attachment_types(&self.tree, self.filter_bodies()))
    }

    pub fn message_id(&self) -> Option<&str> {
        self.headers().get("message-id")
    }

    /// Message ids from `References`, or from `In-Reply-To` when there are none.
    pub fn references(&self) -> &[String] {
        self.references.get_or_init(|| {
            let ids = self
                .headers()
                .get("references")
                .map(extract_message_ids)
                .unwrap_or_default();
            if !ids.is_empty() {
                return ids;
            }
            self.headers()
                .get("in-reply-to")
                .map(extract_message_ids)
                .unwrap_or_default()
        })
    }

    /// Runs `analyzer` over every leaf part, once. Later calls return the first result.
    pub fn analyze(&self, analyzer: &dyn PartAnalyzer) -> &[AnalysisFailure] {
        self.analysis.get_or_init(|| {
            let mut failures = Vec::new();
            for (id, part) in self.tree.iter() {
                if part.is_multipart() {
                    continue;
                }
                if let Err(e) = analyzer.analyze(part, &self.tree.decoded_body(id)) {
                    tracing::warn!(
                        part = %part.name,
                        content_type = %part.mime_type(),
                        "part analysis failed: {e}"
                    );
                    failures.push(AnalysisFailure {
                        part: part.name.clone(),
                        kind: e.kind,
                        message: e.message,
                        content_type: part.mime_type().to_string(),
                        filename: part.filename.clone(),
                        size: part.size,
                    });
                }
            }
            failures
        })
    }

    pub fn analysis_failures(&self) -> &[AnalysisFailure] {
        self.analysis.get().map(Vec::as_slice).unwrap_or_default()
    }

    pub fn has_temporary_analysis_failure(&self) -> bool {
        self.analysis_failures()
            .iter()
            .any(|f| f.kind == FailureKind::Temporary)
    }
}

/// Whether the message says it was generated automatically.
pub fn is_auto_submitted(headers: &HeaderMap) -> bool {
    headers.get_all("auto-submitted").any(|value| {
        let token = value.split(';').next().unwrap_or("").trim();
        !token.eq_ignore_ascii_case("no")
    })
}

fn extract_message_ids(value: &str) -> Vec<String> {
    let mut ids = Vec::new();
    let mut rest = value;
    while let Some(open) = rest.find('<') {
        let Some(close) = rest[open..].find('>') else {
            break;
        };
        let id = rest[open + 1..open + close].trim();
        if !id.is_empty() {
            ids.push(id.to_string());
        }
        rest = &rest[open + close + 1..];
    }
    ids
}

fn compress_whitespace(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last_space = false;
    for c in value.chars() {
        if c <= ' ' {
            if !last_space {
                out.push(' ');
            }
            last_space = true;
        } else {
            out.push(c);
            last_space = false;
        }
    }
    out
}

fn strip_control_characters(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .collect()
}

/// Whether `prefix` (without its colon) looks like `Re`, `Fwd`, `re(2)` or `fwd[5]`.
fn is_reply_prefix(prefix: &str) -> bool {
    let chars: Vec<char> = prefix.chars().collect();
    let mut paren: Option<usize> = None;
    for (i, &c) in chars.iter().enumerate() {
        let ok = if (c == '(' || c == '[') && i > 0 && paren.is_none() {
            paren = Some(i);
            true
        } else if let (')' | ']', Some(p)) = (c, paren) {
            i > p + 1 && i == chars.len() - 1
        } else if !c.is_alphabetic() {
            c.is_ascii_digit() && paren.is_some()
        } else {
            i < MAX_PREFIX_LENGTH && paren.is_none()
        };
        if !ok {
            return false;
        }
    }
    true
}

fn trim_prefixes(subject: &str) -> String {
    let mut subject = subject.to_string();
    loop {
        while let Some(stripped) = subject.strip_suffix(FWD_TRAILER) {
            subject = stripped.trim().to_string();
        }
        if subject.is_empty() {
            return subject;
        }
        let braced = subject.starts_with('[');
        let start = usize::from(braced);
        let colon = match subject.find(':') {
            Some(colon) if colon > start => colon,
            _ => return subject,
        };
        let prefix = &subject[start..=colon];
        let matched = CALENDAR_PREFIXES.contains(&prefix) || is_reply_prefix(&prefix[..prefix.len() - 1]);
        if !matched {
            return subject;
        }
        subject = if braced && subject.ends_with(']') {
            subject[colon + 1..subject.len() - 1].trim().to_string()
        } else {
            subject[colon + 1..].trim().to_string()
        };
    }
}

/// Returns the normalized subject and whether any prefix was removed.
pub fn normalize_subject(subject: &str) -> (String, bool) {
    let original = strip_control_characters(subject).trim().to_string();
    let mut normalized = trim_prefixes(&original);
    let mut prefixed = normalized != original;

    // mailing list tags: "[list] Re: foo"
    if normalized.starts_with('[') {
        if let Some(end) = normalized.find(']') {
            if normalized.len() > end + 1 {
                let inner = normalized[end + 1..].trim().to_string();
                let trimmed = trim_prefixes(&inner);
                prefixed |= trimmed != inner;
                normalized = format!("{} {}", &normalized[..=end], trimmed);
            }
        }
    }

    let mut normalized = compress_whitespace(&normalized);
    if let Some((end, _)) = normalized.char_indices().nth(MAX_SUBJECT_LENGTH) {
        normalized.truncate(end);
        normalized = normalized.trim().to_string();
    }
    (normalized, prefixed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIXED: &[u8] = b"From: Alice <alice@example.com>\r\n\
Subject: =?utf-8?q?Re=3A_caf=C3=A9?= (fwd)\r\n\
References: <a@x> <b@x>\r\n\
Content-Type: multipart/mixed; boundary=m\r\n\r\n\
--m\r\nContent-Type: text/plain; charset=iso-8859-1\r\n\r\nBonjour   caf\xe9\r\nligne deux\r\n\
--m\r\nContent-Type: image/gif; name=dot.gif\r\nContent-Disposition: inline\r\n\r\nGIF\r\n\
--m\r\nContent-Type: text/plain; charset=x-unknown\r\nContent-Disposition: attachment\r\n\r\n???\r\n\
--m--\r\n";

    #[test]
    fn test_derived_values() {
        let message = ParsedMessage::parse(MIXED);
        assert_eq!(message.subject(), "Re: café (fwd)");
        assert_eq!(message.normalized_subject(), "café");
        assert!(message.is_reply());
        assert_eq!(message.body_text(), "Bonjour   café\r\nligne deux");
        assert_eq!(message.fragment(), "Bonjour café ligne deux");
        assert_eq!(message.references(), ["a@x", "b@x"]);
        assert_eq!(message.parts().len(), 4);
        assert!(message.has_attachments());
        assert_eq!(
            message.attachment_types().iter().collect::<Vec<_>>(),
            vec!["image/gif", "text/plain"]
        );
    }

    #[test]
    fn test_fragment_is_truncated() {
        let mut raw = b"Subject: long\r\n\r\n".to_vec();
        raw.extend(std::iter::repeat(b'x').take(400));
        let options = MessageOptions {
            fragment_length: 10,
            ..MessageOptions::default()
        };
        let message = ParsedMessage::with_options(&raw, options);
        assert_eq!(message.fragment(), "xxxxxxxxxx");
    }

    #[test]
    fn test_analysis_failures() {
        let message = ParsedMessage::parse(MIXED);
        assert!(message.analysis_failures().is_empty());
        let failures = message.analyze(&TextAnalyzer);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].part, "3");
        assert_eq!(failures[0].kind, FailureKind::Permanent);
        assert!(!message.has_temporary_analysis_failure());

        struct Flaky;
        impl PartAnalyzer for Flaky {
            fn analyze(&self, _: &PartInfo, _: &[u8]) -> Result<(), PartError> {
                Err(PartError {
                    kind: FailureKind::Temporary,
                    message: "index unavailable".into(),
                })
            }
        }
        let message = ParsedMessage::parse(b"Subject: x\r\n\r\nbody");
        assert_eq!(message.analyze(&Flaky).len(), 1);
        assert!(message.has_temporary_analysis_failure());
        assert_eq!(message.analyze(&TextAnalyzer).len(), 1);
    }

    #[test]
    fn test_normalize_subject() {
        assert_eq!(normalize_subject("Re: Fwd: hello"), ("hello".into(), true));
        assert_eq!(normalize_subject("re(2): hello"), ("hello".into(), true));
        assert_eq!(normalize_subject("[Re: hello]"), ("hello".into(), true));
        assert_eq!(
            normalize_subject("[list] Re:  hello   there"),
            ("[list] hello there".into(), true)
        );
        assert_eq!(
            normalize_subject("Meeting: tomorrow"),
            ("Meeting: tomorrow".into(), false)
        );
        assert_eq!(normalize_subject("Accepted: lunch"), ("lunch".into(), true));
        assert_eq!(normalize_subject(""), (String::new(), false));
    }

    #[test]
    fn test_auto_submitted() {
        let mut headers = HeaderMap::default();
        assert!(!is_auto_submitted(&headers));
        headers.push("Auto-Submitted", "No");
        assert!(!is_auto_submitted(&headers));
        headers.push("Auto-Submitted", "auto-replied; owner=x");
        assert!(is_auto_submitted(&headers));
    }
}
