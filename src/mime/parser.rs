//! Recovery parser: turns any byte string into a `MimeTree`.
//!
//! Parsing never fails. Broken multipart structure is repaired by wrapping the
//! raw body in a synthetic single-part envelope, so every byte of the input stays
//! reachable from some leaf.

use std::ops::Range;

use memchr::memmem;

use crate::mime::encoding::{decode_base64, TransferEncoding};
use crate::mime::header::{
    decode_encoded_words, expand_char_refs, parse_header_block, ContentType, Disposition,
    DEFAULT_CONTENT_TYPE,
};
use crate::mime::part::{BodyRef, MimeTree, PartId, PartInfo};

pub const MAX_PREAMBLE_LENGTH: usize = 1024;
pub const MAX_RECURSION: usize = 20;
pub const MAX_PARTS: usize = 1000;

const DIGEST_CONTENT_TYPE: &str = "message/rfc822";

/// Scans the start of a multipart body for its opening delimiter line.
///
/// With a boundary, the line must be exactly `--boundary`. Without one, any
/// `--token` line counts and the token is returned. Only the first
/// `MAX_PREAMBLE_LENGTH` bytes are looked at, and the line must be terminated.
pub fn find_start_boundary(body: &[u8], boundary: Option<&str>) -> Option<String> {
    let expected = boundary.map(str::as_bytes);
    let mut dashes = 0;
    let mut token = Vec::new();
    let mut failed = false;

    for &c in body.iter().take(MAX_PREAMBLE_LENGTH) {
        if c == b'\r' || c == b'\n' {
            let matched = match expected {
                Some(expected) => token.len() == expected.len(),
                None => !token.is_empty(),
            };
            if !failed && matched {
                return Some(String::from_utf8_lossy(&token).into_owned());
            }
            dashes = 0;
            token.clear();
            failed = false;
        } else if failed {
            continue;
        } else if dashes != 2 {
            if c == b'-' {
                dashes += 1;
            } else {
                failed = true;
            }
        } else {
            match expected {
                None if c.is_ascii_whitespace() => failed = true,
                Some(expected) if expected.get(token.len()) != Some(&c) => failed = true,
                _ => token.push(c),
            }
        }
    }
    None
}

fn random_boundary() -> String {
    format!("_-_{:032x}", rand::random::<u128>())
}

/// Splits a multipart body on `--boundary` lines.
///
/// Returns the body ranges of the parts, or `None` when no delimiter line exists.
/// The line break before a delimiter belongs to the delimiter. Preamble and
/// epilogue are dropped; without a close delimiter the last part runs to EOF.
fn split_parts(body: &[u8], boundary: &str) -> Option<Vec<Range<usize>>> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();
    let mut parts = Vec::new();
    let mut open: Option<usize> = None;
    let mut seen = false;
    let mut line_start = 0;

    while line_start < body.len() {
        let line_end = memchr::memchr(b'\n', &body[line_start..])
            .map(|p| line_start + p + 1)
            .unwrap_or(body.len());
        let line = &body[line_start..line_end];

        if let Some(rest) = line.strip_prefix(delimiter) {
            let (close, rest) = match rest.strip_prefix(b"--") {
                Some(rest) => (true, rest),
                None => (false, rest),
            };
            if rest.iter().all(u8::is_ascii_whitespace) {
                seen = true;
                let delimiter_start = if body[..line_start].ends_with(b"\r\n") {
                    line_start - 2
                } else if body[..line_start].ends_with(b"\n") {
                    line_start - 1
                } else {
                    line_start
                };
                if let Some(start) = open.take() {
                    parts.push(start..delimiter_start.max(start));
                }
                if close {
                    return Some(parts);
                }
                open = Some(line_end);
            }
        }
        line_start = line_end;
    }

    if !seen {
        return None;
    }
    if let Some(start) = open {
        parts.push(start..body.len());
    }
    Some(parts)
}

/// How a part gets its name once its content type is known.
enum Slot {
    /// The root of a message. `prefix` is the enclosing message/rfc822 part's name.
    Root { prefix: Option<String>, part_num: usize },
    Child { name: String, part_num: usize },
}

struct Parser {
    tree: MimeTree,
}

pub fn parse(data: &[u8]) -> MimeTree {
    let mut parser = Parser {
        tree: MimeTree {
            parts: Vec::new(),
            buffers: vec![data.to_vec()],
        },
    };
    let slot = Slot::Root {
        prefix: None,
        part_num: 0,
    };
    parser.parse_entity(0, 0..data.len(), None, slot, DEFAULT_CONTENT_TYPE, 0);
    parser.tree
}

/// Prefix for the children of a part: `TEXT` contributes nothing, `2.TEXT` gives `2`.
fn child_prefix(name: &str) -> &str {
    if name == "TEXT" {
        ""
    } else {
        name.strip_suffix(".TEXT").unwrap_or(name)
    }
}

fn child_name(prefix: &str, ordinal: usize) -> String {
    if prefix.is_empty() {
        ordinal.to_string()
    } else {
        format!("{prefix}.{ordinal}")
    }
}

impl Parser {
    fn parse_entity(
        &mut self,
        buffer: usize,
        range: Range<usize>,
        parent: Option<PartId>,
        slot: Slot,
        default_type: &str,
        depth: usize,
    ) -> PartId {
        let data = &self.tree.buffers[buffer][range.clone()];
        let (headers, body_offset) = parse_header_block(data);
        let body = (range.start + body_offset).min(range.end)..range.end;

        let content_type = ContentType::parse(headers.get("content-type"), default_type);
        let mut disposition = Disposition::parse(headers.get("content-disposition"));
        let in_digest = parent.is_some_and(|p| self.tree.part(p).mime_type() == "multipart/digest");
        if in_digest && content_type.mime_type == DIGEST_CONTENT_TYPE && disposition.kind.is_empty()
        {
            disposition.kind = "attachment".to_string();
        }
        let filename = disposition
            .params
            .get("filename")
            .or_else(|| content_type.params.get("name"))
            .map(|f| expand_char_refs(&decode_encoded_words(f)));
        let content_id = headers.get("content-id").map(|cid| {
            cid.trim()
                .trim_start_matches('<')
                .trim_end_matches('>')
                .to_string()
        });
        let encoding = TransferEncoding::repair(
            headers.get("content-transfer-encoding"),
            content_type.primary_type() == "multipart"
                || content_type.mime_type == "message/rfc822",
        );

        let (name, part_num) = match slot {
            Slot::Root { prefix, part_num } => {
                let leaf = if content_type.primary_type() == "multipart" {
                    "TEXT"
                } else {
                    "1"
                };
                let name = match prefix {
                    Some(prefix) => format!("{prefix}.{leaf}"),
                    None => leaf.to_string(),
                };
                (name, part_num)
            }
            Slot::Child { name, part_num } => (name, part_num),
        };

        let id = PartId(self.tree.parts.len());
        self.tree.parts.push(PartInfo {
            content_type,
            disposition,
            filename,
            content_id,
            size: body.len(),
            name,
            part_num,
            headers,
            encoding,
            parent,
            children: Vec::new(),
            body: BodyRef {
                buffer,
                range: body,
            },
        });
        if let Some(parent) = parent {
            self.tree.parts[parent.0].children.push(id);
        }

        let part = self.tree.part(id);
        let nested = part.is_multipart() || part.is_message();
        if nested && depth >= MAX_RECURSION {
            tracing::debug!(part = %part.name, "nesting limit reached, treating part as a leaf");
        } else if part.is_multipart() {
            self.parse_multipart(id, depth);
        } else if part.is_message() {
            self.parse_message(id, depth);
        }
        id
    }

    fn parse_multipart(&mut self, id: PartId, depth: usize) {
        let part = self.tree.part(id);
        let body_ref = part.body.clone();
        let params = &part.content_type.params;
        let declared = params.get("boundary").map(str::to_string);
        let default_type = if part.mime_type() == "multipart/digest" {
            DIGEST_CONTENT_TYPE
        } else {
            DEFAULT_CONTENT_TYPE
        };
        let body = self.tree.raw_body(id);

        let boundary = if params.contains("generated") {
            declared.clone()
        } else {
            match find_start_boundary(body, declared.as_deref()) {
                Some(boundary) => Some(boundary),
                None => {
                    tracing::debug!(
                        part = %part.name,
                        boundary = declared.as_deref().unwrap_or(""),
                        "no start boundary in preamble, wrapping body"
                    );
                    self.wrap_body(id, declared, depth);
                    return;
                }
            }
        };

        let ranges = boundary.as_deref().and_then(|b| split_parts(body, b));
        match ranges {
            Some(ranges) => {
                let ranges = ranges
                    .into_iter()
                    .map(|r| body_ref.range.start + r.start..body_ref.range.start + r.end)
                    .collect();
                self.parse_children(id, body_ref.buffer, ranges, default_type, depth);
            }
            None => {
                tracing::debug!(part = %self.tree.part(id).name, "multipart body did not split, wrapping body");
                self.wrap_body(id, None, depth);
            }
        }
    }

    /// Gives a multipart exactly one text/plain child whose content is the raw body.
    fn wrap_body(&mut self, id: PartId, boundary: Option<String>, depth: usize) {
        let raw = self.tree.raw_body(id);
        let boundary = boundary
            .filter(|b| memmem::find(raw, format!("--{b}").as_bytes()).is_none())
            .unwrap_or_else(random_boundary);

        let mut envelope = Vec::with_capacity(raw.len() + 2 * boundary.len() + 12);
        envelope.extend_from_slice(b"--");
        envelope.extend_from_slice(boundary.as_bytes());
        envelope.extend_from_slice(b"\r\n\r\n");
        envelope.extend_from_slice(raw);
        envelope.extend_from_slice(b"\r\n--");
        envelope.extend_from_slice(boundary.as_bytes());
        envelope.extend_from_slice(b"--");

        let ranges = split_parts(&envelope, &boundary).unwrap_or_default();
        self.tree.buffers.push(envelope);
        let buffer = self.tree.buffers.len() - 1;
        self.parse_children(id, buffer, ranges, DEFAULT_CONTENT_TYPE, depth);
    }

    fn parse_children(
        &mut self,
        id: PartId,
        buffer: usize,
        ranges: Vec<Range<usize>>,
        default_type: &str,
        depth: usize,
    ) {
        let prefix = child_prefix(&self.tree.part(id).name).to_string();
        for (i, range) in ranges.into_iter().enumerate() {
            if self.tree.parts.len() >= MAX_PARTS {
                tracing::debug!(limit = MAX_PARTS, "part limit reached, remaining parts dropped");
                break;
            }
            let slot = Slot::Child {
                name: child_name(&prefix, i + 1),
                part_num: i + 1,
            };
            self.parse_entity(buffer, range, Some(id), slot, default_type, depth + 1);
        }
    }

    /// Parses a message/rfc822 body as a nested message under the part's name.
    fn parse_message(&mut self, id: PartId, depth: usize) {
        if self.tree.parts.len() >= MAX_PARTS {
            return;
        }
        let part = self.tree.part(id);
        let prefix = part.name.clone();
        let body_ref = part.body.clone();
        let raw = self.tree.raw_body(id);
        // Container encodings are stripped. A base64 body is only decoded when the raw bytes
        // carry no headers and the decoded bytes do.
        let declared_base64 = part
            .headers
            .get("content-transfer-encoding")
            .is_some_and(|cte| cte.trim().eq_ignore_ascii_case("base64"));
        let decoded = if declared_base64 && parse_header_block(raw).0.is_empty() {
            let decoded = decode_base64(raw);
            if parse_header_block(&decoded).0.is_empty() {
                tracing::debug!(part = %prefix, "nested message did not decode, parsing raw bytes");
                None
            } else {
                Some(decoded)
            }
        } else {
            None
        };
        let (buffer, range) = match decoded {
            Some(decoded) => {
                let len = decoded.len();
                self.tree.buffers.push(decoded);
                (self.tree.buffers.len() - 1, 0..len)
            }
            None => (body_ref.buffer, body_ref.range),
        };
        let slot = Slot::Root {
            prefix: Some(prefix),
            part_num: 1,
        };
        self.parse_entity(buffer, range, Some(id), slot, DEFAULT_CONTENT_TYPE, depth + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(tree: &MimeTree) -> Vec<String> {
        tree.iter().map(|(_, p)| p.name.clone()).collect()
    }

    #[test]
    fn test_find_start_boundary() {
        assert_eq!(
            find_start_boundary(b"preamble\r\n--abc\r\n", Some("abc")),
            Some("abc".to_string())
        );
        assert_eq!(find_start_boundary(b"--abcd\r\n", Some("abc")), None);
        assert_eq!(find_start_boundary(b" --abc\n", Some("abc")), None);
        assert_eq!(find_start_boundary(b"--abc", Some("abc")), None);
        assert_eq!(
            find_start_boundary(b"junk\n--xyz\n", None),
            Some("xyz".to_string())
        );
        assert_eq!(find_start_boundary(b"--x yz\n--\n", None), None);

        let mut far = vec![b'a'; MAX_PREAMBLE_LENGTH];
        far.extend_from_slice(b"\n--abc\n");
        assert_eq!(find_start_boundary(&far, Some("abc")), None);
    }

    #[test]
    fn test_split_parts() {
        let body = b"pre\r\n--b\r\nA\r\n--b  \r\nB\r\n--b--\r\nepilogue";
        let parts = split_parts(body, "b").unwrap();
        let parts: Vec<&[u8]> = parts.into_iter().map(|r| &body[r]).collect();
        assert_eq!(parts, vec![&b"A"[..], &b"B"[..]]);

        let body = b"--b\nA\n--bx\nstill A";
        let parts = split_parts(body, "b").unwrap();
        assert_eq!(&body[parts[0].clone()], b"A\n--bx\nstill A");
        assert!(split_parts(b"no delimiters", "b").is_none());
    }

    #[test]
    fn test_simple_message_is_one_part() {
        let tree = parse(b"Subject: hi\r\n\r\nhello");
        assert_eq!(names(&tree), vec!["1"]);
        let root = tree.part(tree.root());
        assert_eq!(root.mime_type(), "text/plain");
        assert_eq!(root.part_num, 0);
        assert_eq!(tree.raw_body(tree.root()), b"hello");
    }

    #[test]
    fn test_multipart_naming() {
        let raw = b"Content-Type: multipart/mixed; boundary=outer\r\n\r\n\
--outer\r\nContent-Type: text/plain\r\n\r\nbody\r\n\
--outer\r\nContent-Type: multipart/alternative; boundary=inner\r\n\r\n\
--inner\r\n\r\nplain\r\n--inner\r\nContent-Type: text/html\r\n\r\n<b>html</b>\r\n--inner--\r\n\
--outer\r\nContent-Type: message/rfc822\r\n\r\n\
Subject: fwd\r\nContent-Type: multipart/mixed; boundary=n\r\n\r\n\
--n\r\n\r\nnested one\r\n--n\r\nContent-Type: image/png\r\n\r\nPNG\r\n--n--\r\n\
--outer--\r\n";
        let tree = parse(raw);
        assert_eq!(
            names(&tree),
            vec!["TEXT", "1", "2", "2.1", "2.2", "3", "3.TEXT", "3.1", "3.2"]
        );
        let html = tree.find("2.2").unwrap();
        assert_eq!(tree.raw_body(html), b"<b>html</b>");
        let nested_root = tree.find("3.TEXT").unwrap();
        assert_eq!(tree.part(nested_root).part_num, 1);
        assert_eq!(tree.part(nested_root).headers.get("subject"), Some("fwd"));
        assert_eq!(tree.raw_body(tree.find("3.2").unwrap()), b"PNG");
    }

    #[test]
    fn test_nested_single_part_message() {
        let raw = b"Content-Type: message/rfc822\r\n\r\nSubject: inner\r\n\r\ntext";
        let tree = parse(raw);
        assert_eq!(names(&tree), vec!["1", "1.1"]);
    }

    #[test]
    fn test_missing_boundary_keeps_payload() {
        let payload = b"this is not\r\nmultipart at all\r\n--\r\n";
        let mut raw = b"Content-Type: multipart/mixed\r\n\r\n".to_vec();
        raw.extend_from_slice(payload);
        let tree = parse(&raw);
        assert_eq!(tree.len(), 2);
        let leaf = tree.find("1").unwrap();
        assert_eq!(tree.part(leaf).mime_type(), "text/plain");
        assert_eq!(tree.raw_body(leaf), payload);
    }

    #[test]
    fn test_wrong_boundary_keeps_payload() {
        let payload = b"--other\r\nContent-Type: text/html\r\n\r\nhi\r\n--other--\r\n";
        let mut raw = b"Content-Type: multipart/mixed; boundary=\"b\"\r\n\r\n".to_vec();
        raw.extend_from_slice(payload);
        let tree = parse(&raw);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.raw_body(tree.find("1").unwrap()), payload);
    }

    #[test]
    fn test_inferred_boundary() {
        let raw = b"Content-Type: multipart/mixed\r\n\r\n--guess\r\n\r\none\r\n--guess\r\n\r\ntwo\r\n--guess--";
        let tree = parse(raw);
        assert_eq!(names(&tree), vec!["TEXT", "1", "2"]);
        assert_eq!(tree.raw_body(tree.find("2").unwrap()), b"two");
    }

    #[test]
    fn test_digest_defaults() {
        let raw = b"Content-Type: multipart/digest; boundary=d\r\n\r\n\
--d\r\n\r\nSubject: one\r\n\r\nfirst\r\n--d--";
        let tree = parse(raw);
        let child = tree.part(tree.find("1").unwrap());
        assert_eq!(child.mime_type(), "message/rfc822");
        assert!(child.is_attachment());
        assert_eq!(names(&tree), vec!["TEXT", "1", "1.1"]);
    }

    #[test]
    fn test_container_encoding_stripped_and_filename() {
        let raw = b"Content-Type: multipart/mixed; boundary=b\r\nContent-Transfer-Encoding: base64\r\n\r\n\
--b\r\nContent-Type: application/pdf; name=\"=?utf-8?q?r=C3=A9sum=C3=A9.pdf?=\"\r\n\
Content-Transfer-Encoding: BASE64\r\nContent-ID: <cid@x>\r\n\r\nSGVsbG8=\r\n--b--";
        let tree = parse(raw);
        assert_eq!(
            tree.part(tree.root()).encoding,
            TransferEncoding::SevenBit
        );
        let pdf = tree.find("1").unwrap();
        let part = tree.part(pdf);
        assert_eq!(part.filename.as_deref(), Some("résumé.pdf"));
        assert_eq!(part.content_id.as_deref(), Some("cid@x"));
        assert_eq!(&*tree.decoded_body(pdf), b"Hello");
    }

    #[test]
    fn test_base64_nested_message() {
        // "Subject: x\r\n\r\nhi"
        let raw = b"Content-Type: message/rfc822\r\nContent-Transfer-Encoding: base64\r\n\r\nU3ViamVjdDogeA0KDQpoaQ==";
        let tree = parse(raw);
        let inner = tree.find("1.1").unwrap();
        assert_eq!(tree.part(inner).headers.get("subject"), Some("x"));
        assert_eq!(tree.raw_body(inner), b"hi");
    }

    #[test]
    fn test_nested_message_encoding_not_applied() {
        let raw = b"Content-Type: message/rfc822\r\nContent-Transfer-Encoding: quoted-printable\r\n\r\n\
Subject: eq\r\n\r\na=3Db";
        let tree = parse(raw);
        assert_ne!(
            tree.part(tree.root()).encoding,
            TransferEncoding::QuotedPrintable
        );
        let inner = tree.find("1.1").unwrap();
        assert_eq!(tree.part(inner).headers.get("subject"), Some("eq"));
        assert_eq!(tree.raw_body(inner), b"a=3Db");
    }

    #[test]
    fn test_headerless_child_keeps_body() {
        let raw = b"Content-Type: multipart/mixed; boundary=b\r\n\r\n\
--b\r\nHello there, this is the body\r\nsecond line\r\n--b--";
        let tree = parse(raw);
        assert_eq!(names(&tree), vec!["TEXT", "1"]);
        let leaf = tree.find("1").unwrap();
        assert!(tree.part(leaf).headers.is_empty());
        assert_eq!(tree.part(leaf).mime_type(), "text/plain");
        assert_eq!(
            tree.raw_body(leaf),
            b"Hello there, this is the body\r\nsecond line"
        );
    }

    #[test]
    fn test_recursion_limit() {
        let mut raw = Vec::new();
        for _ in 0..(MAX_RECURSION + 5) {
            raw.extend_from_slice(b"Content-Type: message/rfc822\r\n\r\n");
        }
        raw.extend_from_slice(b"Subject: deep\r\n\r\nbottom");
        let tree = parse(&raw);
        assert_eq!(tree.len(), MAX_RECURSION + 1);
    }
}
