use std::borrow::Cow;
use std::fmt;
use std::ops::Range;

use crate::mime::encoding::{decode_text, TransferEncoding};
use crate::mime::header::{ContentType, Disposition, HeaderMap};

/// Index of a part inside its `MimeTree`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartId(pub(crate) usize);

/// Where a part's raw body lives: a byte range of one of the tree's buffers.
///
/// Buffer 0 is the original message. Synthetic envelopes and decoded nested
/// messages get buffers of their own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyRef {
    pub(crate) buffer: usize,
    pub(crate) range: Range<usize>,
}

#[derive(Debug, Clone)]
pub struct PartInfo {
    pub content_type: ContentType,
    pub disposition: Disposition,
    pub filename: Option<String>,
    pub content_id: Option<String>,
    /// Raw body bytes, before transfer decoding
    pub size: usize,
    pub name: String,
    pub part_num: usize,
    pub headers: HeaderMap,
    pub encoding: TransferEncoding,
    pub parent: Option<PartId>,
    pub children: Vec<PartId>,
    pub(crate) body: BodyRef,
}

impl PartInfo {
    pub fn mime_type(&self) -> &str {
        &self.content_type.mime_type
    }

    pub fn is_multipart(&self) -> bool {
        self.content_type.primary_type() == "multipart"
    }

    pub fn is_text(&self) -> bool {
        self.content_type.primary_type() == "text"
    }

    pub fn is_message(&self) -> bool {
        self.mime_type() == "message/rfc822"
    }

    pub fn is_attachment(&self) -> bool {
        self.disposition.kind == "attachment"
    }

    pub fn charset(&self) -> Option<&str> {
        self.content_type.params.get("charset")
    }
}

/// Arena of parts. Parents are indices, so the tree owns everything one way.
#[derive(Debug, Clone, Default)]
pub struct MimeTree {
    pub(crate) parts: Vec<PartInfo>,
    pub(crate) buffers: Vec<Vec<u8>>,
}

impl MimeTree {
    pub fn root(&self) -> PartId {
        PartId(0)
    }

    pub fn part(&self, id: PartId) -> &PartInfo {
        &self.parts[id.0]
    }

    pub fn get(&self, id: PartId) -> Option<&PartInfo> {
        self.parts.get(id.0)
    }

    pub fn parent(&self, id: PartId) -> Option<&PartInfo> {
        self.part(id).parent.map(|p| self.part(p))
    }

    /// Every part in tree order, root first.
    pub fn iter(&self) -> impl Iterator<Item = (PartId, &PartInfo)> {
        self.parts.iter().enumerate().map(|(i, p)| (PartId(i), p))
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Size of the message as received.
    pub fn message_size(&self) -> usize {
        self.buffers.first().map_or(0, Vec::len)
    }

    /// The root part's headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.part(self.root()).headers
    }

    pub fn find(&self, name: &str) -> Option<PartId> {
        self.iter().find(|(_, p)| p.name == name).map(|(id, _)| id)
    }

    pub fn raw_body(&self, id: PartId) -> &[u8] {
        let body = &self.part(id).body;
        &self.buffers[body.buffer][body.range.clone()]
    }

    pub fn decoded_body(&self, id: PartId) -> Cow<'_, [u8]> {
        self.part(id).encoding.decode(self.raw_body(id))
    }

    pub fn text(&self, id: PartId, default_charset: Option<&str>) -> String {
        decode_text(
            &self.decoded_body(id),
            self.part(id).charset(),
            default_charset,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Worth retrying later
    Temporary,
    Permanent,
}

/// A part that could not be analyzed. It is still indexed with what is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisFailure {
    pub part: String,
    pub kind: FailureKind,
    pub message: String,
    pub content_type: String,
    pub filename: Option<String>,
    pub size: usize,
}

impl fmt::Display for AnalysisFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            FailureKind::Temporary => "temporary",
            FailureKind::Permanent => "permanent",
        };
        write!(
            f,
            "part {} ({}, {} bytes): {kind} failure: {}",
            self.part, self.content_type, self.size, self.message
        )
    }
}
