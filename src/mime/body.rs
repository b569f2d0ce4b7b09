//! Which parts make up the readable body, and which count as attachments.

use std::collections::BTreeSet;

use crate::mime::part::{MimeTree, PartId, PartInfo};

const TEXT_PLAIN: &str = "text/plain";
const TEXT_HTML: &str = "text/html";
const TEXT_ENRICHED: &str = "text/enriched";
const RFC822_HEADERS: &str = "text/rfc822-headers";

const ZIMBRA_SHARE: &str = "xml/x-zimbra-share";
const ZIMBRA_DL_SUBSCRIPTION: &str = "xml/x-zimbra-dl-subscription";
const NOT_ATTACHMENTS: [&str; 4] = [
    ZIMBRA_SHARE,
    ZIMBRA_DL_SUBSCRIPTION,
    "message/disposition-notification",
    "message/delivery-status",
];

/// Multipart subtypes whose body is only their first child.
const FIRST_CHILD_ONLY: [&str; 4] = [
    "multipart/digest",
    "multipart/signed",
    "multipart/encrypted",
    "multipart/parallel",
];

fn wanted_type(prefer_html: bool) -> &'static str {
    if prefer_html {
        TEXT_HTML
    } else {
        TEXT_PLAIN
    }
}

/// Types to settle for when the wanted one is missing.
fn alternate_types(prefer_html: bool) -> [&'static str; 2] {
    if prefer_html {
        [TEXT_ENRICHED, TEXT_PLAIN]
    } else {
        [TEXT_ENRICHED, TEXT_HTML]
    }
}

/// The parts making up the message body, in tree order.
pub fn get_body(tree: &MimeTree, prefer_html: bool) -> Vec<PartId> {
    if tree.is_empty() {
        return Vec::new();
    }
    let root = tree.root();
    let top = tree.part(root);
    if !top.is_multipart() {
        return if top.is_attachment() {
            Vec::new()
        } else {
            vec![root]
        };
    }
    body_subparts(tree, root, prefer_html).unwrap_or_default()
}

/// A leaf that can be shown as body text.
fn is_body_leaf(part: &PartInfo) -> bool {
    !part.is_attachment() && !part.is_message() && (part.content_id.is_none() || part.is_text())
}

fn body_subparts(tree: &MimeTree, id: PartId, prefer_html: bool) -> Option<Vec<PartId>> {
    let part = tree.part(id);
    if part.children.is_empty() || part.is_message() {
        return None;
    }
    let children = match part.mime_type() {
        "multipart/alternative" => return alternative_body(tree, &part.children, prefer_html),
        "multipart/related" => return related_body(tree, part, prefer_html),
        "multipart/report" => return report_body(tree, &part.children, prefer_html),
        t if FIRST_CHILD_ONLY.contains(&t) => &part.children[..1],
        _ => &part.children[..],
    };

    let mut bodies: Option<Vec<PartId>> = None;
    for &child in children {
        let found = if tree.part(child).is_multipart() {
            body_subparts(tree, child, prefer_html)
        } else if is_body_leaf(tree.part(child)) {
            Some(vec![child])
        } else {
            None
        };
        if let Some(found) = found {
            bodies.get_or_insert_with(Vec::new).extend(found);
        }
    }
    bodies
}

fn alternative_body(tree: &MimeTree, children: &[PartId], prefer_html: bool) -> Option<Vec<PartId>> {
    let want = wanted_type(prefer_html);
    let alternates = alternate_types(prefer_html);
    let mut alternative = None;
    for &child in children {
        let part = tree.part(child);
        let mime_type = part.mime_type();
        if !part.is_attachment() && mime_type == want {
            return Some(vec![child]);
        } else if !part.is_attachment() && alternates.contains(&mime_type) {
            alternative = Some(child);
        } else if part.is_multipart() {
            if let Some(found) = body_subparts(tree, child, prefer_html) {
                return Some(found);
            }
        }
    }
    alternative.map(|a| vec![a])
}

fn related_body(tree: &MimeTree, part: &PartInfo, prefer_html: bool) -> Option<Vec<PartId>> {
    let children = &part.children;
    if let Some(start) = part.content_type.params.get("start") {
        let start = start.trim().trim_start_matches('<').trim_end_matches('>');
        let root = children
            .iter()
            .find(|&&c| tree.part(c).content_id.as_deref() == Some(start));
        if let Some(&root) = root {
            return if tree.part(root).is_multipart() {
                body_subparts(tree, root, prefer_html)
            } else {
                Some(vec![root])
            };
        }
    }
    if let Some(&text) = children
        .iter()
        .find(|&&c| tree.part(c).is_text() && !tree.part(c).is_attachment())
    {
        return Some(vec![text]);
    }
    if let Some(&multipart) = children.iter().find(|&&c| tree.part(c).is_multipart()) {
        return body_subparts(tree, multipart, prefer_html);
    }
    children.first().map(|&c| vec![c])
}

fn report_body(tree: &MimeTree, children: &[PartId], prefer_html: bool) -> Option<Vec<PartId>> {
    let pick = |types: &[&str]| -> Vec<PartId> {
        children
            .iter()
            .copied()
            .filter(|&c| {
                let part = tree.part(c);
                !part.is_attachment() && types.contains(&part.mime_type())
            })
            .collect()
    };
    let mut bodies = pick(&[wanted_type(prefer_html), RFC822_HEADERS]);
    if !bodies.iter().any(|&c| tree.part(c).mime_type() != RFC822_HEADERS) {
        let [a, b] = alternate_types(prefer_html);
        bodies = pick(&[a, b, RFC822_HEADERS]);
    }
    (!bodies.is_empty()).then_some(bodies)
}

/// Whether a part should be treated as an attachment for filtering purposes.
///
/// `bodies` is the body set as returned by `get_body(tree, true)`.
pub fn is_filterable_attachment(tree: &MimeTree, id: PartId, bodies: &[PartId]) -> bool {
    let part = tree.part(id);
    if part.is_multipart() || NOT_ATTACHMENTS.contains(&part.mime_type()) {
        return false;
    }
    if !part.is_text() {
        return true;
    }

    let Some(parent) = tree.parent(id) else {
        return false;
    };
    if part.part_num == 1 && parent.is_message() {
        return false;
    }
    if bodies.contains(&id) && !part.is_attachment() {
        return false;
    }
    if parent.mime_type() == "multipart/alternative" {
        return false;
    }
    if part.part_num == 1 && parent.is_multipart() {
        let grandparent = parent.parent.map(|p| tree.part(p));
        if grandparent.map_or(true, PartInfo::is_message) {
            return false;
        }
    }
    true
}

/// Content types of every filterable attachment.
pub fn attachment_types(tree: &MimeTree, bodies: &[PartId]) -> BTreeSet<String> {
    tree.iter()
        .filter(|&(id, _)| is_filterable_attachment(tree, id, bodies))
        .map(|(_, p)| p.mime_type().to_string())
        .collect()
}

pub fn has_attachment(tree: &MimeTree, bodies: &[PartId]) -> bool {
    tree.iter().any(|(id, p)| {
        is_filterable_attachment(tree, id, bodies) && !p.mime_type().eq_ignore_ascii_case(ZIMBRA_SHARE)
    })
}
