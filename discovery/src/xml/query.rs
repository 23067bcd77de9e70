//! Restricted path queries over an [`XmlDocument`](super::XmlDocument).
//!
//! A path is a `/`-delimited chain of tag names matched by exact equality,
//! one level at a time, depth-first in document order. A single leading `/`
//! is ignored. There are no wildcards, attribute selectors, predicates or
//! descendant (`//`) steps; a segment containing any of those is just a tag
//! name that will not match.

use super::node::XmlNode;

/// Return every node reached by following `path` down from `node`.
///
/// An empty path (or a lone leading slash) yields `node` itself. A segment
/// with no matching children ends that branch without error.
pub fn query<'a>(node: XmlNode<'a>, path: &str) -> Vec<XmlNode<'a>> {
    let mut segments: Vec<&str> = path.split('/').collect();
    if segments.len() > 1 && segments[0].is_empty() {
        segments.remove(0);
    }
    if segments.len() == 1 && segments[0].is_empty() {
        segments.clear();
    }

    let mut matches = Vec::new();
    collect(node, &segments, &mut matches);
    matches
}

fn collect<'a>(node: XmlNode<'a>, segments: &[&str], matches: &mut Vec<XmlNode<'a>>) {
    match segments.split_first() {
        None => matches.push(node),
        Some((head, rest)) => {
            for child in node.children().filter(|child| child.name() == *head) {
                collect(child, rest, matches);
            }
        }
    }
}
