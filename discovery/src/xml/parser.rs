use std::collections::BTreeMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::error::XmlParseResult;
use super::node::{NodeId, XmlDocument};

/// Parse XML text into an [`XmlDocument`].
///
/// The reader is driven event by event. Each start tag opens a child of the
/// currently open element and becomes the new current element; text is
/// attached to the current element; an end tag moves back to the parent only
/// when its name matches the current element. Mismatched or stray end tags
/// are skipped, so loosely formed device descriptions still produce a tree.
///
/// Element names have any namespace prefix stripped (everything up to and
/// including the first `:`).
pub fn parse(xml: &str) -> XmlParseResult<XmlDocument> {
    let mut reader = Reader::from_str(xml);
    let config = reader.config_mut();
    config.trim_text(true);
    config.check_end_names = false;
    config.allow_unmatched_ends = true;

    let mut document = XmlDocument::new();
    let mut current = document.root_id();

    loop {
        let event = reader.read_event().map_err(|e| {
            log::debug!(
                "XML decode failed at byte {}: {}",
                reader.buffer_position(),
                e
            );
            e
        })?;

        match event {
            Event::Start(e) => {
                current = open_element(&mut document, current, &e)?;
            }
            Event::Empty(e) => {
                open_element(&mut document, current, &e)?;
            }
            Event::End(e) => {
                let raw = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if current != document.root_id() && document.name_of(current) == local_name(&raw) {
                    if let Some(parent) = document.parent_of(current) {
                        current = parent;
                    }
                }
            }
            Event::Text(e) => {
                let text = match e.unescape() {
                    Ok(text) => text.into_owned(),
                    Err(_) => String::from_utf8_lossy(&e).into_owned(),
                };
                document.append_text(current, &text);
            }
            Event::CData(e) => {
                document.append_text(current, &String::from_utf8_lossy(&e));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(document)
}

fn open_element(
    document: &mut XmlDocument,
    parent: NodeId,
    element: &BytesStart<'_>,
) -> XmlParseResult<NodeId> {
    let raw = String::from_utf8_lossy(element.name().as_ref()).into_owned();

    let mut attributes = BTreeMap::new();
    for attr in element.attributes().with_checks(false) {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = match attr.unescape_value() {
            Ok(value) => value.into_owned(),
            Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
        };
        attributes.insert(key, value);
    }

    Ok(document.append_child(parent, local_name(&raw).to_string(), attributes))
}

/// Strip everything up to and including the first colon
pub(crate) fn local_name(name: &str) -> &str {
    match name.split_once(':') {
        Some((_, local)) => local,
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_builds_tree_in_document_order() {
        let doc = parse("<root><a>1</a><b x=\"y\"/><c><d>2</d></c></root>").unwrap();

        let root = doc.query("/root")[0];
        let names: Vec<_> = root.children().map(|n| n.name()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(root.child_text("a"), Some("1"));
        assert_eq!(root.child("b").unwrap().attribute("x"), Some("y"));
        assert_eq!(doc.query_text("/root/c/d"), Some("2"));
    }

    #[test]
    fn test_parse_strips_namespace_prefix() {
        let doc = parse(
            "<s:Envelope xmlns:s=\"http://schemas.xmlsoap.org/soap/envelope/\"><s:Body><u:Ok/></s:Body></s:Envelope>",
        )
        .unwrap();

        let ok = doc.query("/Envelope/Body/Ok");
        assert_eq!(ok.len(), 1);
        assert_eq!(ok[0].name(), "Ok");
        // Only the element name is normalized
        assert!(doc.query("/Envelope")[0].attribute("xmlns:s").is_some());
    }

    #[test]
    fn test_parse_strips_only_up_to_first_colon() {
        assert_eq!(local_name("a:b:c"), "b:c");
        assert_eq!(local_name("plain"), "plain");
    }

    #[test]
    fn test_parse_parent_links() {
        let doc = parse("<a><b><c/></b></a>").unwrap();
        let c = doc.query("/a/b/c")[0];

        let b = c.parent().unwrap();
        assert_eq!(b.name(), "b");
        let a = b.parent().unwrap();
        assert_eq!(a.name(), "a");
        assert!(a.parent().unwrap().is_root());
        assert!(doc.root().parent().is_none());
    }

    #[test]
    fn test_parse_unescapes_text_and_attributes() {
        let doc = parse("<a t=\"1 &amp; 2\">&lt;b&gt;</a>").unwrap();
        let a = doc.query("/a")[0];
        assert_eq!(a.text(), Some("<b>"));
        assert_eq!(a.attribute("t"), Some("1 & 2"));
    }

    #[test]
    fn test_parse_cdata_is_text() {
        let doc = parse("<a><![CDATA[<raw>]]></a>").unwrap();
        assert_eq!(doc.query_text("/a"), Some("<raw>"));
    }

    #[test]
    fn test_parse_mismatched_close_tag_does_not_pop() {
        // </c> does not match the open <b>, so <b> stays current and the
        // following <d> becomes its child rather than a sibling.
        let doc = parse("<a><b></c><d/></b></a>").unwrap();

        assert_eq!(doc.query("/a/b/d").len(), 1);
        assert!(doc.query("/a/d").is_empty());
    }

    #[test]
    fn test_parse_stray_close_tag_at_top_level() {
        let doc = parse("</x><a>1</a>").unwrap();
        assert_eq!(doc.query_text("/a"), Some("1"));
    }

    #[test]
    fn test_parse_unclosed_elements_are_kept() {
        let doc = parse("<a><b>text").unwrap();
        assert_eq!(doc.query_text("/a/b"), Some("text"));
    }

    #[test]
    fn test_parse_malformed_markup_is_an_error() {
        assert!(parse("<root><device").is_err());
    }

    #[test]
    fn test_parse_is_deterministic() {
        let xml = "<root><x a=\"1\">t</x><y/></root>";
        assert_eq!(parse(xml).unwrap(), parse(xml).unwrap());
    }
}
