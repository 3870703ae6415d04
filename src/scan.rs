use std::ops::Range;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::{Error, Result};

/// Byte ranges of one element inside the scanned buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ElementSpan {
    /// From `<` of the start tag through `>` of the end tag.
    pub outer: Range<usize>,
    /// Content between the tags; empty for `<x/>`.
    pub inner: Range<usize>,
}

/// Collects the spans of every element accepted by `matches`, in document order
/// of their start tags.
pub(crate) fn find_all<F>(xml: &[u8], mut matches: F) -> Result<Vec<ElementSpan>>
where
    F: FnMut(&BytesStart<'_>) -> bool,
{
    let mut reader = Reader::from_reader(xml);
    let mut open: Vec<(usize, usize, usize)> = vec![];
    let mut found: Vec<ElementSpan> = vec![];
    let mut depth = 0usize;

    loop {
        let start = reader.buffer_position() as usize;
        let event = reader
            .read_event()
            .map_err(|e| Error::Parse(format!("at byte {}: {}", start, e)))?;
        let end = reader.buffer_position() as usize;
        match event {
            Event::Start(tag) => {
                depth += 1;
                if matches(&tag) {
                    open.push((start, end, depth));
                }
            }
            Event::Empty(tag) => {
                if matches(&tag) {
                    found.push(ElementSpan {
                        outer: start..end,
                        inner: end..end,
                    });
                }
            }
            Event::End(_) => {
                if let Some(&(outer_start, inner_start, d)) = open.last() {
                    if d == depth {
                        open.pop();
                        found.push(ElementSpan {
                            outer: outer_start..end,
                            inner: inner_start..start,
                        });
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    found.sort_by_key(|s| s.outer.start);
    Ok(found)
}

pub(crate) fn find_first<F>(xml: &[u8], matches: F) -> Result<Option<ElementSpan>>
where
    F: FnMut(&BytesStart<'_>) -> bool,
{
    Ok(find_all(xml, matches)?.into_iter().next())
}

pub(crate) fn find_by_qname(xml: &[u8], qname: &str) -> Result<Option<ElementSpan>> {
    find_first(xml, |tag| tag.name().as_ref() == qname.as_bytes())
}

pub(crate) fn find_by_id(xml: &[u8], id: &str) -> Result<Option<ElementSpan>> {
    find_first(xml, |tag| {
        tag.attributes().flatten().any(|a| {
            a.key.local_name().as_ref() == b"Id" && a.value.as_ref() == id.as_bytes()
        })
    })
}

/// Offset of the first `</qname>` end tag.
pub(crate) fn find_end_tag(xml: &[u8], qname: &str) -> Result<Option<usize>> {
    let mut reader = Reader::from_reader(xml);
    loop {
        let start = reader.buffer_position() as usize;
        match reader
            .read_event()
            .map_err(|e| Error::Parse(format!("at byte {}: {}", start, e)))?
        {
            Event::End(tag) if tag.name().as_ref() == qname.as_bytes() => return Ok(Some(start)),
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<r><ext:E xmlns:ext="urn:e"><a Id="one">x<b/></a></ext:E><ext:E xmlns:ext="urn:e"/></r>"#;

    #[test]
    fn spans_cover_whole_elements() {
        let spans = find_all(DOC.as_bytes(), |t| t.name().as_ref() == b"ext:E").unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(
            &DOC[spans[0].outer.clone()],
            r#"<ext:E xmlns:ext="urn:e"><a Id="one">x<b/></a></ext:E>"#
        );
        assert_eq!(&DOC[spans[0].inner.clone()], r#"<a Id="one">x<b/></a>"#);
        assert_eq!(&DOC[spans[1].outer.clone()], r#"<ext:E xmlns:ext="urn:e"/>"#);
        assert!(spans[1].inner.is_empty());
    }

    #[test]
    fn nested_matches_are_ordered_by_start() {
        let xml = "<x><x></x></x>";
        let spans = find_all(xml.as_bytes(), |t| t.name().as_ref() == b"x").unwrap();
        assert_eq!(spans[0].outer, 0..14);
        assert_eq!(spans[1].outer, 3..10);
    }

    #[test]
    fn by_id_and_end_tag() {
        let span = find_by_id(DOC.as_bytes(), "one").unwrap().unwrap();
        assert_eq!(&DOC[span.outer], r#"<a Id="one">x<b/></a>"#);
        assert!(find_by_id(DOC.as_bytes(), "two").unwrap().is_none());

        let at = find_end_tag(DOC.as_bytes(), "ext:E").unwrap().unwrap();
        assert!(DOC[at..].starts_with("</ext:E><ext:E"));
        assert_eq!(find_end_tag(DOC.as_bytes(), "nope").unwrap(), None);
    }
}
