//! Byte-preserving attribute normalisation.
//!
//! Every start tag is rewritten with its attributes in lexicographic order of
//! their qualified names. Text, comments, CDATA sections, processing
//! instructions and end tags are copied through byte for byte, so a `>` inside
//! an attribute value or markup inside CDATA can never confuse the rewrite.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::{Error, Result};

pub fn normalize_attribute_order(xml: &[u8]) -> Result<Vec<u8>> {
    let mut reader = Reader::from_reader(xml);
    let mut output = Vec::with_capacity(xml.len());
    let mut saw_element = false;

    loop {
        let start = reader.buffer_position() as usize;
        let event = reader
            .read_event()
            .map_err(|e| Error::Parse(format!("at byte {}: {}", start, e)))?;
        let end = reader.buffer_position() as usize;
        match event {
            Event::Start(tag) => {
                saw_element = true;
                write_sorted_tag(&mut output, &tag, false)?;
            }
            Event::Empty(tag) => {
                saw_element = true;
                write_sorted_tag(&mut output, &tag, true)?;
            }
            Event::Eof => break,
            _ => output.extend_from_slice(&xml[start..end]),
        }
    }

    if !saw_element {
        return Err(Error::Parse("no root element".to_string()));
    }
    Ok(output)
}

fn write_sorted_tag(output: &mut Vec<u8>, tag: &BytesStart<'_>, empty: bool) -> Result<()> {
    let mut attributes = tag
        .attributes()
        .map(|a| a.map(|a| (a.key.as_ref().to_vec(), a.value.into_owned())))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Parse(e.to_string()))?;
    attributes.sort_by(|a, b| a.0.cmp(&b.0));

    output.push(b'<');
    output.extend_from_slice(tag.name().as_ref());
    for (key, value) in &attributes {
        // raw values are kept escaped as written; only the quote may need to change
        let quote = if value.contains(&b'"') { b'\'' } else { b'"' };
        output.push(b' ');
        output.extend_from_slice(key);
        output.push(b'=');
        output.push(quote);
        output.extend_from_slice(value);
        output.push(quote);
    }
    if empty {
        output.extend_from_slice(b"/>");
    } else {
        output.push(b'>');
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalize(xml: &str) -> String {
        String::from_utf8(normalize_attribute_order(xml.as_bytes()).unwrap()).unwrap()
    }

    #[test]
    fn sorts_attributes_by_qualified_name() {
        assert_eq!(
            normalize(r#"<a z="1" b="2" xmlns:x="urn:x" x:c="3"><b   y='1'  a='2'/></a>"#),
            r#"<a b="2" x:c="3" xmlns:x="urn:x" z="1"><b a="2" y="1"/></a>"#
        );
    }

    #[test]
    fn leaves_everything_else_untouched() {
        let xml = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<!-- <x b='1' a='2'> -->\n<r><![CDATA[<c b=\"1\" a=\"2\">]]>text &amp; more<?pi b a?></r>\n";
        assert_eq!(normalize(xml), xml);
    }

    #[test]
    fn greater_than_inside_values() {
        assert_eq!(
            normalize(r#"<r expr="a > b" id="x"/>"#),
            r#"<r expr="a > b" id="x"/>"#
        );
        assert_eq!(
            normalize(r#"<r id="x" expr='say "hi"'/>"#),
            r#"<r expr='say "hi"' id="x"/>"#
        );
    }

    #[test]
    fn idempotent() {
        for xml in [
            r#"<r c="3" a="1"><s e="5" d="4">t</s></r>"#,
            r#"<r id="x" expr="a > b"/>"#,
            r#"<r id="x" expr='say "hi"'/>"#,
            "<r b='1' a='2'><!-- <x b='1' a='2'> --><![CDATA[<c b=\"1\" a=\"2\">]]><s d='4' c='3'/></r>",
            r#"<a z="1" b="2" xmlns:x="urn:x" x:c="3"><b   y='1'  a='2'/></a>"#,
        ] {
            let once = normalize(xml);
            assert_eq!(normalize(&once), once, "{}", xml);
        }
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(matches!(
            normalize_attribute_order(b"<a><b></a>"),
            Err(Error::Parse(_))
        ));
        assert!(matches!(normalize_attribute_order(b""), Err(Error::Parse(_))));
    }
}
