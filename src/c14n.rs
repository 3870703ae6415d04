use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use regex::bytes::{Captures, Regex};
use xml::attribute::OwnedAttribute;
use xml::name::OwnedName;
use xml::namespace::Namespace;
use xml::reader::XmlEvent;

use crate::error::{Error, Result};

const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Namespace given to prefixes used without a declaration in scope. It is
/// never rendered, so such names come out exactly as written.
const UNBOUND_NAMESPACE: &str = "urn:x-dian-xmlsec:unbound-prefix";

static LINE_ENDINGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\r\n?").expect("static regex"));
static QUOTED_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?-u)"[^"]*"|'[^']*'"#).expect("static regex"));

/// Canonicalisation algorithm applied to a document or element subset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum C14nMode {
    /// Canonical XML 1.0 without comments.
    Inclusive,
    /// Exclusive Canonical XML 1.0 without comments. Prefixes in the set are
    /// treated as visibly utilised on every element; `#default` names the
    /// default namespace.
    ExclusiveWithInclusivePrefixes(BTreeSet<String>),
}

impl C14nMode {
    pub fn exclusive<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        C14nMode::ExclusiveWithInclusivePrefixes(prefixes.into_iter().map(Into::into).collect())
    }

    pub fn uri(&self) -> &'static str {
        match self {
            C14nMode::Inclusive => crate::CANONICAL_1_0,
            C14nMode::ExclusiveWithInclusivePrefixes(_) => crate::CANONICAL_EXCLUSIVE_1_0,
        }
    }

    /// Resolves an algorithm URI plus an optional `PrefixList`.
    pub fn from_uri(uri: &str, prefixes: Option<&str>) -> Option<Self> {
        match uri {
            crate::CANONICAL_1_0 => Some(C14nMode::Inclusive),
            crate::CANONICAL_EXCLUSIVE_1_0 => Some(C14nMode::exclusive(
                prefixes.unwrap_or_default().split_whitespace(),
            )),
            _ => None,
        }
    }
}

/// Parses `xml` into reader events with the settings canonicalisation needs:
/// comments dropped, CDATA folded into text, whitespace kept.
pub fn parse_events(xml: &[u8]) -> Result<Vec<XmlEvent>> {
    if xml.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(Error::Parse("empty input".to_string()));
    }
    let prepared = prepare_input(xml)?;
    xml::reader::EventReader::new_with_config(
        prepared.as_slice(),
        xml::ParserConfig::new()
            .ignore_comments(true)
            .trim_whitespace(false)
            .whitespace_to_characters(true)
            .cdata_to_characters(true)
            .coalesce_characters(true)
            .ignore_root_level_whitespace(true),
    )
    .into_iter()
    .collect::<std::result::Result<Vec<_>, _>>()
    .map_err(|e| Error::Parse(e.to_string()))
}

/// End-of-line handling and attribute-value normalisation on the raw input.
/// Literal CR/CRLF become LF everywhere and literal TAB/LF inside attribute
/// values become spaces, so the only such characters left after parsing are
/// the ones written as character references. Prefixes used with no
/// declaration in scope are bound to `UNBOUND_NAMESPACE` on the root element.
fn prepare_input(xml: &[u8]) -> Result<Vec<u8>> {
    let xml = LINE_ENDINGS.replace_all(xml, &b"\n"[..]);
    let mut reader = Reader::from_reader(xml.as_ref());
    let mut output = Vec::with_capacity(xml.len());
    let mut scopes: Vec<Vec<Vec<u8>>> = vec![];
    let mut unbound: BTreeSet<Vec<u8>> = BTreeSet::new();
    let mut root_name_end: Option<usize> = None;

    loop {
        let start = reader.buffer_position() as usize;
        let event = reader
            .read_event()
            .map_err(|e| Error::Parse(format!("at byte {}: {}", start, e)))?;
        let end = reader.buffer_position() as usize;
        let (tag, opens) = match event {
            Event::Start(tag) => (tag, true),
            Event::Empty(tag) => (tag, false),
            Event::End(_) => {
                scopes.pop();
                output.extend_from_slice(&xml[start..end]);
                continue;
            }
            Event::Eof => break,
            _ => {
                output.extend_from_slice(&xml[start..end]);
                continue;
            }
        };

        let declared = collect_unbound(&tag, &scopes, &mut unbound)?;
        if root_name_end.is_none() {
            root_name_end = Some(output.len() + 1 + tag.name().as_ref().len());
        }
        output.extend_from_slice(&QUOTED_VALUE.replace_all(&xml[start..end], |caps: &Captures<'_>| {
            caps[0]
                .iter()
                .map(|&b| if b == b'\t' || b == b'\n' { b' ' } else { b })
                .collect::<Vec<u8>>()
        }));
        if opens {
            scopes.push(declared);
        }
    }

    if let Some(at) = root_name_end.filter(|_| !unbound.is_empty()) {
        let mut declarations = Vec::new();
        for prefix in &unbound {
            declarations.extend_from_slice(b" xmlns:");
            declarations.extend_from_slice(prefix);
            declarations.extend_from_slice(format!("=\"{}\"", UNBOUND_NAMESPACE).as_bytes());
        }
        output.splice(at..at, declarations);
    }
    Ok(output)
}

/// Records the prefixes `tag` uses that no enclosing element declares, and
/// returns the prefixes `tag` declares itself.
fn collect_unbound(
    tag: &BytesStart<'_>,
    scopes: &[Vec<Vec<u8>>],
    unbound: &mut BTreeSet<Vec<u8>>,
) -> Result<Vec<Vec<u8>>> {
    let mut declared = vec![];
    let mut used = vec![];
    if let Some(prefix) = tag.name().prefix() {
        used.push(prefix.as_ref().to_vec());
    }
    for attr in tag.attributes() {
        let attr = attr.map_err(|e| Error::Parse(e.to_string()))?;
        match attr.key.as_ref().strip_prefix(b"xmlns:") {
            Some(prefix) => declared.push(prefix.to_vec()),
            None => {
                if let Some(prefix) = attr.key.prefix() {
                    used.push(prefix.as_ref().to_vec());
                }
            }
        }
    }

    for prefix in used {
        if prefix == b"xml" || prefix == b"xmlns" {
            continue;
        }
        if !declared.contains(&prefix) && !scopes.iter().flatten().any(|p| *p == prefix) {
            unbound.insert(prefix);
        }
    }
    Ok(declared)
}

/// Canonicalises a whole document or standalone fragment.
pub fn canonicalize(xml: &[u8], mode: &C14nMode) -> Result<Vec<u8>> {
    let events = parse_events(xml)?;
    canonicalize_events(&events, mode, 0)
}

/// Canonicalises the element carrying an `Id` attribute equal to `id`,
/// keeping the namespace context of its ancestors.
pub fn canonicalize_element_by_id(xml: &[u8], id: &str, mode: &C14nMode) -> Result<Vec<u8>> {
    let events = parse_events(xml)?;
    let start = find_element_by_id(&events, id)
        .ok_or_else(|| Error::SignatureAssembly(format!("no element with Id {:?}", id)))?;
    canonicalize_events(&events, mode, start)
}

pub(crate) fn find_element_by_id(events: &[XmlEvent], id: &str) -> Option<usize> {
    events.iter().position(|e| match e {
        XmlEvent::StartElement { attributes, .. } => attributes
            .iter()
            .any(|a| a.name.local_name == "Id" && a.value == id),
        _ => false,
    })
}

/// Canonicalises `events`, as produced by [`parse_events`]. With
/// `start == 0` the whole document is rendered,
/// including processing instructions outside the root element. Otherwise
/// `start` must index a start element and only that subtree is rendered.
pub fn canonicalize_events(events: &[XmlEvent], mode: &C14nMode, start: usize) -> Result<Vec<u8>> {
    if start > 0 && !matches!(events.get(start), Some(XmlEvent::StartElement { .. })) {
        return Err(Error::Parse(format!("event {} is not a start element", start)));
    }

    let mut output = String::new();
    let mut level: usize = 0;
    let mut seen_root = false;
    let mut ancestor_xml_attrs: Vec<Vec<&OwnedAttribute>> = vec![];
    let mut rendered: Vec<BTreeMap<String, String>> = vec![];

    for (i, event) in events.iter().enumerate() {
        match event {
            XmlEvent::StartElement {
                name,
                attributes,
                namespace,
            } => {
                if i < start {
                    ancestor_xml_attrs.push(
                        attributes
                            .iter()
                            .filter(|a| a.name.namespace.as_deref() == Some(XML_NAMESPACE))
                            .collect(),
                    );
                    continue;
                }

                let parent = rendered.last().cloned().unwrap_or_else(|| {
                    let mut initial = BTreeMap::new();
                    initial.insert(String::new(), String::new());
                    initial
                });
                let declarations = match mode {
                    C14nMode::Inclusive => inclusive_declarations(namespace, &parent),
                    C14nMode::ExclusiveWithInclusivePrefixes(prefixes) => {
                        exclusive_declarations(name, attributes, namespace, prefixes, &parent)
                    }
                };

                let mut attrs = attributes.iter().collect::<Vec<_>>();
                if i == start && start > 0 && *mode == C14nMode::Inclusive {
                    for inherited in ancestor_xml_attrs.iter().rev().flatten() {
                        if !attrs.iter().any(|a| {
                            a.name.namespace == inherited.name.namespace
                                && a.name.local_name == inherited.name.local_name
                        }) {
                            attrs.push(*inherited);
                        }
                    }
                }
                attrs.sort_by_cached_key(|a| attribute_sort_key(a));

                output.push('<');
                push_qualified(&mut output, name);
                for (prefix, uri) in &declarations {
                    if prefix.is_empty() {
                        output.push_str(" xmlns=\"");
                    } else {
                        output.push_str(" xmlns:");
                        output.push_str(prefix);
                        output.push_str("=\"");
                    }
                    output.push_str(&escape_attr(uri));
                    output.push('"');
                }
                for attr in attrs {
                    output.push(' ');
                    push_qualified(&mut output, &attr.name);
                    output.push_str("=\"");
                    output.push_str(&escape_attr(&attr.value));
                    output.push('"');
                }
                output.push('>');

                let mut scope = parent;
                scope.extend(declarations);
                rendered.push(scope);
                level += 1;
            }
            XmlEvent::EndElement { name } => {
                if i < start {
                    ancestor_xml_attrs.pop();
                    continue;
                }
                rendered.pop();
                level = level
                    .checked_sub(1)
                    .ok_or_else(|| Error::Parse("unbalanced end element".to_string()))?;
                output.push_str("</");
                push_qualified(&mut output, name);
                output.push('>');
                if level == 0 {
                    seen_root = true;
                    if start > 0 {
                        break;
                    }
                }
            }
            XmlEvent::Characters(data) | XmlEvent::CData(data) | XmlEvent::Whitespace(data) => {
                if i >= start && level > 0 {
                    output.push_str(&escape_text(data));
                }
            }
            XmlEvent::ProcessingInstruction { name, data } => {
                if i < start || (level == 0 && start > 0) {
                    continue;
                }
                if level == 0 && seen_root {
                    output.push('\n');
                }
                output.push_str("<?");
                output.push_str(name);
                if let Some(data) = data.as_deref().filter(|d| !d.is_empty()) {
                    output.push(' ');
                    output.push_str(data);
                }
                output.push_str("?>");
                if level == 0 && !seen_root {
                    output.push('\n');
                }
            }
            _ => {}
        }
    }

    if level != 0 {
        return Err(Error::Parse("unterminated element".to_string()));
    }
    Ok(output.into_bytes())
}

/// Namespace URI then local name; names with an unbound prefix sort as
/// unqualified names spelled with their prefix.
fn attribute_sort_key(attr: &OwnedAttribute) -> (String, String) {
    match (attr.name.namespace.as_deref(), attr.name.prefix.as_deref()) {
        (Some(UNBOUND_NAMESPACE), Some(prefix)) => (String::new(), format!("{}:{}", prefix, attr.name.local_name)),
        (namespace, _) => (namespace.unwrap_or_default().to_string(), attr.name.local_name.clone()),
    }
}

fn push_qualified(output: &mut String, name: &OwnedName) {
    if let Some(prefix) = name.prefix.as_deref() {
        output.push_str(prefix);
        output.push(':');
    }
    output.push_str(&name.local_name);
}

fn is_reserved_prefix(prefix: &str) -> bool {
    prefix == xml::namespace::NS_XML_PREFIX || prefix == xml::namespace::NS_XMLNS_PREFIX
}

fn inclusive_declarations(
    namespace: &Namespace,
    parent: &BTreeMap<String, String>,
) -> Vec<(String, String)> {
    namespace
        .0
        .iter()
        .filter(|(prefix, uri)| !is_reserved_prefix(prefix) && uri.as_str() != UNBOUND_NAMESPACE)
        .filter(|(prefix, uri)| parent.get(prefix.as_str()).map(String::as_str).unwrap_or_default() != uri.as_str())
        .map(|(prefix, uri)| (prefix.clone(), uri.clone()))
        .collect()
}

fn exclusive_declarations(
    name: &OwnedName,
    attributes: &[OwnedAttribute],
    namespace: &Namespace,
    inclusive_prefixes: &BTreeSet<String>,
    parent: &BTreeMap<String, String>,
) -> Vec<(String, String)> {
    let mut utilised = BTreeSet::new();
    utilised.insert(name.prefix.as_deref().unwrap_or_default());
    for attr in attributes {
        if let Some(prefix) = attr.name.prefix.as_deref() {
            utilised.insert(prefix);
        }
    }
    for prefix in inclusive_prefixes {
        utilised.insert(if prefix == "#default" { "" } else { prefix.as_str() });
    }

    utilised
        .into_iter()
        .filter(|prefix| !is_reserved_prefix(prefix))
        .filter_map(|prefix| {
            let uri = namespace.0.get(prefix).map(String::as_str).unwrap_or_default();
            if (!prefix.is_empty() && uri.is_empty()) || uri == UNBOUND_NAMESPACE {
                return None;
            }
            if parent.get(prefix).map(String::as_str).unwrap_or_default() == uri {
                return None;
            }
            Some((prefix.to_string(), uri.to_string()))
        })
        .collect()
}

/// Escapes character data the way canonical XML requires.
pub fn escape_text(data: &str) -> String {
    data.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\r', "&#xD;")
}

/// Escapes an attribute value the way canonical XML requires.
pub fn escape_attr(data: &str) -> String {
    data.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('"', "&quot;")
        .replace('\t', "&#x9;")
        .replace('\n', "&#xA;")
        .replace('\r', "&#xD;")
}
