//! Fragments of the XML-DSig and XAdES vocabularies, written with the xml-rs
//! event writer. Every fragment declares the namespaces it uses on its root so
//! it can be canonicalised on its own.

pub mod ds;
pub mod xades;

use std::io::Write;

use xml::writer::{EmitterConfig, EventWriter};

use crate::error::{Error, Result};

pub trait WriteXml {
    fn write_xml<W: Write>(&self, writer: &mut EventWriter<W>) -> xml::writer::Result<()>;

    fn to_xml(&self) -> Result<String> {
        let mut output = Vec::new();
        {
            let mut writer = EmitterConfig::new()
                .perform_indent(false)
                .write_document_declaration(false)
                .normalize_empty_elements(false)
                .create_writer(&mut output);
            self.write_xml(&mut writer)
                .map_err(|e| Error::SignatureAssembly(e.to_string()))?;
        }
        String::from_utf8(output).map_err(|e| Error::SignatureAssembly(e.to_string()))
    }
}

/// Writes `<name>text</name>` where `name` is already in scope.
pub(crate) fn text_element<W: Write>(writer: &mut EventWriter<W>, name: &str, text: &str) -> xml::writer::Result<()> {
    writer.write(xml::writer::XmlEvent::start_element(name))?;
    writer.write(xml::writer::XmlEvent::characters(text))?;
    writer.write(xml::writer::XmlEvent::end_element())
}
