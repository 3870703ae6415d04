use std::io::Write;

use xml::writer::{EventWriter, XmlEvent};

use super::{text_element, WriteXml};
use crate::NS_DS;

/// `ds:CanonicalizationMethod` or `ds:Transform`; both carry an algorithm and,
/// for exclusive C14N, an optional `ec:InclusiveNamespaces` prefix list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Algorithm {
    pub algorithm: String,
    pub inclusive_prefixes: Option<String>,
}

impl Algorithm {
    pub fn new(algorithm: &str) -> Self {
        Algorithm {
            algorithm: algorithm.to_string(),
            inclusive_prefixes: None,
        }
    }

    pub fn with_prefixes(algorithm: &str, prefixes: &str) -> Self {
        Algorithm {
            algorithm: algorithm.to_string(),
            inclusive_prefixes: Some(prefixes.to_string()),
        }
    }

    fn write_as<W: Write>(&self, name: &str, writer: &mut EventWriter<W>) -> xml::writer::Result<()> {
        writer.write(XmlEvent::start_element(name).attr("Algorithm", &self.algorithm))?;
        if let Some(prefixes) = &self.inclusive_prefixes {
            writer.write(
                XmlEvent::start_element("ec:InclusiveNamespaces")
                    .ns("ec", crate::NS_EXC_C14N)
                    .attr("PrefixList", prefixes),
            )?;
            writer.write(XmlEvent::end_element())?;
        }
        writer.write(XmlEvent::end_element())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub id: Option<String>,
    pub uri: String,
    pub ref_type: Option<String>,
    pub transforms: Vec<Algorithm>,
    pub digest_method: String,
    pub digest_value: String,
}

impl Reference {
    fn write<W: Write>(&self, writer: &mut EventWriter<W>) -> xml::writer::Result<()> {
        let mut start = XmlEvent::start_element("ds:Reference");
        if let Some(id) = &self.id {
            start = start.attr("Id", id);
        }
        if let Some(ref_type) = &self.ref_type {
            start = start.attr("Type", ref_type);
        }
        writer.write(start.attr("URI", &self.uri))?;

        if !self.transforms.is_empty() {
            writer.write(XmlEvent::start_element("ds:Transforms"))?;
            for transform in &self.transforms {
                transform.write_as("ds:Transform", writer)?;
            }
            writer.write(XmlEvent::end_element())?;
        }
        writer.write(XmlEvent::start_element("ds:DigestMethod").attr("Algorithm", &self.digest_method))?;
        writer.write(XmlEvent::end_element())?;
        text_element(writer, "ds:DigestValue", &self.digest_value)?;
        writer.write(XmlEvent::end_element())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedInfo {
    /// Extra `(prefix, uri)` declarations placed on `ds:SignedInfo`, needed
    /// when exclusive C14N lists them as inclusive prefixes.
    pub namespaces: Vec<(String, String)>,
    pub canonicalization_method: Algorithm,
    pub signature_method: String,
    pub references: Vec<Reference>,
}

impl WriteXml for SignedInfo {
    fn write_xml<W: Write>(&self, writer: &mut EventWriter<W>) -> xml::writer::Result<()> {
        let mut start = XmlEvent::start_element("ds:SignedInfo").ns("ds", NS_DS);
        for (prefix, uri) in &self.namespaces {
            start = start.ns(prefix.as_str(), uri.as_str());
        }
        writer.write(start)?;
        self.canonicalization_method
            .write_as("ds:CanonicalizationMethod", writer)?;
        writer.write(XmlEvent::start_element("ds:SignatureMethod").attr("Algorithm", &self.signature_method))?;
        writer.write(XmlEvent::end_element())?;
        for reference in &self.references {
            reference.write(writer)?;
        }
        writer.write(XmlEvent::end_element())
    }
}

/// `ds:KeyInfo` carrying the signing certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    pub id: String,
    pub certificate: String,
}

impl WriteXml for KeyInfo {
    fn write_xml<W: Write>(&self, writer: &mut EventWriter<W>) -> xml::writer::Result<()> {
        writer.write(
            XmlEvent::start_element("ds:KeyInfo")
                .ns("ds", NS_DS)
                .attr("Id", &self.id),
        )?;
        writer.write(XmlEvent::start_element("ds:X509Data"))?;
        text_element(writer, "ds:X509Certificate", &self.certificate)?;
        writer.write(XmlEvent::end_element())?;
        writer.write(XmlEvent::end_element())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_info_with_prefix_lists() {
        let signed_info = SignedInfo {
            namespaces: vec![("wsa".to_string(), crate::NS_WSA.to_string())],
            canonicalization_method: Algorithm::with_prefixes(crate::CANONICAL_EXCLUSIVE_1_0, "wsa"),
            signature_method: crate::SIGNATURE_RSA_SHA256.to_string(),
            references: vec![Reference {
                id: None,
                uri: "#ID-1".to_string(),
                ref_type: None,
                transforms: vec![Algorithm::new(crate::CANONICAL_EXCLUSIVE_1_0)],
                digest_method: crate::DIGEST_SHA256.to_string(),
                digest_value: "AAAA".to_string(),
            }],
        };
        assert_eq!(
            signed_info.to_xml().unwrap(),
            concat!(
                r#"<ds:SignedInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#" xmlns:wsa="http://www.w3.org/2005/08/addressing">"#,
                r#"<ds:CanonicalizationMethod Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#">"#,
                r#"<ec:InclusiveNamespaces xmlns:ec="http://www.w3.org/2001/10/xml-exc-c14n#" PrefixList="wsa"></ec:InclusiveNamespaces>"#,
                r#"</ds:CanonicalizationMethod>"#,
                r#"<ds:SignatureMethod Algorithm="http://www.w3.org/2001/04/xmldsig-more#rsa-sha256"></ds:SignatureMethod>"#,
                r##"<ds:Reference URI="#ID-1"><ds:Transforms>"##,
                r#"<ds:Transform Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"></ds:Transform></ds:Transforms>"#,
                r#"<ds:DigestMethod Algorithm="http://www.w3.org/2001/04/xmlenc#sha256"></ds:DigestMethod>"#,
                r#"<ds:DigestValue>AAAA</ds:DigestValue></ds:Reference></ds:SignedInfo>"#,
            )
        );
    }

    #[test]
    fn key_info_declares_ds() {
        let key_info = KeyInfo {
            id: "xmldsig-1-keyinfo".to_string(),
            certificate: "MIIB".to_string(),
        };
        assert_eq!(
            key_info.to_xml().unwrap(),
            r#"<ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#" Id="xmldsig-1-keyinfo"><ds:X509Data><ds:X509Certificate>MIIB</ds:X509Certificate></ds:X509Data></ds:KeyInfo>"#
        );
    }
}
