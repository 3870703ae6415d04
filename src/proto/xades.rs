use std::io::Write;

use xml::writer::{EventWriter, XmlEvent};

use super::{text_element, WriteXml};
use crate::{NS_DS, NS_XADES};

/// `xades:SignedProperties` for the DIAN signature policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedProperties {
    pub id: String,
    /// `YYYY-MM-DDTHH:MM:SS±HH:MM`
    pub signing_time: String,
    /// Base64 SHA-256 of the signing certificate's DER encoding.
    pub cert_digest: String,
    pub issuer_name: String,
    /// Decimal serial number.
    pub serial_number: String,
    pub policy_identifier: String,
    pub policy_hash: String,
    pub claimed_role: String,
}

impl WriteXml for SignedProperties {
    fn write_xml<W: Write>(&self, writer: &mut EventWriter<W>) -> xml::writer::Result<()> {
        writer.write(
            XmlEvent::start_element("xades:SignedProperties")
                .ns("ds", NS_DS)
                .ns("xades", NS_XADES)
                .attr("Id", &self.id),
        )?;
        writer.write(XmlEvent::start_element("xades:SignedSignatureProperties"))?;
        text_element(writer, "xades:SigningTime", &self.signing_time)?;

        writer.write(XmlEvent::start_element("xades:SigningCertificate"))?;
        writer.write(XmlEvent::start_element("xades:Cert"))?;
        writer.write(XmlEvent::start_element("xades:CertDigest"))?;
        digest_method(writer)?;
        text_element(writer, "ds:DigestValue", &self.cert_digest)?;
        writer.write(XmlEvent::end_element())?;
        writer.write(XmlEvent::start_element("xades:IssuerSerial"))?;
        text_element(writer, "ds:X509IssuerName", &self.issuer_name)?;
        text_element(writer, "ds:X509SerialNumber", &self.serial_number)?;
        writer.write(XmlEvent::end_element())?;
        writer.write(XmlEvent::end_element())?;
        writer.write(XmlEvent::end_element())?;

        writer.write(XmlEvent::start_element("xades:SignaturePolicyIdentifier"))?;
        writer.write(XmlEvent::start_element("xades:SignaturePolicyId"))?;
        writer.write(XmlEvent::start_element("xades:SigPolicyId"))?;
        text_element(writer, "xades:Identifier", &self.policy_identifier)?;
        writer.write(XmlEvent::end_element())?;
        writer.write(XmlEvent::start_element("xades:SigPolicyHash"))?;
        digest_method(writer)?;
        text_element(writer, "ds:DigestValue", &self.policy_hash)?;
        writer.write(XmlEvent::end_element())?;
        writer.write(XmlEvent::end_element())?;
        writer.write(XmlEvent::end_element())?;

        writer.write(XmlEvent::start_element("xades:SignerRole"))?;
        writer.write(XmlEvent::start_element("xades:ClaimedRoles"))?;
        text_element(writer, "xades:ClaimedRole", &self.claimed_role)?;
        writer.write(XmlEvent::end_element())?;
        writer.write(XmlEvent::end_element())?;

        writer.write(XmlEvent::end_element())?;
        writer.write(XmlEvent::end_element())
    }
}

fn digest_method<W: Write>(writer: &mut EventWriter<W>) -> xml::writer::Result<()> {
    writer.write(XmlEvent::start_element("ds:DigestMethod").attr("Algorithm", crate::DIGEST_SHA256))?;
    writer.write(XmlEvent::end_element())
}
