//! XAdES-BES and WS-Security signing for DIAN (Colombian tax authority)
//! electronic documents.
//!
//! The pipeline is: attribute normalisation, canonicalisation (inclusive or
//! exclusive C14N), SHA-256 digests, RSA PKCS#1 v1.5 signing, and splicing of
//! the resulting `ds:Signature` into the document or SOAP header.

#[macro_use]
extern crate serde_derive;

pub mod c14n;
pub mod config;
pub mod cufe;
pub mod digest;
pub mod error;
pub mod keys;
pub mod legacy;
pub mod normalize;
pub mod proto;
mod scan;
pub mod soap;
pub mod verify;
pub mod wssec;
pub mod xades;

#[cfg(test)]
mod test_support;

pub use c14n::{canonicalize, C14nMode};
pub use config::{Environment, OpenSslConfig, SecurityHeaderConfig, ServiceConfig, SignerConfig};
pub use digest::{digest, DigestAlgorithm};
pub use error::{Error, Result};
pub use keys::{CredentialSource, KeyMaterial, Pkcs12Loader};
pub use legacy::{InProcessConverter, LegacyCredentialConverter, OpenSslCli, PemScope};
pub use normalize::normalize_attribute_order;
pub use wssec::{SecurityHeader, SecurityHeaderSigner};
pub use xades::XadesSigner;

pub const DIGEST_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
pub const DIGEST_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#sha384";

pub const TRANSFORM_ENVELOPED_SIGNATURE: &str =
    "http://www.w3.org/2000/09/xmldsig#enveloped-signature";

pub const CANONICAL_1_0: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
pub const CANONICAL_EXCLUSIVE_1_0: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";

pub const SIGNATURE_RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const SIGNATURE_RSA_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384";

pub const XADES_SIGNED_PROPERTIES_TYPE: &str = "http://uri.etsi.org/01903#SignedProperties";

pub const NS_DS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const NS_XADES: &str = "http://uri.etsi.org/01903/v1.3.2#";
pub const NS_EXC_C14N: &str = CANONICAL_EXCLUSIVE_1_0;
pub const NS_SOAP: &str = "http://www.w3.org/2003/05/soap-envelope";
pub const NS_WCF: &str = "http://wcf.dian.colombia";
pub const NS_WSA: &str = "http://www.w3.org/2005/08/addressing";
pub const NS_WSSE: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
pub const NS_WSU: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";

pub const WSS_X509V3: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-x509-token-profile-1.0#X509v3";
pub const WSS_BASE64_BINARY: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#Base64Binary";

/// Renders a distinguished name most-specific RDN first (`CN=...,O=...,C=CO`),
/// the form DIAN expects in `X509IssuerName`.
#[inline]
pub fn x509_name_to_string(name: &openssl::x509::X509NameRef) -> String {
    let mut entries = name
        .entries()
        .map(|e| {
            format!(
                "{}={}",
                e.object().nid().short_name().unwrap_or_default(),
                match e.data().to_string() {
                    Ok(d) => escape_dn_value(&d),
                    Err(_) => String::new(),
                }
            )
        })
        .collect::<Vec<_>>();
    entries.reverse();
    entries.join(",")
}

fn escape_dn_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let last = value.chars().count().saturating_sub(1);
    for (i, c) in value.chars().enumerate() {
        match c {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' => {
                out.push('\\');
                out.push(c);
            }
            '#' if i == 0 => out.push_str("\\#"),
            ' ' if i == 0 || i == last => out.push_str("\\ "),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    #[test]
    fn issuer_name_most_specific_first() {
        let mut builder = openssl::x509::X509NameBuilder::new().unwrap();
        builder.append_entry_by_text("C", "CO").unwrap();
        builder.append_entry_by_text("O", "Certicamara S.A.").unwrap();
        builder.append_entry_by_text("CN", "AC SUB, CERTICAMARA").unwrap();
        let name = builder.build();

        assert_eq!(
            super::x509_name_to_string(&name),
            "CN=AC SUB\\, CERTICAMARA,O=Certicamara S.A.,C=CO"
        );
    }
}
