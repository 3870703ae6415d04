//! WS-Security header for DIAN's SOAP 1.2 web service.
//!
//! The header carries a timestamp, the client certificate as a binary
//! security token, and an XML-DSig signature whose single reference is the
//! `wsa:To` addressing header.

use chrono::{DateTime, Duration, Utc};
use log::debug;

use crate::c14n::{canonicalize, escape_attr, escape_text, C14nMode};
use crate::config::{SecurityHeaderConfig, ServiceConfig};
use crate::digest::{digest, DigestAlgorithm};
use crate::error::Result;
use crate::keys::KeyMaterial;
use crate::proto::ds::{Algorithm, Reference, SignedInfo};
use crate::proto::WriteXml;
use crate::soap::Action;
use crate::{NS_DS, NS_SOAP, NS_WCF, NS_WSA, NS_WSSE, NS_WSU, WSS_BASE64_BINARY, WSS_X509V3};

/// Prefixes rendered on the canonical `wsa:To`.
const TO_PREFIXES: [&str; 2] = ["soap", "wcf"];
/// Prefixes rendered on the canonical `ds:SignedInfo`.
const SIGNED_INFO_PREFIXES: [&str; 3] = ["wsa", "soap", "wcf"];

/// Ids of the header parts, all derived from one random token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderIds {
    pub timestamp: String,
    pub binary_security_token: String,
    pub signature: String,
    pub key_info: String,
    pub security_token_reference: String,
    pub to: String,
}

impl HeaderIds {
    pub fn fresh() -> Self {
        Self::from_token(&unique_token())
    }

    pub fn from_token(token: &str) -> Self {
        HeaderIds {
            timestamp: format!("TS-{}", token),
            binary_security_token: format!("X509-{}", token),
            signature: format!("SIG-{}", token),
            key_info: format!("KI-{}", token),
            security_token_reference: format!("STR-{}", token),
            to: format!("ID-{}", token),
        }
    }
}

/// First 16 hex digits of SHA-256 over the current time in nanoseconds and 8
/// random bytes.
fn unique_token() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let mut nonce = [0u8; 8];
    let nonce = match openssl::rand::rand_bytes(&mut nonce) {
        Ok(()) => hex::encode(nonce),
        Err(_) => String::new(),
    };
    let hash = openssl::sha::sha256(format!("{}{}", nanos, nonce).as_bytes());
    hex::encode(hash)[..16].to_string()
}

/// A signed security header together with the addressing headers it covers.
#[derive(Debug, Clone)]
pub struct SecurityHeader {
    pub ids: HeaderIds,
    pub created: String,
    pub expires: String,
    pub to: String,
    pub action: String,
    pub digest_value: String,
    pub signature_value: String,
    security: String,
}

impl SecurityHeader {
    /// The `wsse:Security` element.
    pub fn security_xml(&self) -> &str {
        &self.security
    }

    pub fn action_xml(&self) -> String {
        format!("<wsa:Action>{}</wsa:Action>", escape_text(&self.action))
    }

    /// The `wsa:To` element as placed in the envelope header, where `soap`,
    /// `wcf` and `wsa` are declared by its ancestors.
    pub fn to_xml(&self) -> String {
        format!(
            r#"<wsa:To xmlns:wsu="{}" wsu:Id="{}">{}</wsa:To>"#,
            NS_WSU,
            escape_attr(&self.ids.to),
            escape_text(&self.to)
        )
    }

    /// Everything that goes inside `soap:Header`.
    pub fn header_content(&self) -> String {
        format!("{}{}{}", self.security, self.action_xml(), self.to_xml())
    }
}

/// `wsa:To` with every namespace its canonical form renders declared on the
/// element itself.
pub fn to_fragment(id: &str, url: &str) -> String {
    format!(
        r#"<wsa:To xmlns:soap="{}" xmlns:wcf="{}" xmlns:wsa="{}" xmlns:wsu="{}" wsu:Id="{}">{}</wsa:To>"#,
        NS_SOAP,
        NS_WCF,
        NS_WSA,
        NS_WSU,
        escape_attr(id),
        escape_text(url)
    )
}

#[derive(Debug, Clone)]
pub struct SecurityHeaderSigner {
    keys: KeyMaterial,
    config: SecurityHeaderConfig,
}

impl SecurityHeaderSigner {
    /// Only the leaf certificate of `keys` is ever presented.
    pub fn new(keys: &KeyMaterial, config: SecurityHeaderConfig) -> Self {
        SecurityHeaderSigner {
            keys: keys.client_only(),
            config,
        }
    }

    pub fn generate(&self, to: &str, action: &str) -> Result<SecurityHeader> {
        self.generate_with(to, action, Utc::now(), HeaderIds::fresh())
    }

    pub fn generate_for(&self, service: &ServiceConfig, action: Action) -> Result<SecurityHeader> {
        self.generate(service.url(), action.uri())
    }

    pub fn generate_with(&self, to: &str, action: &str, now: DateTime<Utc>, ids: HeaderIds) -> Result<SecurityHeader> {
        let created = now.format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let expires = (now + Duration::seconds(self.config.timestamp_ttl_secs))
            .format("%Y-%m-%dT%H:%M:%SZ")
            .to_string();

        let to_c14n = canonicalize(to_fragment(&ids.to, to).as_bytes(), &C14nMode::exclusive(TO_PREFIXES))
            .map_err(|e| e.within("wsa:To"))?;
        let digest_value = digest(&to_c14n, DigestAlgorithm::Sha256)?;
        debug!("wsa:To digest {}", digest_value);

        let signed_info = SignedInfo {
            namespaces: vec![
                ("soap".to_string(), NS_SOAP.to_string()),
                ("wcf".to_string(), NS_WCF.to_string()),
                ("wsa".to_string(), NS_WSA.to_string()),
            ],
            canonicalization_method: Algorithm::with_prefixes(
                crate::CANONICAL_EXCLUSIVE_1_0,
                &SIGNED_INFO_PREFIXES.join(" "),
            ),
            signature_method: crate::SIGNATURE_RSA_SHA256.to_string(),
            references: vec![Reference {
                id: None,
                uri: format!("#{}", ids.to),
                ref_type: None,
                transforms: vec![Algorithm::with_prefixes(
                    crate::CANONICAL_EXCLUSIVE_1_0,
                    &TO_PREFIXES.join(" "),
                )],
                digest_method: crate::DIGEST_SHA256.to_string(),
                digest_value: digest_value.clone(),
            }],
        };
        let signed_info_c14n = canonicalize(
            signed_info.to_xml()?.as_bytes(),
            &C14nMode::exclusive(SIGNED_INFO_PREFIXES),
        )
        .map_err(|e| e.within("SignedInfo"))?;
        let signature_value = base64::encode(self.keys.sign(&signed_info_c14n, DigestAlgorithm::Sha256)?);

        let mut security = format!(
            concat!(
                r#"<wsse:Security xmlns:wsse="{wsse}" xmlns:wsu="{wsu}">"#,
                r#"<wsu:Timestamp wsu:Id="{ts}"><wsu:Created>{created}</wsu:Created><wsu:Expires>{expires}</wsu:Expires></wsu:Timestamp>"#,
                r#"<wsse:BinarySecurityToken EncodingType="{b64}" ValueType="{x509}" wsu:Id="{bst}">{cert}</wsse:BinarySecurityToken>"#,
                r#"<ds:Signature xmlns:ds="{ds}" Id="{sig}">"#,
            ),
            wsse = NS_WSSE,
            wsu = NS_WSU,
            ts = ids.timestamp,
            created = created,
            expires = expires,
            b64 = WSS_BASE64_BINARY,
            x509 = WSS_X509V3,
            bst = ids.binary_security_token,
            cert = self.keys.certificate_base64()?,
            ds = NS_DS,
            sig = ids.signature,
        );
        // canonical output is always UTF-8
        security.push_str(&String::from_utf8_lossy(&signed_info_c14n));
        security.push_str(&format!(
            concat!(
                r#"<ds:SignatureValue>{value}</ds:SignatureValue>"#,
                r#"<ds:KeyInfo Id="{ki}"><wsse:SecurityTokenReference wsu:Id="{str_id}">"#,
                r##"<wsse:Reference URI="#{bst}" ValueType="{x509}"/>"##,
                r#"</wsse:SecurityTokenReference></ds:KeyInfo></ds:Signature></wsse:Security>"#,
            ),
            value = signature_value,
            ki = ids.key_info,
            str_id = ids.security_token_reference,
            bst = ids.binary_security_token,
            x509 = WSS_X509V3,
        ));

        Ok(SecurityHeader {
            ids,
            created,
            expires,
            to: to.to_string(),
            action: action.to_string(),
            digest_value,
            signature_value,
            security,
        })
    }
}
