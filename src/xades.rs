//! Enveloped XAdES-BES signatures over UBL documents.
//!
//! The signature covers three references: the document itself (enveloped
//! transform), the `ds:KeyInfo` and the `xades:SignedProperties`. The signed
//! `ds:SignedInfo` is embedded as the exact canonical bytes that went into the
//! RSA signature.

use chrono::{DateTime, FixedOffset, Local};
use log::debug;

use crate::c14n::{canonicalize, C14nMode};
use crate::config::SignerConfig;
use crate::digest::{digest, DigestAlgorithm};
use crate::error::{Error, Result};
use crate::keys::KeyMaterial;
use crate::normalize::normalize_attribute_order;
use crate::proto::ds::{Algorithm, KeyInfo, Reference, SignedInfo};
use crate::proto::xades::SignedProperties;
use crate::proto::WriteXml;
use crate::scan;

/// Ids assigned to the parts of one signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureIds {
    pub signature: String,
    pub reference: String,
    pub signature_value: String,
    pub key_info: String,
    pub signed_properties: String,
}

impl SignatureIds {
    pub fn fresh() -> Self {
        Self::from_base(&format!("xmldsig-{}", uuid::Uuid::new_v4()))
    }

    pub fn from_base(base: &str) -> Self {
        SignatureIds {
            signature: base.to_string(),
            reference: format!("{}-ref0", base),
            signature_value: format!("{}-sigvalue", base),
            key_info: format!("{}-keyinfo", base),
            signed_properties: format!("{}-signedprops", base),
        }
    }
}

/// Signs UBL documents with one set of credentials. Holds no mutable state,
/// so a single signer may be shared across threads.
#[derive(Debug, Clone)]
pub struct XadesSigner {
    keys: KeyMaterial,
    config: SignerConfig,
}

impl XadesSigner {
    pub fn new(keys: KeyMaterial, config: SignerConfig) -> Self {
        XadesSigner { keys, config }
    }

    pub fn keys(&self) -> &KeyMaterial {
        &self.keys
    }

    pub fn sign(&self, unsigned: &[u8]) -> Result<Vec<u8>> {
        self.sign_with(unsigned, Local::now().fixed_offset(), &SignatureIds::fresh())
    }

    /// Signs with a caller-chosen signing time and ids.
    pub fn sign_with(
        &self,
        unsigned: &[u8],
        signing_time: DateTime<FixedOffset>,
        ids: &SignatureIds,
    ) -> Result<Vec<u8>> {
        let document = normalize_attribute_order(unsigned).map_err(|e| e.within("document"))?;
        let document_c14n =
            canonicalize(&document, &C14nMode::Inclusive).map_err(|e| e.within("document"))?;
        let document_digest = digest(&document_c14n, DigestAlgorithm::Sha256)?;
        debug!("document digest {}", document_digest);

        let key_info = KeyInfo {
            id: ids.key_info.clone(),
            certificate: self.keys.certificate_base64()?,
        }
        .to_xml()?;
        let signed_properties = self.signed_properties(ids, signing_time)?.to_xml()?;

        let key_info_digest = digest(
            &canonicalize(key_info.as_bytes(), &C14nMode::Inclusive).map_err(|e| e.within("KeyInfo"))?,
            DigestAlgorithm::Sha256,
        )?;
        let signed_properties_digest = digest(
            &canonicalize(signed_properties.as_bytes(), &C14nMode::Inclusive)
                .map_err(|e| e.within("SignedProperties"))?,
            DigestAlgorithm::Sha256,
        )?;

        let signed_info = SignedInfo {
            namespaces: vec![],
            canonicalization_method: Algorithm::new(crate::CANONICAL_1_0),
            signature_method: crate::SIGNATURE_RSA_SHA256.to_string(),
            references: vec![
                Reference {
                    id: Some(ids.reference.clone()),
                    uri: String::new(),
                    ref_type: None,
                    transforms: vec![Algorithm::new(crate::TRANSFORM_ENVELOPED_SIGNATURE)],
                    digest_method: crate::DIGEST_SHA256.to_string(),
                    digest_value: document_digest,
                },
                Reference {
                    id: None,
                    uri: format!("#{}", ids.key_info),
                    ref_type: None,
                    transforms: vec![],
                    digest_method: crate::DIGEST_SHA256.to_string(),
                    digest_value: key_info_digest,
                },
                Reference {
                    id: None,
                    uri: format!("#{}", ids.signed_properties),
                    ref_type: Some(crate::XADES_SIGNED_PROPERTIES_TYPE.to_string()),
                    transforms: vec![],
                    digest_method: crate::DIGEST_SHA256.to_string(),
                    digest_value: signed_properties_digest,
                },
            ],
        };
        let signed_info_c14n = canonical_signed_info(&signed_info)?;

        let signature_value = base64::encode(self.keys.sign(&signed_info_c14n, DigestAlgorithm::Sha256)?);

        let mut signature = Vec::with_capacity(signed_info_c14n.len() + key_info.len() + signed_properties.len() + 1024);
        signature.extend_from_slice(
            format!(r#"<ds:Signature xmlns:ds="{}" Id="{}">"#, crate::NS_DS, ids.signature).as_bytes(),
        );
        signature.extend_from_slice(&signed_info_c14n);
        signature.extend_from_slice(
            format!(
                r#"<ds:SignatureValue Id="{}">{}</ds:SignatureValue>"#,
                ids.signature_value, signature_value
            )
            .as_bytes(),
        );
        signature.extend_from_slice(key_info.as_bytes());
        signature.extend_from_slice(
            format!(
                r##"<ds:Object><xades:QualifyingProperties xmlns:xades="{}" Target="#{}">"##,
                crate::NS_XADES,
                ids.signature
            )
            .as_bytes(),
        );
        signature.extend_from_slice(signed_properties.as_bytes());
        signature.extend_from_slice(b"</xades:QualifyingProperties></ds:Object></ds:Signature>");

        splice_extension(&document, &self.config.extension_container, &signature)
    }

    fn signed_properties(&self, ids: &SignatureIds, signing_time: DateTime<FixedOffset>) -> Result<SignedProperties> {
        let certificate = self.keys.certificate();
        let serial_number = certificate
            .serial_number()
            .to_bn()
            .and_then(|bn| bn.to_dec_str())
            .map_err(|e| Error::SignatureAssembly(format!("certificate serial: {}", e)))?
            .to_string();

        Ok(SignedProperties {
            id: ids.signed_properties.clone(),
            signing_time: signing_time.format("%Y-%m-%dT%H:%M:%S%:z").to_string(),
            cert_digest: digest(&self.keys.certificate_der()?, DigestAlgorithm::Sha256)?,
            issuer_name: crate::x509_name_to_string(certificate.issuer_name()),
            serial_number,
            policy_identifier: self.config.policy_identifier.clone(),
            policy_hash: self.config.policy_hash.clone(),
            claimed_role: self.config.claimed_role.clone(),
        })
    }
}

/// Canonical bytes of `ds:SignedInfo` as it will sit inside `ds:Signature`.
/// The fragment is canonicalised inside a bare `ds:Signature` wrapper so the
/// `ds` declaration is inherited rather than rendered on `ds:SignedInfo`.
fn canonical_signed_info(signed_info: &SignedInfo) -> Result<Vec<u8>> {
    let serialized = normalize_attribute_order(signed_info.to_xml()?.as_bytes())
        .map_err(|e| e.within("SignedInfo"))?;

    let mut wrapped = format!(r#"<ds:Signature xmlns:ds="{}">"#, crate::NS_DS).into_bytes();
    wrapped.extend_from_slice(&serialized);
    wrapped.extend_from_slice(b"</ds:Signature>");

    let canonical = canonicalize(&wrapped, &C14nMode::Inclusive).map_err(|e| e.within("SignedInfo"))?;
    let span = scan::find_by_qname(&canonical, "ds:SignedInfo")?
        .ok_or_else(|| Error::SignatureAssembly("canonical ds:SignedInfo not found".to_string()))?;
    Ok(canonical[span.outer].to_vec())
}

/// Inserts `signature` as a new extension entry just before the end tag of
/// `container`, reusing the container's prefix.
fn splice_extension(document: &[u8], container: &str, signature: &[u8]) -> Result<Vec<u8>> {
    let at = scan::find_end_tag(document, container)
        .map_err(|e| e.within("document"))?
        .ok_or_else(|| Error::SignatureAssembly(format!("extension container {} not found", container)))?;
    let prefix = container
        .split_once(':')
        .map(|(p, _)| format!("{}:", p))
        .unwrap_or_default();

    let mut signed = Vec::with_capacity(document.len() + signature.len() + 128);
    signed.extend_from_slice(&document[..at]);
    signed.extend_from_slice(format!("<{0}UBLExtension><{0}ExtensionContent>", prefix).as_bytes());
    signed.extend_from_slice(signature);
    signed.extend_from_slice(format!("</{0}ExtensionContent></{0}UBLExtension>", prefix).as_bytes());
    signed.extend_from_slice(&document[at..]);
    Ok(signed)
}
