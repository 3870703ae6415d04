//! Verification of signatures produced by this crate.
//!
//! `verify_xades` checks an enveloped XAdES signature inside a UBL document,
//! `verify_security_header` checks the WS-Security signature of a SOAP
//! envelope. Both recompute every reference digest and then verify the RSA
//! signature over `ds:SignedInfo`.

use openssl::x509::X509;
use xml::reader::XmlEvent;

use crate::c14n::{canonicalize, canonicalize_events, find_element_by_id, parse_events, C14nMode};
use crate::digest::{digest, DigestAlgorithm};
use crate::error::{Error, Result};
use crate::scan;
use crate::NS_DS;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MethodInfo {
    pub algorithm: String,
    pub inclusive_prefixes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReferenceInfo {
    pub uri: String,
    pub transforms: Vec<MethodInfo>,
    pub digest_method: String,
    pub digest_value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct SignedInfoInfo {
    pub canonicalization: Option<MethodInfo>,
    pub signature_method: String,
    pub references: Vec<ReferenceInfo>,
}

/// What a successful verification established.
#[derive(Debug, Clone)]
pub struct VerifiedSignature {
    /// URIs of the references, in signature order.
    pub references: Vec<String>,
    pub certificate: X509,
}

fn is_ds(name: &xml::name::OwnedName, local_name: &str) -> bool {
    name.namespace.as_deref() == Some(NS_DS) && name.local_name == local_name
}

fn attribute<'a>(attributes: &'a [xml::attribute::OwnedAttribute], local_name: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|a| a.name.namespace.is_none() && a.name.local_name == local_name)
        .map(|a| a.value.as_str())
}

fn text_of(events: &[XmlEvent], start: usize) -> String {
    let mut text = String::new();
    let mut depth = 0usize;
    for event in &events[start..] {
        match event {
            XmlEvent::StartElement { .. } => depth += 1,
            XmlEvent::EndElement { .. } => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            XmlEvent::Characters(s) | XmlEvent::CData(s) | XmlEvent::Whitespace(s) => text.push_str(s),
            _ => {}
        }
    }
    text
}

/// Reads the structure of the `ds:SignedInfo` whose start element is at
/// `start`.
pub(crate) fn read_signed_info(events: &[XmlEvent], start: usize) -> Result<SignedInfoInfo> {
    let mut info = SignedInfoInfo::default();
    let mut depth = 0usize;
    let mut pending_method: Option<(bool, MethodInfo)> = None;

    for (i, event) in events.iter().enumerate().skip(start) {
        match event {
            XmlEvent::StartElement { name, attributes, .. } => {
                depth += 1;
                let algorithm = || attribute(attributes, "Algorithm").unwrap_or_default().to_string();
                if is_ds(name, "CanonicalizationMethod") || is_ds(name, "Transform") {
                    pending_method = Some((
                        is_ds(name, "Transform"),
                        MethodInfo {
                            algorithm: algorithm(),
                            inclusive_prefixes: None,
                        },
                    ));
                } else if name.namespace.as_deref() == Some(crate::NS_EXC_C14N) && name.local_name == "InclusiveNamespaces" {
                    if let Some((_, method)) = pending_method.as_mut() {
                        method.inclusive_prefixes = attribute(attributes, "PrefixList").map(str::to_string);
                    }
                } else if is_ds(name, "SignatureMethod") {
                    info.signature_method = algorithm();
                } else if is_ds(name, "Reference") {
                    info.references.push(ReferenceInfo {
                        uri: attribute(attributes, "URI").unwrap_or_default().to_string(),
                        transforms: vec![],
                        digest_method: String::new(),
                        digest_value: String::new(),
                    });
                } else if is_ds(name, "DigestMethod") {
                    if let Some(reference) = info.references.last_mut() {
                        reference.digest_method = algorithm();
                    }
                } else if is_ds(name, "DigestValue") {
                    if let Some(reference) = info.references.last_mut() {
                        reference.digest_value = text_of(events, i).trim().to_string();
                    }
                }
            }
            XmlEvent::EndElement { name } => {
                if is_ds(name, "CanonicalizationMethod") || is_ds(name, "Transform") {
                    match pending_method.take() {
                        Some((true, method)) => {
                            if let Some(reference) = info.references.last_mut() {
                                reference.transforms.push(method);
                            }
                        }
                        Some((false, method)) => info.canonicalization = Some(method),
                        None => {}
                    }
                }
                depth -= 1;
                if depth == 0 {
                    return Ok(info);
                }
            }
            _ => {}
        }
    }
    Err(Error::Parse("unterminated ds:SignedInfo".to_string()))
}

fn check_digest(reference: &ReferenceInfo, canonical: &[u8]) -> Result<()> {
    let algorithm = DigestAlgorithm::from_uri(&reference.digest_method)
        .ok_or_else(|| Error::Digest(format!("unsupported digest method {:?}", reference.digest_method)))?;
    if digest(canonical, algorithm)? != reference.digest_value {
        return Err(Error::DigestMismatch(reference.uri.clone()));
    }
    Ok(())
}

fn check_signature(certificate: &X509, signature_method: &str, signed_info: &[u8], signature_value: &str) -> Result<()> {
    let algorithm = DigestAlgorithm::from_signature_uri(signature_method)
        .ok_or_else(|| Error::SignatureInvalid(format!("unsupported signature method {:?}", signature_method)))?;
    let signature = decode_base64(signature_value)?;
    let public_key = certificate
        .public_key()
        .map_err(|e| Error::SignatureInvalid(e.to_string()))?;
    let mut verifier = openssl::sign::Verifier::new(algorithm.message_digest(), &public_key)
        .map_err(|e| Error::SignatureInvalid(e.to_string()))?;
    verifier
        .update(signed_info)
        .map_err(|e| Error::SignatureInvalid(e.to_string()))?;
    match verifier.verify(&signature) {
        Ok(true) => Ok(()),
        Ok(false) => Err(Error::SignatureInvalid("signature does not match ds:SignedInfo".to_string())),
        Err(e) => Err(Error::SignatureInvalid(e.to_string())),
    }
}

fn decode_base64(value: &str) -> Result<Vec<u8>> {
    let compact = value.split_whitespace().collect::<String>();
    base64::decode(&compact).map_err(|e| Error::SignatureInvalid(format!("invalid base64: {}", e)))
}

fn certificate_from_base64(value: &str) -> Result<X509> {
    X509::from_der(&decode_base64(value)?)
        .map_err(|e| Error::SignatureInvalid(format!("invalid certificate: {}", e)))
}

fn first_element<F>(events: &[XmlEvent], from: usize, matches: F) -> Option<usize>
where
    F: Fn(&xml::name::OwnedName) -> bool,
{
    events
        .iter()
        .enumerate()
        .skip(from)
        .find(|(_, e)| matches!(e, XmlEvent::StartElement { name, .. } if matches(name)))
        .map(|(i, _)| i)
}

/// Verifies the first `ds:Signature` of a signed UBL document.
///
/// The enveloped reference is checked against the document with the whole
/// extension entry holding the signature removed. `#Id` references are
/// checked against the referenced element's raw bytes, canonicalised on their
/// own, which is how they were digested when signing.
pub fn verify_xades(signed: &[u8]) -> Result<VerifiedSignature> {
    let signature = scan::find_by_qname(signed, "ds:Signature")?
        .ok_or_else(|| Error::SignatureAssembly("no ds:Signature element".to_string()))?;
    let signature_bytes = &signed[signature.outer.clone()];

    let signed_info_span = scan::find_by_qname(signature_bytes, "ds:SignedInfo")?
        .ok_or_else(|| Error::SignatureAssembly("no ds:SignedInfo element".to_string()))?;
    let signed_info = &signature_bytes[signed_info_span.outer];

    let mut wrapped = format!(r#"<ds:Signature xmlns:ds="{}">"#, NS_DS).into_bytes();
    wrapped.extend_from_slice(signed_info);
    wrapped.extend_from_slice(b"</ds:Signature>");
    let events = parse_events(&wrapped)?;
    let start = first_element(&events, 0, |n| is_ds(n, "SignedInfo"))
        .ok_or_else(|| Error::SignatureAssembly("no ds:SignedInfo element".to_string()))?;
    let info = read_signed_info(&events, start)?;

    for reference in &info.references {
        let canonical = if reference.uri.is_empty() {
            let entry = scan::find_all(signed, |t| t.local_name().as_ref() == b"UBLExtension")?
                .into_iter()
                .filter(|s| s.outer.start <= signature.outer.start && signature.outer.end <= s.outer.end)
                .last()
                .ok_or_else(|| Error::SignatureAssembly("signature is not inside an extension entry".to_string()))?;
            let mut unsigned = signed[..entry.outer.start].to_vec();
            unsigned.extend_from_slice(&signed[entry.outer.end..]);
            canonicalize(&unsigned, &C14nMode::Inclusive)?
        } else if let Some(id) = reference.uri.strip_prefix('#') {
            let target = scan::find_by_id(signed, id)?
                .ok_or_else(|| Error::SignatureAssembly(format!("no element with Id {:?}", id)))?;
            canonicalize(&signed[target.outer], &C14nMode::Inclusive)?
        } else {
            return Err(Error::SignatureAssembly(format!("unsupported reference URI {:?}", reference.uri)));
        };
        check_digest(reference, &canonical)?;
    }

    let value = scan::find_by_qname(signature_bytes, "ds:SignatureValue")?
        .ok_or_else(|| Error::SignatureAssembly("no ds:SignatureValue element".to_string()))?;
    let certificate = scan::find_by_qname(signature_bytes, "ds:X509Certificate")?
        .ok_or_else(|| Error::SignatureAssembly("no ds:X509Certificate element".to_string()))?;
    let certificate = certificate_from_base64(&String::from_utf8_lossy(&signature_bytes[certificate.inner]))?;

    check_signature(
        &certificate,
        &info.signature_method,
        signed_info,
        &String::from_utf8_lossy(&signature_bytes[value.inner]),
    )?;

    Ok(VerifiedSignature {
        references: info.references.into_iter().map(|r| r.uri).collect(),
        certificate,
    })
}

/// Verifies the WS-Security signature of a SOAP envelope. Every element is
/// canonicalised in place, with the algorithms and prefix lists the signature
/// declares.
pub fn verify_security_header(envelope: &[u8]) -> Result<VerifiedSignature> {
    let events = parse_events(envelope)?;
    let signed_info_at = first_element(&events, 0, |n| is_ds(n, "SignedInfo"))
        .ok_or_else(|| Error::SignatureAssembly("no ds:SignedInfo element".to_string()))?;
    let info = read_signed_info(&events, signed_info_at)?;

    let method = info
        .canonicalization
        .as_ref()
        .ok_or_else(|| Error::SignatureAssembly("no ds:CanonicalizationMethod".to_string()))?;
    let mode = C14nMode::from_uri(&method.algorithm, method.inclusive_prefixes.as_deref())
        .ok_or_else(|| Error::SignatureAssembly(format!("unsupported canonicalization {:?}", method.algorithm)))?;
    let signed_info = canonicalize_events(&events, &mode, signed_info_at)?;

    for reference in &info.references {
        let id = reference
            .uri
            .strip_prefix('#')
            .ok_or_else(|| Error::SignatureAssembly(format!("unsupported reference URI {:?}", reference.uri)))?;
        let target = find_element_by_id(&events, id)
            .ok_or_else(|| Error::SignatureAssembly(format!("no element with Id {:?}", id)))?;
        let mode = match reference.transforms.last() {
            Some(t) => C14nMode::from_uri(&t.algorithm, t.inclusive_prefixes.as_deref())
                .ok_or_else(|| Error::SignatureAssembly(format!("unsupported transform {:?}", t.algorithm)))?,
            None => C14nMode::Inclusive,
        };
        check_digest(reference, &canonicalize_events(&events, &mode, target)?)?;
    }

    let value_at = first_element(&events, signed_info_at, |n| is_ds(n, "SignatureValue"))
        .ok_or_else(|| Error::SignatureAssembly("no ds:SignatureValue element".to_string()))?;
    let token_at = first_element(&events, 0, |n| {
        n.namespace.as_deref() == Some(crate::NS_WSSE) && n.local_name == "BinarySecurityToken"
    })
    .ok_or_else(|| Error::SignatureAssembly("no wsse:BinarySecurityToken element".to_string()))?;
    let certificate = certificate_from_base64(&text_of(&events, token_at))?;

    check_signature(&certificate, &info.signature_method, &signed_info, &text_of(&events, value_at))?;

    Ok(VerifiedSignature {
        references: info.references.into_iter().map(|r| r.uri).collect(),
        certificate,
    })
}
