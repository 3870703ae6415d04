//! Credentials and documents shared by the unit tests.

use std::process::Command;

use once_cell::sync::Lazy;
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::stack::Stack;
use openssl::x509::extension::{BasicConstraints, KeyUsage};
use openssl::x509::{X509Builder, X509Name, X509NameBuilder, X509};

use crate::config::OpenSslConfig;
use crate::keys::KeyMaterial;

pub const UNSIGNED_INVOICE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Invoice xmlns="urn:oasis:names:specification:ubl:schema:xsd:Invoice-2" xmlns:cac="urn:oasis:names:specification:ubl:schema:xsd:CommonAggregateComponents-2" xmlns:cbc="urn:oasis:names:specification:ubl:schema:xsd:CommonBasicComponents-2" xmlns:ext="urn:oasis:names:specification:ubl:schema:xsd:CommonExtensionComponents-2"><cbc:ID>F001</cbc:ID><ext:UBLExtensions><ext:UBLExtension><ext:ExtensionContent></ext:ExtensionContent></ext:UBLExtension></ext:UBLExtensions><cac:AccountingSupplierParty><cac:Party><cbc:Name languageID="es" schemeName="31">Facturador &amp; Cia S.A.S.</cbc:Name></cac:Party></cac:AccountingSupplierParty></Invoice>"#;

pub fn init_logging() {
    let _ = pretty_env_logger::try_init();
}

fn name(common_name: &str) -> X509Name {
    let mut builder = X509NameBuilder::new().unwrap();
    builder.append_entry_by_nid(Nid::COUNTRYNAME, "CO").unwrap();
    builder.append_entry_by_nid(Nid::ORGANIZATIONNAME, "Facturador SAS").unwrap();
    builder.append_entry_by_nid(Nid::COMMONNAME, common_name).unwrap();
    builder.build()
}

fn rsa_key() -> PKey<Private> {
    PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap()
}

fn certificate(
    subject: &X509Name,
    issuer: &X509Name,
    key: &PKey<Private>,
    signing_key: &PKey<Private>,
    ca: bool,
) -> X509 {
    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    let mut serial = BigNum::new().unwrap();
    serial.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();
    builder.set_serial_number(&serial.to_asn1_integer().unwrap()).unwrap();
    builder.set_subject_name(subject).unwrap();
    builder.set_issuer_name(issuer).unwrap();
    builder.set_pubkey(key).unwrap();
    builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
    builder.set_not_after(&Asn1Time::days_from_now(365).unwrap()).unwrap();
    if ca {
        builder.append_extension(BasicConstraints::new().critical().ca().build().unwrap()).unwrap();
        builder
            .append_extension(KeyUsage::new().critical().key_cert_sign().crl_sign().build().unwrap())
            .unwrap();
    } else {
        builder
            .append_extension(KeyUsage::new().critical().digital_signature().non_repudiation().build().unwrap())
            .unwrap();
    }
    builder.sign(signing_key, MessageDigest::sha256()).unwrap();
    builder.build()
}

/// A CA and a leaf it issued.
pub struct ChainFixture {
    pub ca: X509,
    pub ca_key: PKey<Private>,
    pub leaf: X509,
    pub leaf_key: PKey<Private>,
}

impl ChainFixture {
    pub fn pkcs12(&self, password: &str) -> Vec<u8> {
        let mut ca = Stack::new().unwrap();
        ca.push(self.ca.clone()).unwrap();
        Pkcs12::builder()
            .name("firma")
            .pkey(&self.leaf_key)
            .cert(&self.leaf)
            .ca(ca)
            .build2(password)
            .unwrap()
            .to_der()
            .unwrap()
    }

    pub fn key_material(&self) -> KeyMaterial {
        let mut pem = self.leaf_key.private_key_to_pem_pkcs8().unwrap();
        pem.extend(self.leaf.to_pem().unwrap());
        pem.extend(self.ca.to_pem().unwrap());
        KeyMaterial::from_pem(&pem).unwrap()
    }
}

static CHAIN: Lazy<ChainFixture> = Lazy::new(|| {
    let ca_key = rsa_key();
    let ca_name = name("AC Pruebas");
    let ca = certificate(&ca_name, &ca_name, &ca_key, &ca_key, true);
    let leaf_key = rsa_key();
    let leaf = certificate(&name("Firmante Pruebas"), &ca_name, &leaf_key, &ca_key, false);
    ChainFixture {
        ca,
        ca_key,
        leaf,
        leaf_key,
    }
});

pub fn chain_fixture() -> &'static ChainFixture {
    &CHAIN
}

pub fn key_material() -> KeyMaterial {
    CHAIN.key_material()
}

pub fn ec_self_signed() -> (PKey<Private>, X509) {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();
    let subject = name("Firmante EC");
    let cert = certificate(&subject, &subject, &key, &key, false);
    (key, cert)
}

/// The `openssl` binary on PATH, if there is one. The fixtures use modern
/// encryption, so `-legacy` is left off.
pub fn openssl_cli() -> Option<OpenSslConfig> {
    let output = Command::new("openssl").arg("version").output().ok()?;
    let version = String::from_utf8_lossy(&output.stdout);
    if output.status.success() && version.starts_with("OpenSSL") {
        Some(OpenSslConfig {
            legacy: false,
            ..OpenSslConfig::default()
        })
    } else {
        None
    }
}
