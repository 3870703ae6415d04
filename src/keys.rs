use std::fmt;
use std::fs;
use std::path::Path;

use log::{debug, warn};
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{Id, PKey, PKeyRef, Private};
use openssl::x509::{X509Ref, X509VerifyResult, X509};

use crate::digest::DigestAlgorithm;
use crate::error::{Error, LoadStage, Result};
use crate::legacy::{cached_conversion, LegacyCredentialConverter, OpenSslCli, PemScope};

/// Where signing credentials come from.
#[derive(Clone, Copy)]
pub enum CredentialSource<'a> {
    Pkcs12 { der: &'a [u8], password: &'a str },
    /// Combined PEM holding the private key and certificates in any order.
    Pem(&'a [u8]),
    /// Like `Pem`, but only the leaf certificate is kept.
    ClientPem(&'a [u8]),
}

/// An RSA private key with its certificate and chain, leaf first.
///
/// Immutable once loaded, so it can be shared between threads.
#[derive(Clone)]
pub struct KeyMaterial {
    private_key: PKey<Private>,
    certificate: X509,
    chain: Vec<X509>,
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("subject", &crate::x509_name_to_string(self.certificate.subject_name()))
            .field("chain_len", &self.chain.len())
            .finish_non_exhaustive()
    }
}

impl KeyMaterial {
    pub fn load(source: CredentialSource<'_>) -> Result<Self> {
        match source {
            CredentialSource::Pkcs12 { der, password } => Self::from_pkcs12(der, password),
            CredentialSource::Pem(pem) => Self::from_pem(pem),
            CredentialSource::ClientPem(pem) => Ok(Self::from_pem(pem)?.client_only()),
        }
    }

    pub fn from_pkcs12(der: &[u8], password: &str) -> Result<Self> {
        let parsed = Pkcs12::from_der(der)
            .and_then(|p| p.parse2(password))
            .map_err(|e| Error::load(LoadStage::Pkcs12, e))?;
        let private_key = parsed
            .pkey
            .ok_or_else(|| Error::load(LoadStage::Pkcs12, "container holds no private key"))?;
        let certificate = parsed
            .cert
            .ok_or_else(|| Error::load(LoadStage::Pkcs12, "container holds no certificate"))?;

        let mut certificates = vec![certificate];
        if let Some(ca) = parsed.ca {
            certificates.extend(ca);
        }
        Self::from_parts(private_key, certificates)
    }

    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        Self::from_pem_parts(pem, pem)
    }

    /// Certificates and key from separate PEM buffers.
    pub fn from_pem_parts(certificates_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let certificates = X509::stack_from_pem(certificates_pem).map_err(|e| Error::load(LoadStage::Pem, e))?;
        if certificates.is_empty() {
            return Err(Error::load(LoadStage::Pem, "no certificate found"));
        }
        let private_key = PKey::private_key_from_pem(key_pem)
            .map_err(|e| Error::load(LoadStage::Pem, format!("no usable private key: {}", e)))?;
        Self::from_parts(private_key, certificates)
    }

    pub fn from_pkcs12_file<P: AsRef<Path>>(path: P, password: &str) -> Result<Self> {
        Self::from_pkcs12(&read(path.as_ref())?, password)
    }

    pub fn from_pem_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_pem(&read(path.as_ref())?)
    }

    pub fn from_pem_files<P: AsRef<Path>, Q: AsRef<Path>>(certificates: P, key: Q) -> Result<Self> {
        Self::from_pem_parts(&read(certificates.as_ref())?, &read(key.as_ref())?)
    }

    fn from_parts(private_key: PKey<Private>, mut certificates: Vec<X509>) -> Result<Self> {
        if private_key.id() != Id::RSA {
            return Err(Error::UnsupportedKeyType(format!("{:?}", private_key.id())));
        }

        let leaf = certificates
            .iter()
            .position(|c| {
                c.public_key()
                    .map(|k| private_key.public_eq(&k))
                    .unwrap_or(false)
            })
            .ok_or_else(|| Error::load(LoadStage::KeyPair, "no certificate matches the private key"))?;
        let certificate = certificates.remove(leaf);
        let chain = order_chain(certificate.clone(), certificates);
        debug!(
            "loaded credentials for {} with {} certificate(s)",
            crate::x509_name_to_string(certificate.subject_name()),
            chain.len()
        );

        Ok(KeyMaterial {
            private_key,
            certificate,
            chain,
        })
    }

    /// Same key and leaf certificate with the CA certificates dropped.
    pub fn client_only(&self) -> Self {
        KeyMaterial {
            private_key: self.private_key.clone(),
            certificate: self.certificate.clone(),
            chain: vec![self.certificate.clone()],
        }
    }

    pub fn private_key(&self) -> &PKeyRef<Private> {
        &self.private_key
    }

    pub fn certificate(&self) -> &X509Ref {
        &self.certificate
    }

    /// Leaf first, each following certificate the issuer of the one before.
    pub fn chain(&self) -> &[X509] {
        &self.chain
    }

    pub fn certificate_der(&self) -> Result<Vec<u8>> {
        self.certificate
            .to_der()
            .map_err(|e| Error::SignatureAssembly(format!("encoding certificate: {}", e)))
    }

    pub fn certificate_base64(&self) -> Result<String> {
        Ok(base64::encode(self.certificate_der()?))
    }

    /// RSA PKCS#1 v1.5 signature over `data`.
    pub fn sign(&self, data: &[u8], algorithm: DigestAlgorithm) -> Result<Vec<u8>> {
        let mut signer = openssl::sign::Signer::new(algorithm.message_digest(), &self.private_key)
            .map_err(|e| Error::Signing(e.to_string()))?;
        signer.update(data).map_err(|e| Error::Signing(e.to_string()))?;
        signer.sign_to_vec().map_err(|e| Error::Signing(e.to_string()))
    }
}

fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::load(LoadStage::Read, format!("{}: {}", path.display(), e)))
}

fn order_chain(leaf: X509, mut pool: Vec<X509>) -> Vec<X509> {
    let mut chain = vec![leaf];
    loop {
        let next = {
            let current = &chain[chain.len() - 1];
            if current.issued(current) == X509VerifyResult::OK {
                None
            } else {
                pool.iter().position(|c| c.issued(current) == X509VerifyResult::OK)
            }
        };
        match next {
            Some(i) => chain.push(pool.remove(i)),
            None => break,
        }
    }
    // unrelated certificates are kept, after the ordered part
    chain.extend(pool);
    chain
}

/// Loads PKCS#12 files, falling back to a converter when the native decoder
/// rejects the container.
#[derive(Debug, Clone)]
pub struct Pkcs12Loader<C = OpenSslCli> {
    converter: C,
}

impl Default for Pkcs12Loader<OpenSslCli> {
    fn default() -> Self {
        Pkcs12Loader::new(OpenSslCli::default())
    }
}

impl<C: LegacyCredentialConverter> Pkcs12Loader<C> {
    pub fn new(converter: C) -> Self {
        Pkcs12Loader { converter }
    }

    /// Key, leaf certificate and CA chain, as used for XAdES signing.
    pub fn load<P: AsRef<Path>>(&self, path: P, password: &str) -> Result<KeyMaterial> {
        self.load_scoped(path.as_ref(), password, PemScope::FullChain)
    }

    /// Key and leaf certificate only, as presented in the SOAP security header.
    pub fn client_material<P: AsRef<Path>>(&self, path: P, password: &str) -> Result<KeyMaterial> {
        self.load_scoped(path.as_ref(), password, PemScope::ClientOnly)
    }

    fn load_scoped(&self, path: &Path, password: &str, scope: PemScope) -> Result<KeyMaterial> {
        let der = read(path)?;
        let native = match KeyMaterial::from_pkcs12(&der, password) {
            Ok(material) if scope == PemScope::ClientOnly => return Ok(material.client_only()),
            Ok(material) => return Ok(material),
            Err(e @ Error::CertificateLoad { .. }) => e,
            Err(e) => return Err(e),
        };

        warn!(
            "native PKCS#12 decoding of {} failed ({}), trying legacy conversion",
            path.display(),
            native
        );
        self.fallback(path, password, scope)
            .map_err(|fallback| Error::CredentialsExhausted {
                native: Box::new(native),
                fallback: Box::new(fallback),
            })
    }

    fn fallback(&self, path: &Path, password: &str, scope: PemScope) -> Result<KeyMaterial> {
        let pem = read(&cached_conversion(&self.converter, path, password, scope)?)?;
        match scope {
            PemScope::FullChain => KeyMaterial::load(CredentialSource::Pem(&pem)),
            PemScope::ClientOnly => KeyMaterial::load(CredentialSource::ClientPem(&pem)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::legacy::cache_path;
    use crate::test_support;
    use tempfile::TempDir;

    #[test]
    fn pkcs12_with_chain() {
        let fixture = test_support::chain_fixture();
        let material = KeyMaterial::load(CredentialSource::Pkcs12 {
            der: &fixture.pkcs12("secreto"),
            password: "secreto",
        })
        .unwrap();

        assert_eq!(material.chain().len(), 2);
        assert_eq!(material.chain()[0].to_der().unwrap(), fixture.leaf.to_der().unwrap());
        assert_eq!(material.chain()[1].to_der().unwrap(), fixture.ca.to_der().unwrap());
        assert_eq!(material.client_only().chain().len(), 1);
    }

    #[test]
    fn pem_in_any_order() {
        let fixture = test_support::chain_fixture();
        let mut pem = fixture.ca.to_pem().unwrap();
        pem.extend(fixture.leaf_key.private_key_to_pem_pkcs8().unwrap());
        pem.extend(fixture.leaf.to_pem().unwrap());

        let material = KeyMaterial::from_pem(&pem).unwrap();
        assert_eq!(material.certificate().to_der().unwrap(), fixture.leaf.to_der().unwrap());
        assert_eq!(material.chain().len(), 2);

        let client = KeyMaterial::load(CredentialSource::ClientPem(&pem)).unwrap();
        assert_eq!(client.chain().len(), 1);
    }

    #[test]
    fn wrong_password_is_a_load_error() {
        let der = test_support::chain_fixture().pkcs12("secreto");
        assert!(matches!(
            KeyMaterial::from_pkcs12(&der, "otro"),
            Err(Error::CertificateLoad { stage: LoadStage::Pkcs12, .. })
        ));
    }

    #[test]
    fn mismatched_key_is_rejected() {
        let fixture = test_support::chain_fixture();
        let mut pem = fixture.ca_key.private_key_to_pem_pkcs8().unwrap();
        pem.extend(fixture.leaf.to_pem().unwrap());
        assert!(matches!(
            KeyMaterial::from_pem(&pem),
            Err(Error::CertificateLoad { stage: LoadStage::KeyPair, .. })
        ));
    }

    #[test]
    fn non_rsa_key_is_rejected() {
        let (key, cert) = test_support::ec_self_signed();
        let mut pem = key.private_key_to_pem_pkcs8().unwrap();
        pem.extend(cert.to_pem().unwrap());
        assert!(matches!(KeyMaterial::from_pem(&pem), Err(Error::UnsupportedKeyType(_))));
    }

    #[test]
    fn signatures_verify_with_certificate_key() {
        let material = test_support::key_material();
        let signature = material.sign(b"payload", DigestAlgorithm::Sha256).unwrap();
        let public = material.certificate().public_key().unwrap();
        let mut verifier =
            openssl::sign::Verifier::new(openssl::hash::MessageDigest::sha256(), &public).unwrap();
        verifier.update(b"payload").unwrap();
        assert!(verifier.verify(&signature).unwrap());
    }

    /// Stands in for a converter able to read containers the native decoder
    /// cannot: it ignores its input and returns a fixed bundle.
    struct FixedPem(Vec<u8>);

    impl LegacyCredentialConverter for FixedPem {
        fn convert(&self, _pkcs12: &[u8], _password: &str, _scope: PemScope) -> Result<Vec<u8>> {
            Ok(self.0.clone())
        }
    }

    struct Failing;

    impl LegacyCredentialConverter for Failing {
        fn convert(&self, _pkcs12: &[u8], _password: &str, _scope: PemScope) -> Result<Vec<u8>> {
            Err(Error::load(LoadStage::Conversion, "openssl exited with 1"))
        }
    }

    #[test]
    fn loader_prefers_native_decoding() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("firma.p12");
        fs::write(&path, test_support::chain_fixture().pkcs12("secreto")).unwrap();

        let material = Pkcs12Loader::new(Failing).load(&path, "secreto").unwrap();
        assert_eq!(material.chain().len(), 2);
        assert!(!cache_path(&path, PemScope::FullChain).exists());

        let client = Pkcs12Loader::new(Failing).client_material(&path, "secreto").unwrap();
        assert_eq!(client.chain().len(), 1);

        let direct = KeyMaterial::from_pkcs12_file(&path, "secreto").unwrap();
        assert_eq!(direct.certificate().to_der().unwrap(), material.certificate().to_der().unwrap());
    }

    #[test]
    fn loader_falls_back_and_caches() {
        test_support::init_logging();
        let fixture = test_support::chain_fixture();
        let mut pem = fixture.leaf_key.private_key_to_pem_pkcs8().unwrap();
        pem.extend(fixture.leaf.to_pem().unwrap());
        pem.extend(fixture.ca.to_pem().unwrap());

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("legacy.p12");
        fs::write(&path, b"not a pkcs12 container").unwrap();

        let material = Pkcs12Loader::new(FixedPem(pem)).load(&path, "secreto").unwrap();
        assert_eq!(material.chain().len(), 2);
        assert!(cache_path(&path, PemScope::FullChain).exists());

        // the cache is now authoritative, even for a converter that would fail
        let again = Pkcs12Loader::new(Failing).load(&path, "secreto").unwrap();
        assert_eq!(again.certificate().to_der().unwrap(), fixture.leaf.to_der().unwrap());
    }

    #[test]
    fn loader_reports_both_failures() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.p12");
        fs::write(&path, b"not a pkcs12 container").unwrap();

        match Pkcs12Loader::new(Failing).load(&path, "secreto") {
            Err(Error::CredentialsExhausted { native, fallback }) => {
                assert!(matches!(*native, Error::CertificateLoad { stage: LoadStage::Pkcs12, .. }));
                assert!(fallback.to_string().contains("openssl exited with 1"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn missing_file_is_a_read_error() {
        assert!(matches!(
            Pkcs12Loader::new(Failing).load("/nonexistent/firma.p12", "x"),
            Err(Error::CertificateLoad { stage: LoadStage::Read, .. })
        ));
    }
}
