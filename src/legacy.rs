//! Conversion of PKCS#12 containers the native decoder rejects (RC2/3DES
//! encryption produced by older tooling) into PEM, plus the on-disk cache of
//! the converted output.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info};
use openssl::pkcs12::Pkcs12;

use crate::config::OpenSslConfig;
use crate::error::{Error, LoadStage, Result};

const PASSWORD_VAR: &str = "DIAN_XMLSEC_PKCS12_PASSWORD";

/// Which certificates the converted PEM carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PemScope {
    /// Private key, leaf certificate and every CA certificate.
    FullChain,
    /// Private key and leaf certificate only.
    ClientOnly,
}

impl PemScope {
    fn cache_suffix(&self) -> &'static str {
        match self {
            PemScope::FullChain => ".pem",
            PemScope::ClientOnly => ".client.pem",
        }
    }
}

/// Turns a PKCS#12 container into an unencrypted PEM bundle.
pub trait LegacyCredentialConverter: Send + Sync {
    fn convert(&self, pkcs12: &[u8], password: &str, scope: PemScope) -> Result<Vec<u8>>;
}

/// Runs `openssl pkcs12 -nodes` as a child process. The container is fed on
/// stdin and the password travels in the child's environment, never on its
/// command line.
#[derive(Debug, Clone, Default)]
pub struct OpenSslCli {
    config: OpenSslConfig,
}

impl OpenSslCli {
    pub fn new(config: OpenSslConfig) -> Self {
        OpenSslCli { config }
    }

    fn command(&self, password: &str, scope: PemScope) -> Command {
        let mut command = Command::new(&self.config.program);
        command.arg("pkcs12").arg("-nodes");
        if self.config.legacy {
            command.arg("-legacy");
        }
        if scope == PemScope::ClientOnly {
            command.arg("-clcerts");
        }
        command
            .arg("-passin")
            .arg(format!("env:{}", PASSWORD_VAR))
            .env(PASSWORD_VAR, password)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }
}

impl LegacyCredentialConverter for OpenSslCli {
    fn convert(&self, pkcs12: &[u8], password: &str, scope: PemScope) -> Result<Vec<u8>> {
        let program = self.config.program.display().to_string();
        debug!("converting PKCS#12 container with {} ({:?})", program, scope);

        let mut child = self
            .command(password, scope)
            .spawn()
            .map_err(|e| Error::load(LoadStage::Conversion, format!("unable to start {}: {}", program, e)))?;

        let stdout = collect(child.stdout.take());
        let stderr = collect(child.stderr.take());
        if let Some(mut stdin) = child.stdin.take() {
            // a child that exits early closes the pipe; its exit status says why
            let _ = stdin.write_all(pkcs12);
        }

        let status = wait_with_timeout(&mut child, self.config.timeout())?;
        let output = stdout
            .join()
            .map_err(|_| Error::load(LoadStage::Conversion, "stdout reader panicked"))?;
        let diagnostics = stderr
            .join()
            .map_err(|_| Error::load(LoadStage::Conversion, "stderr reader panicked"))?;

        if !status.success() {
            return Err(Error::load(
                LoadStage::Conversion,
                format!(
                    "{} exited with {}: {}",
                    program,
                    status,
                    String::from_utf8_lossy(&diagnostics).trim()
                ),
            ));
        }
        if output.is_empty() {
            return Err(Error::load(LoadStage::Conversion, format!("{} produced no output", program)));
        }
        Ok(output)
    }
}

fn collect<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<ExitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::load(
                    LoadStage::Conversion,
                    format!("conversion timed out after {:?}", timeout),
                ));
            }
            Ok(None) => thread::sleep(Duration::from_millis(20)),
            Err(e) => return Err(Error::load(LoadStage::Conversion, e)),
        }
    }
}

/// Re-encodes a container the linked OpenSSL can read into PEM without
/// spawning a process.
#[derive(Debug, Clone, Copy, Default)]
pub struct InProcessConverter;

impl LegacyCredentialConverter for InProcessConverter {
    fn convert(&self, pkcs12: &[u8], password: &str, scope: PemScope) -> Result<Vec<u8>> {
        let conversion = |e: openssl::error::ErrorStack| Error::load(LoadStage::Conversion, e);
        let parsed = Pkcs12::from_der(pkcs12)
            .and_then(|p| p.parse2(password))
            .map_err(conversion)?;

        let mut output = Vec::new();
        if let Some(key) = parsed.pkey {
            output.extend(key.private_key_to_pem_pkcs8().map_err(conversion)?);
        }
        if let Some(cert) = parsed.cert {
            output.extend(cert.to_pem().map_err(conversion)?);
        }
        if scope == PemScope::FullChain {
            if let Some(ca) = parsed.ca {
                for cert in ca.iter() {
                    output.extend(cert.to_pem().map_err(conversion)?);
                }
            }
        }
        Ok(output)
    }
}

/// Path of the converted PEM kept next to `container`: `<container>.pem` for
/// the full chain and `<container>.client.pem` for the client-only bundle.
pub fn cache_path(container: &Path, scope: PemScope) -> PathBuf {
    let mut name = container.file_name().unwrap_or_default().to_os_string();
    name.push(scope.cache_suffix());
    container.with_file_name(name)
}

/// Returns the cached conversion of `container`, running `converter` and
/// writing the cache first when no non-empty cache file exists.
pub fn cached_conversion<C>(converter: &C, container: &Path, password: &str, scope: PemScope) -> Result<PathBuf>
where
    C: LegacyCredentialConverter + ?Sized,
{
    let path = cache_path(container, scope);
    if let Ok(meta) = fs::metadata(&path) {
        if meta.is_file() && meta.len() > 0 {
            info!("reusing converted credentials at {}", path.display());
            return Ok(path);
        }
    }

    let der = fs::read(container)
        .map_err(|e| Error::load(LoadStage::Read, format!("{}: {}", container.display(), e)))?;
    let pem = converter.convert(&der, password, scope)?;
    if pem.is_empty() {
        return Err(Error::load(LoadStage::Conversion, "conversion produced no output"));
    }
    write_private(&path, &pem)?;
    info!("cached converted credentials at {}", path.display());
    Ok(path)
}

/// Writes through a uniquely named temporary file and renames it into place so
/// concurrent readers never observe a partial file.
fn write_private(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
    let write_err = |e: std::io::Error| Error::load(LoadStage::Conversion, format!("{}: {}", path.display(), e));

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(&tmp).map_err(write_err)?;
    let written = file.write_all(data).and_then(|_| file.sync_all());
    drop(file);
    if let Err(e) = written.and_then(|_| fs::rename(&tmp, path)) {
        let _ = fs::remove_file(&tmp);
        return Err(write_err(e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use tempfile::TempDir;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting<C> {
        inner: C,
        calls: AtomicUsize,
    }

    impl<C: LegacyCredentialConverter> LegacyCredentialConverter for Counting<C> {
        fn convert(&self, pkcs12: &[u8], password: &str, scope: PemScope) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.convert(pkcs12, password, scope)
        }
    }

    #[test]
    fn cache_paths() {
        let p12 = Path::new("/certs/firma.p12");
        assert_eq!(cache_path(p12, PemScope::FullChain), PathBuf::from("/certs/firma.p12.pem"));
        assert_eq!(
            cache_path(p12, PemScope::ClientOnly),
            PathBuf::from("/certs/firma.p12.client.pem")
        );
    }

    #[test]
    fn in_process_scopes() {
        let fixture = test_support::chain_fixture();
        let der = fixture.pkcs12("secreto");

        let full = String::from_utf8(InProcessConverter.convert(&der, "secreto", PemScope::FullChain).unwrap()).unwrap();
        let client = String::from_utf8(InProcessConverter.convert(&der, "secreto", PemScope::ClientOnly).unwrap()).unwrap();
        assert_eq!(full.matches("BEGIN CERTIFICATE").count(), 2);
        assert_eq!(client.matches("BEGIN CERTIFICATE").count(), 1);
        assert!(client.contains("BEGIN PRIVATE KEY"));

        assert!(matches!(
            InProcessConverter.convert(&der, "wrong", PemScope::FullChain),
            Err(Error::CertificateLoad { stage: LoadStage::Conversion, .. })
        ));
    }

    #[test]
    fn conversion_is_cached_on_disk() {
        let dir = TempDir::new().unwrap();
        let container = dir.path().join("firma.p12");
        fs::write(&container, test_support::chain_fixture().pkcs12("secreto")).unwrap();

        let converter = Counting {
            inner: InProcessConverter,
            calls: AtomicUsize::new(0),
        };
        let first = cached_conversion(&converter, &container, "secreto", PemScope::FullChain).unwrap();
        let second = cached_conversion(&converter, &container, "secreto", PemScope::FullChain).unwrap();
        assert_eq!(first, second);
        assert_eq!(converter.calls.load(Ordering::SeqCst), 1);
        assert!(fs::metadata(&first).unwrap().len() > 0);

        cached_conversion(&converter, &container, "secreto", PemScope::ClientOnly).unwrap();
        assert_eq!(converter.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn empty_cache_file_is_rebuilt() {
        let dir = TempDir::new().unwrap();
        let container = dir.path().join("firma.p12");
        fs::write(&container, test_support::chain_fixture().pkcs12("secreto")).unwrap();
        fs::write(cache_path(&container, PemScope::FullChain), b"").unwrap();

        let path = cached_conversion(&InProcessConverter, &container, "secreto", PemScope::FullChain).unwrap();
        assert!(fs::read_to_string(path).unwrap().contains("BEGIN CERTIFICATE"));
    }

    #[test]
    fn missing_program_is_a_conversion_error() {
        let cli = OpenSslCli::new(OpenSslConfig {
            program: PathBuf::from("/nonexistent/openssl"),
            ..OpenSslConfig::default()
        });
        assert!(matches!(
            cli.convert(b"", "x", PemScope::FullChain),
            Err(Error::CertificateLoad { stage: LoadStage::Conversion, .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn slow_conversion_times_out() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let program = dir.path().join("openssl");
        fs::write(&program, "#!/bin/sh\nexec sleep 5\n").unwrap();
        fs::set_permissions(&program, fs::Permissions::from_mode(0o755)).unwrap();

        let cli = OpenSslCli::new(OpenSslConfig {
            program,
            timeout_secs: 1,
            legacy: false,
        });
        let started = Instant::now();
        let err = cli.convert(b"x", "x", PemScope::FullChain).unwrap_err();
        assert!(matches!(
            err,
            Error::CertificateLoad { stage: LoadStage::Conversion, .. }
        ));
        assert!(err.to_string().contains("timed out"), "{}", err);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn openssl_cli_converts_when_available() {
        let Some(config) = test_support::openssl_cli() else {
            return;
        };
        let der = test_support::chain_fixture().pkcs12("secreto");
        let pem = OpenSslCli::new(config).convert(&der, "secreto", PemScope::ClientOnly).unwrap();
        let pem = String::from_utf8(pem).unwrap();
        assert_eq!(pem.matches("BEGIN CERTIFICATE").count(), 1);
        assert!(pem.contains("PRIVATE KEY"));
    }
}
