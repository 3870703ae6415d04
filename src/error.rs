use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// Stage of credential loading an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Read,
    Pkcs12,
    Pem,
    Conversion,
    KeyPair,
}

impl fmt::Display for LoadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoadStage::Read => "read",
            LoadStage::Pkcs12 => "PKCS#12 decoding",
            LoadStage::Pem => "PEM decoding",
            LoadStage::Conversion => "legacy conversion",
            LoadStage::KeyPair => "key pair check",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("XML parsing error: {0}")]
    Parse(String),

    #[error("unsupported key type {0}: only RSA keys are accepted")]
    UnsupportedKeyType(String),

    #[error("certificate load error during {stage}: {message}")]
    CertificateLoad { stage: LoadStage, message: String },

    #[error("credentials could not be loaded: native decoding failed ({native}); legacy conversion failed ({fallback})")]
    CredentialsExhausted {
        native: Box<Error>,
        #[source]
        fallback: Box<Error>,
    },

    #[error("signature assembly error: {0}")]
    SignatureAssembly(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("digest error: {0}")]
    Digest(String),

    #[error("digest mismatch for reference {0:?}")]
    DigestMismatch(String),

    #[error("signature verification failed: {0}")]
    SignatureInvalid(String),
}

impl Error {
    pub(crate) fn load(stage: LoadStage, message: impl fmt::Display) -> Self {
        Error::CertificateLoad {
            stage,
            message: message.to_string(),
        }
    }

    /// Prefixes parse and assembly errors with the pipeline stage that hit them.
    pub(crate) fn within(self, stage: &str) -> Self {
        match self {
            Error::Parse(m) => Error::Parse(format!("{}: {}", stage, m)),
            Error::SignatureAssembly(m) => Error::SignatureAssembly(format!("{}: {}", stage, m)),
            other => other,
        }
    }
}
