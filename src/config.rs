//! Plain configuration structures. Every struct deserialises with serde and
//! falls back to DIAN's published values for any missing field.

use std::path::PathBuf;
use std::time::Duration;

pub const PRODUCTION_URL: &str = "https://vpfe.dian.gov.co/WcfDianCustomerServices.svc";
pub const HABILITATION_URL: &str = "https://vpfe-hab.dian.gov.co/WcfDianCustomerServices.svc";

pub const POLICY_IDENTIFIER: &str =
    "https://facturaelectronica.dian.gov.co/politicadefirma/v2/politicadefirmav2.pdf";
pub const POLICY_HASH: &str = "dMoMvtcG5aIzgYo0tIsSQeVJBDnUnfSOfBpxXrmor0Y=";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    #[serde(rename = "produccion")]
    Production,
    #[serde(rename = "habilitacion")]
    Habilitation,
}

impl Environment {
    /// `ProfileExecutionID` code: 1 for production, 2 for habilitation.
    pub fn code(&self) -> &'static str {
        match self {
            Environment::Production => "1",
            Environment::Habilitation => "2",
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Habilitation
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub environment: Environment,
    pub production_url: String,
    pub habilitation_url: String,
}

impl ServiceConfig {
    pub fn url(&self) -> &str {
        match self.environment {
            Environment::Production => &self.production_url,
            Environment::Habilitation => &self.habilitation_url,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            environment: Environment::default(),
            production_url: PRODUCTION_URL.to_string(),
            habilitation_url: HABILITATION_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignerConfig {
    pub policy_identifier: String,
    pub policy_hash: String,
    pub claimed_role: String,
    /// Qualified name of the element the signature is inserted into.
    pub extension_container: String,
}

impl Default for SignerConfig {
    fn default() -> Self {
        SignerConfig {
            policy_identifier: POLICY_IDENTIFIER.to_string(),
            policy_hash: POLICY_HASH.to_string(),
            claimed_role: "supplier".to_string(),
            extension_container: "ext:UBLExtensions".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityHeaderConfig {
    pub timestamp_ttl_secs: i64,
}

impl Default for SecurityHeaderConfig {
    fn default() -> Self {
        SecurityHeaderConfig {
            timestamp_ttl_secs: 60000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenSslConfig {
    pub program: PathBuf,
    /// Pass `-legacy` so OpenSSL 3 accepts RC2/3DES containers.
    pub legacy: bool,
    pub timeout_secs: u64,
}

impl OpenSslConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for OpenSslConfig {
    fn default() -> Self {
        OpenSslConfig {
            program: PathBuf::from("openssl"),
            legacy: true,
            timeout_secs: 30,
        }
    }
}
