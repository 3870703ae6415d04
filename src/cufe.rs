//! Document keys printed on DIAN documents: CUFE for invoices, CUDE for
//! credit/debit notes and other electronic documents, and the software
//! security code.

use chrono::NaiveDate;

use crate::config::Environment;
use crate::digest::{digest_hex, DigestAlgorithm};
use crate::error::Result;

const QR_BASE_PRODUCTION: &str = "https://catalogo-vpfe.dian.gov.co";
const QR_BASE_HABILITATION: &str = "https://catalogo-vpfe-hab.dian.gov.co";

/// Fields hashed into a CUFE or CUDE.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentKeyInput<'a> {
    pub number: &'a str,
    pub issue_date: NaiveDate,
    /// `HH:MM:SS-05:00`, as written in `cbc:IssueTime`.
    pub issue_time: &'a str,
    pub tax_exclusive_amount: f64,
    /// Tax code 01.
    pub iva: f64,
    /// Tax code 04.
    pub inc: f64,
    /// Tax code 03.
    pub ica: f64,
    pub payable_amount: f64,
    pub supplier_nit: &'a str,
    pub customer_nit: &'a str,
    /// Technical key for invoices, software PIN for other documents.
    pub key: &'a str,
    pub environment: Environment,
}

impl DocumentKeyInput<'_> {
    /// The string whose SHA-384 is the document key.
    pub fn concatenation(&self) -> String {
        [
            self.number.to_string(),
            self.issue_date.format("%Y-%m-%d").to_string(),
            self.issue_time.to_string(),
            amount(self.tax_exclusive_amount),
            "01".to_string(),
            amount(self.iva),
            "04".to_string(),
            amount(self.inc),
            "03".to_string(),
            amount(self.ica),
            amount(self.payable_amount),
            self.supplier_nit.to_string(),
            self.customer_nit.to_string(),
            self.key.to_string(),
            self.environment.code().to_string(),
        ]
        .concat()
    }
}

fn amount(value: f64) -> String {
    format!("{:.2}", value)
}

pub fn cufe(input: &DocumentKeyInput<'_>) -> Result<String> {
    digest_hex(input.concatenation().as_bytes(), DigestAlgorithm::Sha384)
}

pub fn cude(input: &DocumentKeyInput<'_>) -> Result<String> {
    cufe(input)
}

/// SHA-384 of software id, PIN and document number, for
/// `sts:SoftwareSecurityCode`.
pub fn software_security_code(software_id: &str, pin: &str, number: &str) -> Result<String> {
    digest_hex(format!("{}{}{}", software_id, pin, number).as_bytes(), DigestAlgorithm::Sha384)
}

/// Lookup URL encoded in the printed QR code.
pub fn qr_url(document_key: &str, environment: Environment) -> String {
    let base = match environment {
        Environment::Production => QR_BASE_PRODUCTION,
        Environment::Habilitation => QR_BASE_HABILITATION,
    };
    format!("{}/document/searchqr?documentkey={}", base, document_key)
}
