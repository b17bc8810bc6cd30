//! Certificates and certificate requests
//!
//! Certificates are opaque DER blobs here. They are stored, fingerprinted and
//! exported but never parsed beyond the PEM armor.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{CryptoError, CryptoResult};

/// Certificate object kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateType {
    X509,
    Request,
}

impl CertificateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateType::X509 => "x509",
            CertificateType::Request => "request",
        }
    }

    fn pem_label(&self) -> &'static str {
        match self {
            CertificateType::X509 => "CERTIFICATE",
            CertificateType::Request => "CERTIFICATE REQUEST",
        }
    }
}

impl fmt::Display for CertificateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CertificateType {
    type Err = CryptoError;

    fn from_str(s: &str) -> CryptoResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "x509" => Ok(CertificateType::X509),
            "request" => Ok(CertificateType::Request),
            _ => Err(CryptoError::UnsupportedFormat(format!("certificate type {s}"))),
        }
    }
}

/// Certificate export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateFormat {
    Raw,
    Pem,
}

impl FromStr for CertificateFormat {
    type Err = CryptoError;

    fn from_str(s: &str) -> CryptoResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(CertificateFormat::Raw),
            "pem" => Ok(CertificateFormat::Pem),
            _ => Err(CryptoError::UnsupportedFormat(format!("certificate format {s}"))),
        }
    }
}

/// A provider-native certificate object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    kind: CertificateType,
    der: Vec<u8>,
    label: Option<String>,
}

impl Certificate {
    pub fn new(kind: CertificateType, der: Vec<u8>, label: Option<String>) -> CryptoResult<Self> {
        // Every DER certificate or request is an outer SEQUENCE.
        if der.first() != Some(&0x30) {
            return Err(CryptoError::InvalidKeyData(format!(
                "{kind} data is not a DER sequence"
            )));
        }
        Ok(Self { kind, der, label })
    }

    /// Accept PEM armor or bare DER.
    pub fn parse(kind: CertificateType, data: &[u8], label: Option<String>) -> CryptoResult<Self> {
        let der = match std::str::from_utf8(data) {
            Ok(text) if text.trim_start().starts_with("-----BEGIN") => decode_pem(text)?,
            _ => data.to_vec(),
        };
        Self::new(kind, der, label)
    }

    pub fn kind(&self) -> CertificateType {
        self.kind
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// SHA-256 over the DER encoding, hex
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(&self.der))
    }

    pub fn export(&self, format: CertificateFormat) -> Vec<u8> {
        match format {
            CertificateFormat::Raw => self.der.clone(),
            CertificateFormat::Pem => self.to_pem().into_bytes(),
        }
    }

    pub fn to_pem(&self) -> String {
        let body = BASE64.encode(&self.der);
        let label = self.kind.pem_label();
        let mut pem = format!("-----BEGIN {label}-----\n");
        for line in body.as_bytes().chunks(64) {
            // base64 output is ASCII
            pem.push_str(&String::from_utf8_lossy(line));
            pem.push('\n');
        }
        pem.push_str(&format!("-----END {label}-----\n"));
        pem
    }
}

fn decode_pem(text: &str) -> CryptoResult<Vec<u8>> {
    let body: String = text
        .lines()
        .map(str::trim)
        .skip_while(|line| !line.starts_with("-----BEGIN"))
        .skip(1)
        .take_while(|line| !line.starts_with("-----END"))
        .collect();
    if body.is_empty() {
        return Err(CryptoError::InvalidKeyData("empty PEM body".into()));
    }
    BASE64
        .decode(body)
        .map_err(|e| CryptoError::InvalidKeyData(format!("invalid PEM base64: {e}")))
}
