// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Single-certificate validation and certificate name checks.
//!
//! Validation is pure: it never touches the filesystem or the network.

use chrono::{DateTime, Utc};
use rustls_pki_types::pem::{PemObject, SectionKind};
use serde::Serialize;
use sha2::{Digest, Sha256};
use x509_parser::parse_x509_certificate;

use crate::errors::{StoreError, StoreResult};

/// Fields extracted from a parsed certificate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    pub serial: String,
    pub fingerprint: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl CertificateInfo {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.not_after
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// A certificate that decoded and parsed successfully.
#[derive(Clone, Debug)]
pub struct ValidatedCertificate {
    der: Vec<u8>,
    info: CertificateInfo,
}

impl ValidatedCertificate {
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn info(&self) -> &CertificateInfo {
        &self.info
    }

    pub fn into_info(self) -> CertificateInfo {
        self.info
    }
}

/// `sha256:`-prefixed hex digest of DER bytes.
pub fn fingerprint(der: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(der)))
}

pub fn validate_certificate(
    pem_bytes: &[u8],
    allow_expired: bool,
) -> StoreResult<ValidatedCertificate> {
    validate_certificate_at(pem_bytes, allow_expired, Utc::now())
}

/// Validate against an explicit clock.
pub fn validate_certificate_at(
    pem_bytes: &[u8],
    allow_expired: bool,
    now: DateTime<Utc>,
) -> StoreResult<ValidatedCertificate> {
    // the decoder skips sections it has no kind for, so count them raw
    let blocks = count_begin_markers(pem_bytes);
    if blocks == 0 {
        return Err(StoreError::InvalidFormat("no PEM block found".to_string()));
    }
    if blocks > 1 {
        return Err(StoreError::InvalidFormat(format!(
            "expected exactly one PEM block, found {blocks}"
        )));
    }

    let mut sections = <(SectionKind, Vec<u8>)>::pem_slice_iter(pem_bytes);
    let (kind, der) = match sections.next() {
        Some(Ok(section)) => section,
        Some(Err(e)) => {
            return Err(StoreError::InvalidFormat(format!(
                "failed to decode PEM: {e:?}"
            )));
        }
        None => {
            return Err(StoreError::InvalidFormat(
                "unsupported PEM block, expected CERTIFICATE".to_string(),
            ));
        }
    };

    if kind != SectionKind::Certificate {
        return Err(StoreError::InvalidFormat(format!(
            "expected a CERTIFICATE block, found {kind:?}"
        )));
    }

    if sections.next().is_some() {
        return Err(StoreError::InvalidFormat(
            "expected exactly one PEM block".to_string(),
        ));
    }

    let info = parse_der(&der)?;

    if !allow_expired && info.is_expired_at(now) {
        return Err(StoreError::Expired {
            not_after: info.not_after,
        });
    }

    Ok(ValidatedCertificate { der, info })
}

const BEGIN_MARKER: &[u8] = b"-----BEGIN ";

fn count_begin_markers(bytes: &[u8]) -> usize {
    bytes
        .windows(BEGIN_MARKER.len())
        .filter(|w| *w == BEGIN_MARKER)
        .count()
}

pub(crate) fn parse_der(der: &[u8]) -> StoreResult<CertificateInfo> {
    let (_, cert) = parse_x509_certificate(der)
        .map_err(|e| StoreError::InvalidFormat(format!("failed to parse certificate: {e}")))?;

    let validity = cert.validity();
    Ok(CertificateInfo {
        subject: cert.subject().to_string(),
        issuer: cert.issuer().to_string(),
        serial: hex::encode(cert.raw_serial()),
        fingerprint: fingerprint(der),
        not_before: to_utc(validity.not_before.timestamp())?,
        not_after: to_utc(validity.not_after.timestamp())?,
    })
}

fn to_utc(timestamp: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp, 0).ok_or_else(|| {
        StoreError::InvalidFormat(format!("certificate time {timestamp} out of range"))
    })
}

/// Reject names that could escape `certs/user/` once turned into a file name.
pub fn validate_name(name: &str) -> StoreResult<()> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name.contains('/') || name.contains('\\') {
        "name contains a path separator"
    } else if name.contains("..") {
        "name contains a parent-directory sequence"
    } else if name.contains('\0') {
        "name contains a NUL byte"
    } else {
        return Ok(());
    };

    Err(StoreError::InvalidName {
        name: name.to_string(),
        reason,
    })
}
