// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Bundle-level PEM utilities: certificate counting, digests and
//! verification of replacement base bundles.

use chrono::{NaiveDate, NaiveDateTime};
use lazy_static::lazy_static;
use regex::Regex;
use rustls_pki_types::pem::{PemObject, SectionKind};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;
use x509_parser::parse_x509_certificate;

use crate::errors::{StoreError, StoreResult};

/// Only this many leading bytes are searched for the publication header.
const HEADER_SCAN_LIMIT: usize = 1024;

lazy_static! {
    static ref MOZILLA_DATE: Regex = Regex::new(
        r"Certificate data from Mozilla as of:\s+([A-Za-z]{3}\s+[A-Za-z]{3}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2}\s+\d{4})\s+GMT"
    )
    .expect("valid regex");
}

/// Count `CERTIFICATE` sections that also parse as X.509.
///
/// Other section kinds and unparseable certificates are skipped. Scanning
/// stops at the first section that cannot be decoded at all.
pub fn count_certificates(bytes: &[u8]) -> usize {
    let mut count = 0;
    for section in <(SectionKind, Vec<u8>)>::pem_slice_iter(bytes) {
        match section {
            Ok((kind, der)) => {
                if kind == SectionKind::Certificate && parse_x509_certificate(&der).is_ok() {
                    count += 1;
                }
            }
            Err(e) => {
                debug!(error = ?e, counted = count, "stopping certificate scan at malformed section");
                break;
            }
        }
    }

    count
}

/// Unprefixed hex SHA-256, as recorded for bundle files.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Publication date from a Mozilla-style bundle header, if present.
pub fn published_date(bytes: &[u8]) -> Option<NaiveDate> {
    let header = &bytes[..bytes.len().min(HEADER_SCAN_LIMIT)];
    let header = String::from_utf8_lossy(header);

    let raw = MOZILLA_DATE.captures(&header)?.get(1)?.as_str();
    let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    NaiveDateTime::parse_from_str(&normalized, "%a %b %d %H:%M:%S %Y")
        .map(|dt| dt.date())
        .map_err(|e| debug!(date = %normalized, error = %e, "unparseable bundle header date"))
        .ok()
}

/// `YYYY-MM-DD` rendering of [`published_date`], used as the base bundle version.
pub fn published_version(bytes: &[u8]) -> Option<String> {
    published_date(bytes).map(|d| d.format("%Y-%m-%d").to_string())
}

/// Outcome of checking a candidate base bundle.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BundleVerification {
    pub cert_count: usize,
    pub published: Option<NaiveDate>,
    /// Set when the certificate count dropped more than the tolerated share.
    pub warning: Option<String>,
}

pub fn verify_bundle(
    bytes: &[u8],
    current_count: usize,
    min_count: usize,
    max_degradation_percent: f64,
) -> StoreResult<BundleVerification> {
    if bytes.is_empty() {
        return Err(StoreError::InvalidFormat("bundle is empty".to_string()));
    }
    if !matches!(<(SectionKind, Vec<u8>)>::pem_slice_iter(bytes).next(), Some(Ok(_))) {
        return Err(StoreError::InvalidFormat(
            "bundle contains no PEM data".to_string(),
        ));
    }

    let cert_count = count_certificates(bytes);
    if cert_count < min_count {
        return Err(StoreError::InvalidFormat(format!(
            "bundle contains only {cert_count} certificates, expected at least {min_count}"
        )));
    }

    let mut warning = None;
    if current_count > 0 && cert_count < current_count {
        let lost = current_count - cert_count;
        let degradation = lost as f64 / current_count as f64 * 100.0;
        if degradation > max_degradation_percent {
            warning = Some(format!(
                "new bundle has {lost} fewer certificates ({degradation:.1}% decrease)"
            ));
        }
    }

    Ok(BundleVerification {
        cert_count,
        published: published_date(bytes),
        warning,
    })
}
