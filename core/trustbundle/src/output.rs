// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Plain-text and JSON rendering of command results.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use trustbundle_certstore::CertificateDetails;
use trustbundle_certstore::health::{CheckStatus, HealthReport};
use trustbundle_certstore::metadata::{BaseBundleInfo, CombinedBundleInfo, UserCertificate};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

pub fn json<T: Serialize + ?Sized>(out: &mut dyn Write, value: &T) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

fn time(t: &DateTime<Utc>) -> String {
    t.format(TIME_FORMAT).to_string()
}

fn heading(out: &mut dyn Write, title: &str) -> io::Result<()> {
    writeln!(out, "{title}")?;
    writeln!(out, "{}", "-".repeat(title.len()))
}

pub fn certificate_added(out: &mut dyn Write, cert: &UserCertificate, combined: &Path) -> io::Result<()> {
    writeln!(out, "Certificate '{}' added", cert.name)?;
    writeln!(out, "  Subject:     {}", cert.subject)?;
    writeln!(out, "  Fingerprint: {}", cert.fingerprint)?;
    writeln!(out, "  Expires:     {}", time(&cert.expires))?;
    writeln!(out, "  Path:        {}", cert.path)?;
    writeln!(out)?;
    writeln!(out, "Combined bundle rebuilt: {}", combined.display())
}

pub fn certificate_table(out: &mut dyn Write, certs: &[UserCertificate], now: DateTime<Utc>) -> io::Result<()> {
    let name_width = certs.iter().map(|c| c.name.len()).max().unwrap_or(0).max(4);
    writeln!(out, "{:<name_width$}  {:<23}  SUBJECT", "NAME", "EXPIRES")?;
    for cert in certs {
        let expires = if cert.expires < now {
            format!("{} !", time(&cert.expires))
        } else {
            time(&cert.expires)
        };
        writeln!(out, "{:<name_width$}  {:<23}  {}", cert.name, expires, cert.subject)?;
    }
    Ok(())
}

pub fn certificate_details(out: &mut dyn Write, details: &CertificateDetails, now: DateTime<Utc>) -> io::Result<()> {
    let record = &details.record;
    let cert = &details.certificate;
    writeln!(out, "Name:         {}", record.name)?;
    writeln!(out, "Path:         {}", record.path)?;
    writeln!(out, "Added:        {}", time(&record.added))?;
    writeln!(out, "Subject:      {}", cert.subject)?;
    writeln!(out, "Issuer:       {}", cert.issuer)?;
    writeln!(out, "Serial:       {}", cert.serial)?;
    writeln!(out, "Fingerprint:  {}", cert.fingerprint)?;
    writeln!(out, "Not before:   {}", time(&cert.not_before))?;
    writeln!(out, "Not after:    {}", time(&cert.not_after))?;
    if cert.is_expired_at(now) {
        writeln!(out, "Status:       expired")?;
    } else {
        let days = (cert.not_after - now).num_days();
        writeln!(out, "Status:       valid ({days} days left)")?;
    }
    if cert.fingerprint != record.fingerprint {
        writeln!(out)?;
        writeln!(
            out,
            "Warning: file fingerprint differs from the catalog ({}); run `trustbundle doctor`",
            record.fingerprint
        )?;
    }
    Ok(())
}

/// Both bundles as shown by `bundle info` and `status`.
#[derive(Debug, Serialize)]
pub struct BundleSummary<'a> {
    pub base_path: PathBuf,
    pub base: &'a BaseBundleInfo,
    pub combined_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combined_size: Option<u64>,
    pub combined: &'a CombinedBundleInfo,
}

pub fn bundle_summary(out: &mut dyn Write, summary: &BundleSummary<'_>) -> io::Result<()> {
    heading(out, "Base CA bundle")?;
    writeln!(out, "Path:          {}", summary.base_path.display())?;
    writeln!(out, "Source:        {}", summary.base.source)?;
    if let Some(version) = &summary.base.version {
        writeln!(out, "Version:       {version}")?;
    }
    writeln!(out, "Certificates:  {}", summary.base.cert_count)?;
    writeln!(out, "Generated:     {}", time(&summary.base.generated))?;
    writeln!(out, "SHA-256:       {}", summary.base.sha256)?;
    writeln!(out)?;
    heading(out, "Combined bundle")?;
    writeln!(out, "Path:          {}", summary.combined_path.display())?;
    writeln!(out, "Sources:       {}", summary.combined.sources.join(", "))?;
    writeln!(out, "Certificates:  {}", summary.combined.cert_count)?;
    if let Some(size) = summary.combined_size {
        writeln!(out, "Size:          {}", format_bytes(size))?;
    }
    writeln!(out, "Generated:     {}", time(&summary.combined.generated))?;
    writeln!(out, "SHA-256:       {}", summary.combined.sha256)
}

pub fn health_report(out: &mut dyn Write, report: &HealthReport) -> io::Result<()> {
    for check in &report.checks {
        let tag = match check.status {
            CheckStatus::Pass => "PASS",
            CheckStatus::Warn => "WARN",
            CheckStatus::Fail => "FAIL",
        };
        writeln!(out, "[{tag}] {}", check.name)?;
        for issue in &check.issues {
            writeln!(out, "       - {issue}")?;
        }
        for suggestion in &check.suggestions {
            writeln!(out, "       > {suggestion}")?;
        }
    }
    let s = &report.summary;
    writeln!(out)?;
    writeln!(
        out,
        "{} checks: {} passed, {} warnings, {} failures",
        s.total, s.passed, s.warnings, s.failures
    )
}

/// Human-readable size with binary units.
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{bytes} B");
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT && exp < 5 {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    let suffix = ['K', 'M', 'G', 'T', 'P', 'E'][exp];
    format!("{:.1} {suffix}iB", bytes as f64 / div as f64)
}
