// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Read-only consistency checks over an existing store.

use std::collections::HashSet;
use std::io::ErrorKind;

use serde::Serialize;
use tokio::fs;

use crate::context::Context;
use crate::errors::StoreResult;
use crate::metadata::Metadata;
use crate::pem::{count_certificates, sha256_hex};
use crate::store::{SOURCE_BASE, SOURCE_USER, Store};
use crate::validate::validate_certificate;

const SUGGEST_INIT: &str = "re-create the store with `trustbundle init --force`";
const SUGGEST_RESET: &str = "restore the base bundle with `trustbundle bundle reset`";
const SUGGEST_REBUILD: &str = "regenerate the combined bundle with `trustbundle rebuild`";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

#[derive(Clone, Debug, Serialize)]
pub struct HealthCheck {
    pub name: &'static str,
    pub status: CheckStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl HealthCheck {
    fn new(name: &'static str) -> Self {
        HealthCheck {
            name,
            status: CheckStatus::Pass,
            issues: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    fn record(&mut self, status: CheckStatus, issue: String) {
        self.status = self.status.max(status);
        self.issues.push(issue);
    }

    fn warn(&mut self, issue: impl Into<String>) {
        self.record(CheckStatus::Warn, issue.into());
    }

    fn fail(&mut self, issue: impl Into<String>) {
        self.record(CheckStatus::Fail, issue.into());
    }

    fn suggest(&mut self, suggestion: &str) {
        if !self.suggestions.iter().any(|s| s == suggestion) {
            self.suggestions.push(suggestion.to_string());
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HealthSummary {
    pub total: usize,
    pub passed: usize,
    pub warnings: usize,
    pub failures: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct HealthReport {
    pub checks: Vec<HealthCheck>,
    pub summary: HealthSummary,
}

impl HealthReport {
    fn new(checks: Vec<HealthCheck>) -> Self {
        let mut summary = HealthSummary {
            total: checks.len(),
            ..Default::default()
        };
        for check in &checks {
            match check.status {
                CheckStatus::Pass => summary.passed += 1,
                CheckStatus::Warn => summary.warnings += 1,
                CheckStatus::Fail => summary.failures += 1,
            }
        }
        HealthReport { checks, summary }
    }

    /// No check failed. Warnings are allowed.
    pub fn healthy(&self) -> bool {
        self.summary.failures == 0
    }

    pub fn get(&self, name: &str) -> Option<&HealthCheck> {
        self.checks.iter().find(|c| c.name == name)
    }
}

pub const CHECK_LAYOUT: &str = "Store directory structure";
pub const CHECK_METADATA: &str = "Metadata integrity";
pub const CHECK_BASE_BUNDLE: &str = "Base CA bundle";
pub const CHECK_COMBINED_BUNDLE: &str = "Combined certificate bundle";
pub const CHECK_USER_CERTS: &str = "User certificates";

impl Store {
    /// Inspect the store without modifying it.
    pub async fn check(&self, ctx: &Context) -> StoreResult<HealthReport> {
        ctx.check("check store")?;

        let layout = self.check_layout().await;
        let (metadata_check, record) = self.check_metadata().await;
        let base = self.check_base_bundle(record.as_ref()).await;
        let combined = self.check_combined_bundle(record.as_ref()).await;
        let user = self.check_user_certificates(record.as_ref()).await?;

        Ok(HealthReport::new(vec![
            layout,
            metadata_check,
            base,
            combined,
            user,
        ]))
    }

    async fn check_layout(&self) -> HealthCheck {
        let mut check = HealthCheck::new(CHECK_LAYOUT);
        for dir in self.layout().directories() {
            match fs::metadata(&dir).await {
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => check.fail(format!("path is not a directory: {}", dir.display())),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    check.fail(format!("directory does not exist: {}", dir.display()))
                }
                Err(e) => check.fail(format!("cannot access {}: {e}", dir.display())),
            }
        }
        if check.status == CheckStatus::Fail {
            check.suggest(SUGGEST_INIT);
        }
        check
    }

    async fn check_metadata(&self) -> (HealthCheck, Option<Metadata>) {
        let mut check = HealthCheck::new(CHECK_METADATA);
        let record = match self.metadata().await {
            Ok(record) => record,
            Err(e) => {
                check.fail(format!("cannot load metadata: {e}"));
                check.suggest(SUGGEST_INIT);
                return (check, None);
            }
        };

        if record.base_bundle.sha256.is_empty() {
            check.fail("base bundle digest missing from metadata");
            check.suggest(SUGGEST_RESET);
        }
        if record.combined_bundle.sha256.is_empty() {
            check.fail("combined bundle digest missing from metadata");
            check.suggest(SUGGEST_REBUILD);
        }
        (check, Some(record))
    }

    async fn check_base_bundle(&self, record: Option<&Metadata>) -> HealthCheck {
        let mut check = HealthCheck::new(CHECK_BASE_BUNDLE);
        let path = self.layout().base_bundle();
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                check.fail(format!("cannot read {}: {e}", path.display()));
                check.suggest(SUGGEST_RESET);
                return check;
            }
        };

        let count = count_certificates(&bytes);
        let min = self.config().min_base_bundle_certs();
        if count == 0 {
            check.fail("no valid certificates in base bundle");
            check.suggest(SUGGEST_RESET);
        } else if count < min {
            check.warn(format!(
                "base bundle has only {count} certificates (expected at least {min})"
            ));
            check.suggest(SUGGEST_RESET);
        }

        if record.is_some_and(|r| sha256_hex(&bytes) != r.base_bundle.sha256) {
            check.fail("base bundle digest does not match metadata");
            check.suggest(SUGGEST_RESET);
        }
        check
    }

    async fn check_combined_bundle(&self, record: Option<&Metadata>) -> HealthCheck {
        let mut check = HealthCheck::new(CHECK_COMBINED_BUNDLE);
        let path = self.layout().combined_bundle();
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                check.fail(format!("cannot read {}: {e}", path.display()));
                check.suggest(SUGGEST_REBUILD);
                return check;
            }
        };

        let count = count_certificates(&bytes);
        if count == 0 {
            check.fail("no valid certificates in combined bundle");
        }

        if let Some(record) = record {
            let info = &record.combined_bundle;
            if sha256_hex(&bytes) != info.sha256 {
                check.fail("combined bundle digest does not match metadata");
            }
            if count != info.cert_count {
                check.fail(format!(
                    "combined bundle holds {count} certificates, metadata records {}",
                    info.cert_count
                ));
            }

            let has_user = info.sources.iter().any(|s| s == SOURCE_USER);
            if has_user == record.user_certificates.is_empty() {
                check.warn(format!(
                    "source tags {:?} disagree with {} cataloged user certificates",
                    info.sources,
                    record.user_certificates.len()
                ));
            }
            if !info.sources.iter().any(|s| s == SOURCE_BASE) {
                check.warn(format!("source tags {:?} omit the base bundle", info.sources));
            }
        }

        if check.status != CheckStatus::Pass {
            check.suggest(SUGGEST_REBUILD);
        }
        check
    }

    async fn check_user_certificates(&self, record: Option<&Metadata>) -> StoreResult<HealthCheck> {
        let mut check = HealthCheck::new(CHECK_USER_CERTS);
        let Some(record) = record else {
            check.warn("metadata unavailable, user certificates not verified");
            return Ok(check);
        };

        for entry in &record.user_certificates {
            let path = self.layout().user_cert(&entry.name);
            let bytes = match fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    check.fail(format!("{}: file missing ({})", entry.name, path.display()));
                    check.suggest("remove the entry with `trustbundle cert remove` and add it again");
                    continue;
                }
                Err(e) => {
                    check.fail(format!("{}: cannot read {}: {e}", entry.name, path.display()));
                    continue;
                }
            };

            match validate_certificate(&bytes, true) {
                Ok(cert) if cert.info().fingerprint != entry.fingerprint => {
                    check.fail(format!("{}: fingerprint does not match metadata", entry.name));
                    check.suggest("re-add the certificate with `trustbundle cert add`");
                }
                Ok(cert) if cert.info().is_expired() => {
                    check.warn(format!(
                        "{}: expired on {}",
                        entry.name,
                        cert.info().not_after.format("%Y-%m-%d")
                    ));
                    check.suggest("remove or replace expired certificates");
                }
                Ok(_) => {}
                Err(e) => check.fail(format!("{}: {e}", entry.name)),
            }
        }

        let cataloged: HashSet<_> = record
            .user_certificates
            .iter()
            .map(|c| self.layout().user_cert(&c.name))
            .collect();
        for path in self.user_certificate_files().await? {
            if !cataloged.contains(&path) {
                check.warn(format!(
                    "orphaned certificate file not in metadata: {}",
                    path.display()
                ));
                check.suggest("add orphaned files with `trustbundle cert add` or delete them");
            }
        }

        Ok(check)
    }
}
