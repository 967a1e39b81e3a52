// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! The metadata record and its locked read-modify-write protocol.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::context::Context;
use crate::errors::{StoreError, StoreResult};
use crate::fsutil::write_atomic;
use crate::lock::{self, LockGuard, Locker};

pub const CURRENT_SCHEMA_VERSION: &str = "1";

/// Describes `combined-bundle.pem`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinedBundleInfo {
    pub generated: DateTime<Utc>,
    pub sha256: String,
    pub cert_count: usize,
    pub sources: Vec<String>,
}

/// Describes `base-bundle.pem`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseBundleInfo {
    pub generated: DateTime<Utc>,
    pub sha256: String,
    pub cert_count: usize,
    /// `"embedded"` or the URL/label the bytes came from.
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCertificate {
    pub name: String,
    /// Relative to the store root.
    pub path: String,
    pub added: DateTime<Utc>,
    pub fingerprint: String,
    pub subject: String,
    pub expires: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub schema_version: String,
    pub combined_bundle: CombinedBundleInfo,
    pub base_bundle: BaseBundleInfo,
    #[serde(default)]
    pub user_certificates: Vec<UserCertificate>,
}

impl Metadata {
    /// Fresh record with an empty catalog. The combined bundle block is filled by the first rebuild.
    pub fn new(base_bundle: BaseBundleInfo) -> Self {
        Metadata {
            schema_version: CURRENT_SCHEMA_VERSION.to_string(),
            combined_bundle: CombinedBundleInfo {
                generated: base_bundle.generated,
                sha256: String::new(),
                cert_count: 0,
                sources: Vec::new(),
            },
            base_bundle,
            user_certificates: Vec::new(),
        }
    }

    pub fn find(&self, name: &str) -> Option<&UserCertificate> {
        self.user_certificates.iter().find(|c| c.name == name)
    }

    /// Replace the entry with the same name in place, or append. Returns the superseded entry.
    pub fn upsert(&mut self, cert: UserCertificate) -> Option<UserCertificate> {
        match self
            .user_certificates
            .iter_mut()
            .find(|c| c.name == cert.name)
        {
            Some(existing) => Some(std::mem::replace(existing, cert)),
            None => {
                self.user_certificates.push(cert);
                None
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<UserCertificate> {
        let idx = self.user_certificates.iter().position(|c| c.name == name)?;
        Some(self.user_certificates.remove(idx))
    }
}

/// One step of the schema migration chain, applied to the raw JSON document.
#[derive(Clone, Copy)]
pub struct Migration {
    pub from: &'static str,
    pub to: &'static str,
    pub apply: fn(&mut Value) -> Result<(), String>,
}

/// Registered schema migrations, oldest first. Empty while only version 1 exists.
pub const MIGRATIONS: &[Migration] = &[];

/// Walk `chain` until the document reaches `target`.
pub fn migrate_with(mut doc: Value, chain: &[Migration], target: &str) -> Result<Value, String> {
    for _ in 0..=chain.len() {
        let version = doc
            .get("schema_version")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing schema_version".to_string())?
            .to_string();

        if version == target {
            return Ok(doc);
        }

        let step = chain
            .iter()
            .find(|m| m.from == version)
            .ok_or_else(|| format!("unsupported schema_version {version:?}"))?;

        (step.apply)(&mut doc)?;
        doc["schema_version"] = Value::String(step.to.to_string());
        debug!(from = step.from, to = step.to, "migrated metadata schema");
    }

    Err(format!("migration chain does not reach schema_version {target:?}"))
}

/// Persistence and locking for `metadata.json`.
#[derive(Clone, Debug)]
pub struct MetadataStore {
    path: PathBuf,
    locker: Arc<dyn Locker>,
    lock_timeout: Duration,
    poll_interval: Duration,
}

impl MetadataStore {
    pub fn new(path: impl Into<PathBuf>, locker: Arc<dyn Locker>, config: &StoreConfig) -> Self {
        MetadataStore {
            path: path.into(),
            locker,
            lock_timeout: config.lock_timeout(),
            poll_interval: config.lock_poll_interval(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> StoreResult<bool> {
        fs::try_exists(&self.path)
            .await
            .map_err(|e| StoreError::io("stat metadata", &self.path, e))
    }

    pub async fn load(&self) -> StoreResult<Metadata> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotInitialized(self.path.clone()));
            }
            Err(e) => return Err(StoreError::io("read metadata", &self.path, e)),
        };

        let doc: Value = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::corrupt(&self.path, e.to_string()))?;
        let doc = migrate_with(doc, MIGRATIONS, CURRENT_SCHEMA_VERSION)
            .map_err(|reason| StoreError::corrupt(&self.path, reason))?;

        serde_json::from_value(doc).map_err(|e| StoreError::corrupt(&self.path, e.to_string()))
    }

    /// Replace the whole document atomically.
    pub async fn save(&self, record: &Metadata) -> StoreResult<()> {
        let mut bytes = serde_json::to_vec_pretty(record)
            .map_err(|e| StoreError::corrupt(&self.path, e.to_string()))?;
        bytes.push(b'\n');
        write_atomic(&self.path, &bytes).await
    }

    /// Take the metadata lock without loading, for callers that create the record.
    pub async fn lock(&self, ctx: &Context) -> StoreResult<LockGuard> {
        lock::acquire(
            &self.locker,
            &self.path,
            ctx,
            self.lock_timeout,
            self.poll_interval,
        )
        .await
    }

    /// Lock and load. Nothing is written unless [`LockedMetadata::commit`] is called.
    pub async fn begin(&self, ctx: &Context) -> StoreResult<LockedMetadata<'_>> {
        // the lock file lives next to the record, so its directory may not exist yet
        if !self.exists().await? {
            return Err(StoreError::NotInitialized(self.path.clone()));
        }
        let guard = self.lock(ctx).await?;
        let record = self.load().await?;
        Ok(LockedMetadata {
            store: self,
            guard,
            record,
        })
    }

    /// Lock, load, apply `mutator`, save, unlock.
    ///
    /// A mutator error leaves the file untouched. The lock is released on every path.
    pub async fn update_locked<F>(&self, ctx: &Context, mutator: F) -> StoreResult<Metadata>
    where
        F: FnOnce(&mut Metadata) -> StoreResult<()>,
    {
        let mut locked = self.begin(ctx).await?;
        mutator(locked.record_mut())?;
        locked.commit().await
    }
}

/// A loaded record whose lock is held until commit or drop.
#[derive(Debug)]
pub struct LockedMetadata<'a> {
    store: &'a MetadataStore,
    guard: LockGuard,
    record: Metadata,
}

impl LockedMetadata<'_> {
    pub fn record(&self) -> &Metadata {
        &self.record
    }

    pub fn record_mut(&mut self) -> &mut Metadata {
        &mut self.record
    }

    pub fn store(&self) -> &MetadataStore {
        self.store
    }

    /// Persist the current record while keeping the lock.
    pub async fn save(&self) -> StoreResult<()> {
        self.store.save(&self.record).await
    }

    /// Save the record and release the lock.
    pub async fn commit(self) -> StoreResult<Metadata> {
        self.save().await?;
        Ok(self.release())
    }

    /// Release the lock, handing back the record as it is in memory.
    pub fn release(self) -> Metadata {
        let LockedMetadata {
            store,
            guard,
            record,
        } = self;

        if let Err(e) = guard.release() {
            warn!(path = %store.path().display(), error = %e, "failed to release metadata lock");
        }
        record
    }

    /// Release the lock without saving.
    pub fn abort(self) {
        debug!(path = %self.store.path().display(), "metadata update aborted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind as StoreErrorKind;
    use crate::lock::{FileLocker, MemoryLocker};
    use serde_json::json;
    use tracing_test::traced_test;

    fn sample() -> Metadata {
        let now = Utc::now();
        let mut record = Metadata::new(BaseBundleInfo {
            generated: now,
            sha256: "ab".repeat(32),
            cert_count: 3,
            source: "embedded".to_string(),
            version: None,
        });
        record.combined_bundle = CombinedBundleInfo {
            generated: now,
            sha256: "cd".repeat(32),
            cert_count: 4,
            sources: vec!["base".to_string(), "user".to_string()],
        };
        record.user_certificates.push(UserCertificate {
            name: "corp".to_string(),
            path: "certs/user/corp.pem".to_string(),
            added: now,
            fingerprint: format!("sha256:{}", "ef".repeat(32)),
            subject: "CN=Example Corp Root CA,O=Example Corp".to_string(),
            expires: now + chrono::Duration::days(365),
        });
        record
    }

    fn store_in(dir: &Path) -> MetadataStore {
        MetadataStore::new(
            dir.join("metadata.json"),
            Arc::new(FileLocker),
            &StoreConfig::default()
                .with_lock_timeout(Duration::from_millis(500))
                .with_lock_poll_interval(Duration::from_millis(10)),
        )
    }

    #[tokio::test]
    async fn test_save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let record = sample();

        store.save(&record).await.unwrap();
        assert_eq!(store.load().await.unwrap(), record);

        let text = std::fs::read_to_string(store.path()).unwrap();
        assert!(text.starts_with("{\n  \"schema_version\": \"1\""));
        assert!(text.ends_with("}\n"));
        assert!(!text.contains("\"version\""));
    }

    #[tokio::test]
    async fn test_load_missing_is_not_initialized() {
        let dir = tempfile::tempdir().unwrap();
        let err = store_in(dir.path()).load().await.unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::NotInitialized);
    }

    #[tokio::test]
    async fn test_load_rejects_corrupt_documents() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let mut unknown = serde_json::to_value(sample()).unwrap();
        unknown["schema_version"] = json!("99");
        let mut missing = serde_json::to_value(sample()).unwrap();
        missing.as_object_mut().unwrap().remove("schema_version");

        let cases = [
            b"{not json".to_vec(),
            b"{\"schema_version\": \"1\"}".to_vec(),
            serde_json::to_vec(&unknown).unwrap(),
            serde_json::to_vec(&missing).unwrap(),
        ];

        for bytes in cases {
            std::fs::write(store.path(), &bytes).unwrap();
            let err = store.load().await.unwrap_err();
            assert_eq!(err.kind(), StoreErrorKind::CorruptMetadata);
            assert_eq!(err.path(), Some(store.path()));
        }
    }

    #[test]
    fn test_migration_chain_walks_versions_in_order() {
        fn v0_to_v1(doc: &mut Value) -> Result<(), String> {
            let certs = doc
                .as_object_mut()
                .and_then(|o| o.remove("user_certs"))
                .unwrap_or_else(|| json!([]));
            doc["user_certificates"] = certs;
            Ok(())
        }
        fn v1_to_v2(doc: &mut Value) -> Result<(), String> {
            doc["migrated"] = json!(true);
            Ok(())
        }
        let chain = [
            Migration {
                from: "1",
                to: "2",
                apply: v1_to_v2,
            },
            Migration {
                from: "0",
                to: "1",
                apply: v0_to_v1,
            },
        ];

        let doc = json!({"schema_version": "0", "user_certs": [{"name": "corp"}]});
        let out = migrate_with(doc, &chain, "2").unwrap();
        assert_eq!(out["schema_version"], json!("2"));
        assert_eq!(out["user_certificates"][0]["name"], json!("corp"));
        assert_eq!(out["migrated"], json!(true));
        assert!(out.get("user_certs").is_none());

        let current = json!({"schema_version": "1"});
        assert_eq!(migrate_with(current.clone(), MIGRATIONS, "1").unwrap(), current);
        assert!(migrate_with(json!({"schema_version": "0"}), MIGRATIONS, "1").is_err());
    }

    #[test]
    fn test_migration_step_failure_propagates() {
        fn fails(_: &mut Value) -> Result<(), String> {
            Err("cannot convert".to_string())
        }
        let chain = [Migration {
            from: "0",
            to: "1",
            apply: fails,
        }];
        let err = migrate_with(json!({"schema_version": "0"}), &chain, "1").unwrap_err();
        assert_eq!(err, "cannot convert");
    }

    #[test]
    fn test_upsert_find_remove() {
        let mut record = sample();
        let mut rotated = record.user_certificates[0].clone();
        rotated.fingerprint = "sha256:rotated".to_string();

        let previous = record.upsert(rotated).unwrap();
        assert_eq!(previous.name, "corp");
        assert_eq!(record.user_certificates.len(), 1);
        assert_eq!(record.find("corp").unwrap().fingerprint, "sha256:rotated");

        let mut proxy = record.user_certificates[0].clone();
        proxy.name = "proxy".to_string();
        assert!(record.upsert(proxy).is_none());
        assert_eq!(record.user_certificates.len(), 2);

        assert!(record.remove("Corp").is_none());
        assert!(record.remove("corp").is_some());
        assert_eq!(record.user_certificates.len(), 1);
        assert!(record.find("corp").is_none());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_update_locked_applies_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.save(&sample()).await.unwrap();

        let updated = store
            .update_locked(&Context::new(), |m| {
                m.combined_bundle.cert_count += 1;
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(updated.combined_bundle.cert_count, 5);
        assert_eq!(store.load().await.unwrap().combined_bundle.cert_count, 5);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_update_locked_mutator_error_leaves_file_and_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.save(&sample()).await.unwrap();
        let before = std::fs::read(store.path()).unwrap();

        let err = store
            .update_locked(&Context::new(), |m| {
                m.user_certificates.clear();
                Err(StoreError::NotFound("corp".to_string()))
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::NotFound);
        assert_eq!(std::fs::read(store.path()).unwrap(), before);

        // lock is free again: a second update does not wait
        let started = std::time::Instant::now();
        store
            .update_locked(&Context::new(), |_| Ok(()))
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_update_locked_times_out_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let locker = Arc::new(MemoryLocker::new());
        let config = StoreConfig::default()
            .with_lock_timeout(Duration::from_millis(100))
            .with_lock_poll_interval(Duration::from_millis(10));
        let store = MetadataStore::new(dir.path().join("metadata.json"), locker, &config);
        store.save(&sample()).await.unwrap();

        let held = store.lock(&Context::new()).await.unwrap();
        let err = store
            .update_locked(&Context::new(), |_| Ok(()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::LockTimeout);
        drop(held);

        assert!(store.update_locked(&Context::new(), |_| Ok(())).await.is_ok());
    }

    #[tokio::test]
    async fn test_abort_releases_without_saving() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.save(&sample()).await.unwrap();

        let mut locked = store.begin(&Context::new()).await.unwrap();
        locked.record_mut().user_certificates.clear();
        locked.abort();

        assert_eq!(store.load().await.unwrap().user_certificates.len(), 1);
        assert!(store.begin(&Context::new()).await.is_ok());
    }
}
