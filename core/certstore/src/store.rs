// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! The certificate store: directory layout, user certificates and the
//! combined bundle, all kept consistent with the metadata record.
//!
//! Every mutation goes through the metadata lock. Two concurrent adds for
//! the same name are last-writer-wins: whichever takes the lock second
//! replaces both the file and the catalog entry of the first.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::context::Context;
use crate::errors::{StoreError, StoreResult};
use crate::fsutil::{
    is_temp_file, read_optional, remove_best_effort, with_trailing_newline, write_atomic,
};
use crate::layout::{CERT_EXTENSION, StoreLayout};
use crate::lock::{FileLocker, Locker, is_lock_file};
use crate::metadata::{
    BaseBundleInfo, CombinedBundleInfo, LockedMetadata, Metadata, MetadataStore, UserCertificate,
};
use crate::pem::{BundleVerification, count_certificates, published_version, sha256_hex, verify_bundle};
use crate::source::{BundleSource, EmbeddedBundle};
use crate::validate::{CertificateInfo, validate_certificate, validate_name};

/// Source tag for the base bundle in `combined_bundle.sources`.
pub const SOURCE_BASE: &str = "base";
/// Source tag present while user certificates are part of the combined bundle.
pub const SOURCE_USER: &str = "user";

/// Where the bytes of a certificate to add come from.
#[derive(Clone, Debug)]
pub enum CertificateInput {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl CertificateInput {
    async fn read(self) -> StoreResult<Vec<u8>> {
        match self {
            CertificateInput::Path(path) => fs::read(&path)
                .await
                .map_err(|e| StoreError::io("read certificate", path, e)),
            CertificateInput::Bytes(bytes) => Ok(bytes),
        }
    }
}

impl From<PathBuf> for CertificateInput {
    fn from(path: PathBuf) -> Self {
        CertificateInput::Path(path)
    }
}

impl From<&Path> for CertificateInput {
    fn from(path: &Path) -> Self {
        CertificateInput::Path(path.to_path_buf())
    }
}

impl From<Vec<u8>> for CertificateInput {
    fn from(bytes: Vec<u8>) -> Self {
        CertificateInput::Bytes(bytes)
    }
}

impl From<&[u8]> for CertificateInput {
    fn from(bytes: &[u8]) -> Self {
        CertificateInput::Bytes(bytes.to_vec())
    }
}

/// A catalog entry together with what its certificate file currently says.
#[derive(Clone, Debug, Serialize)]
pub struct CertificateDetails {
    pub record: UserCertificate,
    pub certificate: CertificateInfo,
}

#[derive(Clone, Debug)]
pub struct Store {
    layout: StoreLayout,
    config: StoreConfig,
    metadata: MetadataStore,
    source: Arc<dyn BundleSource>,
}

impl Store {
    /// Store rooted at `root`, using the file lock and the embedded bundle.
    pub fn new(root: impl Into<PathBuf>, config: StoreConfig) -> Self {
        let layout = StoreLayout::new(root);
        let metadata = MetadataStore::new(layout.metadata(), Arc::new(FileLocker), &config);
        Store {
            layout,
            config,
            metadata,
            source: Arc::new(EmbeddedBundle),
        }
    }

    /// Swap the lock implementation, e.g. for a shared [`crate::lock::MemoryLocker`].
    pub fn with_locker(self, locker: Arc<dyn Locker>) -> Self {
        let metadata = MetadataStore::new(self.layout.metadata(), locker, &self.config);
        Store { metadata, ..self }
    }

    /// Swap the base bundle used by `initialize` and `reset_base_bundle`.
    pub fn with_source(self, source: Arc<dyn BundleSource>) -> Self {
        Store { source, ..self }
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn metadata_store(&self) -> &MetadataStore {
        &self.metadata
    }

    pub fn combined_bundle_path(&self) -> PathBuf {
        self.layout.combined_bundle()
    }

    pub async fn is_initialized(&self) -> StoreResult<bool> {
        self.metadata.exists().await
    }

    async fn ensure_initialized(&self) -> StoreResult<()> {
        if self.is_initialized().await? {
            Ok(())
        } else {
            Err(StoreError::NotInitialized(self.layout.metadata()))
        }
    }

    /// Create the layout, write the base bundle and build the first combined bundle.
    ///
    /// With `force`, an existing store is re-created and every user certificate
    /// file is deleted along with the old catalog.
    pub async fn initialize(&self, ctx: &Context, force: bool) -> StoreResult<Metadata> {
        const OP: &str = "initialize store";
        ctx.check(OP)?;

        if !force && self.is_initialized().await? {
            return Err(StoreError::AlreadyInitialized(self.layout.metadata()));
        }

        self.create_directories().await?;
        let guard = self.metadata.lock(ctx).await?;

        // another process may have finished initializing while we waited
        if !force && self.is_initialized().await? {
            return Err(StoreError::AlreadyInitialized(self.layout.metadata()));
        }

        if force {
            let removed = self.clear_user_certificates().await?;
            if removed > 0 {
                info!(removed, "force initialize removed user certificates");
            }
        }

        let base = with_trailing_newline(self.source.bytes());
        write_atomic(&self.layout.base_bundle(), &base).await?;

        let mut record = Metadata::new(BaseBundleInfo {
            generated: Utc::now(),
            sha256: sha256_hex(&base),
            cert_count: count_certificates(&base),
            source: self.source.origin().to_string(),
            version: None,
        });
        self.rebuild_bundle(ctx, &mut record).await?;
        self.metadata.save(&record).await?;
        drop(guard);

        info!(
            root = %self.root().display(),
            base_certs = record.base_bundle.cert_count,
            "certificate store initialized"
        );
        Ok(record)
    }

    async fn create_directories(&self) -> StoreResult<()> {
        for dir in self.layout.directories() {
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| StoreError::io("create directory", dir, e))?;
        }
        Ok(())
    }

    async fn clear_user_certificates(&self) -> StoreResult<usize> {
        let files = self.user_certificate_files().await?;
        for path in &files {
            match fs::remove_file(path).await {
                Ok(()) => debug!(path = %path.display(), "removed user certificate"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io("remove user certificate", path, e)),
            }
        }
        Ok(files.len())
    }

    /// `*.pem` files under `certs/user/`, sorted by file name.
    pub(crate) async fn user_certificate_files(&self) -> StoreResult<Vec<PathBuf>> {
        let dir = self.layout.user_dir();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io("read user certificates", dir, e)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io("read user certificates", &dir, e))?
        {
            let path = entry.path();
            let is_file = entry
                .file_type()
                .await
                .map_err(|e| StoreError::io("stat user certificate", &path, e))?
                .is_file();
            if is_file && path.extension().is_some_and(|ext| ext == CERT_EXTENSION) {
                files.push(path);
            }
        }

        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(files)
    }

    /// Concatenate the base bundle and every user certificate into the combined
    /// bundle and refresh `record.combined_bundle`.
    ///
    /// Must be called with the metadata lock held. The caller persists `record`.
    pub(crate) async fn rebuild_bundle(&self, ctx: &Context, record: &mut Metadata) -> StoreResult<()> {
        ctx.check("rebuild bundle")?;

        let base_path = self.layout.base_bundle();
        let mut combined = fs::read(&base_path)
            .await
            .map_err(|e| StoreError::io("read base bundle", &base_path, e))?;

        let user_files = self.user_certificate_files().await?;
        for path in &user_files {
            let bytes = fs::read(path)
                .await
                .map_err(|e| StoreError::io("read user certificate", path, e))?;
            combined.extend_from_slice(&bytes);
        }

        write_atomic(&self.layout.combined_bundle(), &combined).await?;

        let mut sources = vec![SOURCE_BASE.to_string()];
        if !user_files.is_empty() {
            sources.push(SOURCE_USER.to_string());
        }
        record.combined_bundle = CombinedBundleInfo {
            generated: Utc::now(),
            sha256: sha256_hex(&combined),
            cert_count: count_certificates(&combined),
            sources,
        };

        debug!(
            certs = record.combined_bundle.cert_count,
            user_files = user_files.len(),
            "combined bundle rebuilt"
        );
        Ok(())
    }

    /// Validate and store a user certificate under `name`, replacing any entry with that name.
    ///
    /// A [`StoreError::BundleStale`] result means the certificate is stored and
    /// cataloged but the combined bundle was not refreshed; [`Store::rebuild`] recovers.
    pub async fn add_certificate(
        &self,
        ctx: &Context,
        input: impl Into<CertificateInput>,
        name: &str,
        allow_expired: bool,
    ) -> StoreResult<UserCertificate> {
        const OP: &str = "add certificate";
        ctx.check(OP)?;
        validate_name(name)?;
        self.ensure_initialized().await?;

        let pem = input.into().read().await?;
        let info = validate_certificate(&pem, allow_expired)?.into_info();
        let stored = with_trailing_newline(&pem);
        let cert_path = self.layout.user_cert(name);

        let mut locked = self.metadata.begin(ctx).await?;
        let previous = read_optional(&cert_path, "read user certificate").await?;
        write_atomic(&cert_path, &stored).await?;

        let entry = UserCertificate {
            name: name.to_string(),
            path: StoreLayout::user_cert_relative(name),
            added: Utc::now(),
            fingerprint: info.fingerprint,
            subject: info.subject,
            expires: info.not_after,
        };
        let replaced = locked.record_mut().upsert(entry.clone());

        if let Err(e) = locked.save().await {
            restore_file(&cert_path, previous).await;
            locked.abort();
            return Err(e);
        }
        locked.release();

        if let Err(e) = self.rebuild(ctx).await {
            warn!(name = %name, error = %e, "certificate cataloged but combined bundle is stale");
            return Err(StoreError::BundleStale {
                name: name.to_string(),
                source: Box::new(e),
            });
        }

        info!(
            name = %name,
            fingerprint = %entry.fingerprint,
            replaced = replaced.is_some(),
            "certificate added"
        );
        Ok(entry)
    }

    /// Drop `name` from the catalog, delete its file and rebuild.
    pub async fn remove_certificate(&self, ctx: &Context, name: &str) -> StoreResult<UserCertificate> {
        const OP: &str = "remove certificate";
        ctx.check(OP)?;

        let mut locked = self.metadata.begin(ctx).await?;
        let Some(removed) = locked.record_mut().remove(name) else {
            locked.abort();
            return Err(StoreError::NotFound(name.to_string()));
        };
        locked.commit().await?;

        // the catalog no longer claims the file; a leftover only shows up as an orphan
        remove_best_effort(&self.layout.user_cert(&removed.name)).await;

        if let Err(e) = self.rebuild(ctx).await {
            warn!(name = %name, error = %e, "certificate removed but combined bundle is stale");
            return Err(StoreError::BundleStale {
                name: name.to_string(),
                source: Box::new(e),
            });
        }

        info!(name = %name, "certificate removed");
        Ok(removed)
    }

    pub async fn list_certificates(&self) -> StoreResult<Vec<UserCertificate>> {
        Ok(self.metadata.load().await?.user_certificates)
    }

    pub async fn certificate_info(&self, name: &str) -> StoreResult<CertificateDetails> {
        let record = self
            .metadata
            .load()
            .await?
            .find(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;

        let path = self.layout.user_cert(&record.name);
        let bytes = fs::read(&path)
            .await
            .map_err(|e| StoreError::io("read user certificate", &path, e))?;
        let certificate = validate_certificate(&bytes, true)?.into_info();

        Ok(CertificateDetails {
            record,
            certificate,
        })
    }

    pub async fn metadata(&self) -> StoreResult<Metadata> {
        self.metadata.load().await
    }

    /// Rebuild the combined bundle under the lock and record it.
    pub async fn rebuild(&self, ctx: &Context) -> StoreResult<Metadata> {
        let mut locked = self.metadata.begin(ctx).await?;
        self.rebuild_bundle(ctx, locked.record_mut()).await?;
        locked.commit().await
    }

    /// Put the store's own base bundle back in place of any updated one.
    pub async fn reset_base_bundle(&self, ctx: &Context) -> StoreResult<Metadata> {
        ctx.check("reset base bundle")?;
        let bytes = with_trailing_newline(self.source.bytes());
        let origin = self.source.origin().to_string();

        let record = self.swap_base_bundle(ctx, bytes, origin, None).await?;
        info!(origin = %record.base_bundle.source, "base bundle reset");
        Ok(record)
    }

    /// Check candidate base bundle bytes against the current base bundle.
    pub async fn verify_base_bundle(&self, bytes: &[u8]) -> StoreResult<BundleVerification> {
        let current = self.metadata.load().await?;
        verify_bundle(
            bytes,
            current.base_bundle.cert_count,
            self.config.min_base_bundle_certs(),
            self.config.max_degradation_percent(),
        )
    }

    /// Replace the base bundle with `bytes` obtained from `origin`.
    ///
    /// A degradation warning in the returned verification does not stop the update.
    pub async fn update_base_bundle(
        &self,
        ctx: &Context,
        bytes: &[u8],
        origin: &str,
    ) -> StoreResult<BundleVerification> {
        ctx.check("update base bundle")?;
        let verification = self.verify_base_bundle(bytes).await?;

        let stored = with_trailing_newline(bytes);
        let version = published_version(&stored);
        let record = self
            .swap_base_bundle(ctx, stored, origin.to_string(), version)
            .await?;

        info!(
            origin,
            certs = record.base_bundle.cert_count,
            version = record.base_bundle.version.as_deref().unwrap_or("-"),
            "base bundle updated"
        );
        Ok(verification)
    }

    /// Write a new base bundle and rebuild inside one locked update.
    ///
    /// On failure both bundle files are put back before the lock is released.
    async fn swap_base_bundle(
        &self,
        ctx: &Context,
        bytes: Vec<u8>,
        origin: String,
        version: Option<String>,
    ) -> StoreResult<Metadata> {
        let mut locked = self.metadata.begin(ctx).await?;

        let base_path = self.layout.base_bundle();
        let combined_path = self.layout.combined_bundle();
        let previous_base = read_optional(&base_path, "read base bundle").await?;
        let previous_combined = read_optional(&combined_path, "read combined bundle").await?;

        write_atomic(&base_path, &bytes).await?;
        locked.record_mut().base_bundle = BaseBundleInfo {
            generated: Utc::now(),
            sha256: sha256_hex(&bytes),
            cert_count: count_certificates(&bytes),
            source: origin,
            version,
        };

        let outcome = self.rebuild_and_save(ctx, &mut locked).await;
        match outcome {
            Ok(()) => Ok(locked.release()),
            Err(e) => {
                restore_file(&base_path, previous_base).await;
                restore_file(&combined_path, previous_combined).await;
                locked.abort();
                Err(e)
            }
        }
    }

    async fn rebuild_and_save(&self, ctx: &Context, locked: &mut LockedMetadata<'_>) -> StoreResult<()> {
        self.rebuild_bundle(ctx, locked.record_mut()).await?;
        locked.save().await
    }

    /// Remove leftover `<file>.tmp.<uuid>` files from interrupted writes. Lock files are kept.
    pub async fn clean_temp_files(&self, ctx: &Context) -> StoreResult<usize> {
        ctx.check("clean temp files")?;
        self.ensure_initialized().await?;
        let _guard = self.metadata.lock(ctx).await?;

        let mut removed = 0;
        for dir in self.layout.directories() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(StoreError::io("read directory", dir, e)),
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StoreError::io("read directory", &dir, e))?
            {
                let name = entry.file_name().to_string_lossy().into_owned();
                if !is_temp_file(&name) || is_lock_file(&name) {
                    continue;
                }
                let is_file = entry.file_type().await.is_ok_and(|t| t.is_file());
                if is_file && remove_best_effort(&entry.path()).await {
                    debug!(path = %entry.path().display(), "removed temp file");
                    removed += 1;
                }
            }
        }

        info!(removed, "temp file cleanup finished");
        Ok(removed)
    }
}

/// Put back what a file held before, or remove it when it did not exist. Best-effort.
async fn restore_file(path: &Path, previous: Option<Vec<u8>>) {
    match previous {
        Some(bytes) => {
            if let Err(e) = write_atomic(path, &bytes).await {
                warn!(path = %path.display(), error = %e, "failed to restore previous file content");
            }
        }
        None => {
            remove_best_effort(path).await;
        }
    }
}
