// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::{StoreError, StoreResult};

/// Marker embedded in every temp file name, `<file>.tmp.<uuid>`.
pub(crate) const TEMP_MARKER: &str = ".tmp.";

pub(crate) fn temp_path_for(path: &Path) -> PathBuf {
    let suffix = format!("{TEMP_MARKER}{}", Uuid::new_v4());
    path.with_file_name(
        path.file_name()
            .map(|n| format!("{}{suffix}", n.to_string_lossy()))
            .unwrap_or(suffix),
    )
}

/// Only names produced by [`temp_path_for`] qualify; `corp.tmp.pem` is a
/// regular certificate.
pub(crate) fn is_temp_file(name: &str) -> bool {
    name.rsplit_once(TEMP_MARKER)
        .is_some_and(|(stem, suffix)| !stem.is_empty() && Uuid::parse_str(suffix).is_ok())
}

/// Replace `path` with `bytes` via a synced sibling temp file and a rename.
///
/// The target is never opened for writing, so readers observe either the old
/// or the new content in full.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let temp_path = temp_path_for(path);

    let written = async {
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await
    }
    .await;

    if let Err(e) = written {
        remove_best_effort(&temp_path).await;
        return Err(StoreError::io("write temp file", temp_path, e));
    }

    if let Err(e) = fs::rename(&temp_path, path).await {
        remove_best_effort(&temp_path).await;
        return Err(StoreError::io("rename temp file", path, e));
    }

    debug!(path = %path.display(), size = bytes.len(), "wrote file atomically");
    Ok(())
}

/// Remove a file, treating "already gone" as success and logging other failures.
///
/// Returns whether a file was actually removed.
pub async fn remove_best_effort(path: &Path) -> bool {
    match fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "best-effort file removal failed");
            false
        }
    }
}

/// Read a file, mapping "not found" to `None`.
pub(crate) async fn read_optional(path: &Path, op: &'static str) -> StoreResult<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::io(op, path, e)),
    }
}

/// Append a newline when missing so concatenated PEM never glues blocks together.
pub(crate) fn with_trailing_newline(bytes: &[u8]) -> Vec<u8> {
    let mut out = bytes.to_vec();
    if !out.is_empty() && !out.ends_with(b"\n") {
        out.push(b'\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[tokio::test]
    #[traced_test]
    async fn test_write_atomic_replaces_content_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.json");

        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| is_temp_file(&e.file_name().to_string_lossy()))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_write_atomic_missing_parent_fails_with_io() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("file.pem");

        let err = write_atomic(&path, b"data").await.unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::Io);
        assert!(!path.exists());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_remove_best_effort_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.pem");

        assert!(!remove_best_effort(&path).await);
        std::fs::write(&path, b"x").unwrap();
        assert!(remove_best_effort(&path).await);
        assert!(!path.exists());
        assert!(!logs_contain("best-effort file removal failed"));
    }

    #[test]
    fn test_temp_path_naming() {
        let temp = temp_path_for(Path::new("/store/certs/user/corp.pem"));
        let name = temp.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("corp.pem.tmp."));
        assert!(is_temp_file(&name));
        assert!(!name.ends_with(".pem"));
        assert_eq!(temp.parent(), Some(Path::new("/store/certs/user")));
    }

    #[test]
    fn test_is_temp_file_requires_uuid_suffix() {
        for name in [
            "corp.pem.tmp.6f9619ff-8b86-d011-b42d-00c04fc964ff",
            "metadata.json.tmp.0e6a4d4c-2f46-4e0b-9a3c-2f1d8b1e7c55",
        ] {
            assert!(is_temp_file(name), "{name}");
        }
        for name in [
            "corp.tmp.pem",
            "corp.pem",
            "corp.pem.tmp.",
            "corp.pem.tmp.1234",
            ".tmp.6f9619ff-8b86-d011-b42d-00c04fc964ff",
            ".lock",
        ] {
            assert!(!is_temp_file(name), "{name}");
        }
    }

    #[test]
    fn test_with_trailing_newline() {
        assert_eq!(with_trailing_newline(b"abc"), b"abc\n");
        assert_eq!(with_trailing_newline(b"abc\n"), b"abc\n");
        assert_eq!(with_trailing_newline(b""), b"");
    }
}
