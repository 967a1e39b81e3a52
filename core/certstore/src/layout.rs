// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};

const CERTS_DIR: &str = "certs";
const USER_DIR: &str = "user";
const BUNDLES_DIR: &str = "bundles";
const BASE_BUNDLE_FILE: &str = "base-bundle.pem";
const COMBINED_BUNDLE_FILE: &str = "combined-bundle.pem";
const METADATA_FILE: &str = "metadata.json";
pub(crate) const CERT_EXTENSION: &str = "pem";

/// Paths of the on-disk store, all derived from one root.
///
/// ```text
/// <root>/certs/user/<name>.pem
/// <root>/certs/bundles/base-bundle.pem
/// <root>/certs/bundles/combined-bundle.pem
/// <root>/certs/metadata.json
/// ```
#[derive(Clone, Debug)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        StoreLayout { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn certs_dir(&self) -> PathBuf {
        self.root.join(CERTS_DIR)
    }

    pub fn user_dir(&self) -> PathBuf {
        self.certs_dir().join(USER_DIR)
    }

    pub fn bundles_dir(&self) -> PathBuf {
        self.certs_dir().join(BUNDLES_DIR)
    }

    pub fn base_bundle(&self) -> PathBuf {
        self.bundles_dir().join(BASE_BUNDLE_FILE)
    }

    pub fn combined_bundle(&self) -> PathBuf {
        self.bundles_dir().join(COMBINED_BUNDLE_FILE)
    }

    pub fn metadata(&self) -> PathBuf {
        self.certs_dir().join(METADATA_FILE)
    }

    /// Every directory the store needs, parents first.
    pub fn directories(&self) -> [PathBuf; 3] {
        [self.certs_dir(), self.user_dir(), self.bundles_dir()]
    }

    /// Absolute path of a user certificate. The name must already be validated.
    pub fn user_cert(&self, name: &str) -> PathBuf {
        self.user_dir().join(format!("{name}.{CERT_EXTENSION}"))
    }

    /// Path recorded in metadata, relative to the store root.
    pub fn user_cert_relative(name: &str) -> String {
        format!("{CERTS_DIR}/{USER_DIR}/{name}.{CERT_EXTENSION}")
    }
}
