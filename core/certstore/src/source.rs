// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// Origin tag recorded for the bundle compiled into the binary.
pub const EMBEDDED_ORIGIN: &str = "embedded";

static EMBEDDED_BUNDLE: &[u8] = include_bytes!("../assets/base-bundle.pem");

/// Supplies the base trust bundle used at initialization and reset.
///
/// Implementations are trusted to hand over PEM bytes; the store does not
/// fetch anything itself.
pub trait BundleSource: Send + Sync + fmt::Debug {
    fn bytes(&self) -> &[u8];

    /// Recorded as `base_bundle.source`.
    fn origin(&self) -> &str;
}

/// The CA bundle shipped with the crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbeddedBundle;

impl BundleSource for EmbeddedBundle {
    fn bytes(&self) -> &[u8] {
        EMBEDDED_BUNDLE
    }

    fn origin(&self) -> &str {
        EMBEDDED_ORIGIN
    }
}

/// Caller-provided bundle bytes.
#[derive(Clone)]
pub struct StaticBundle {
    bytes: Vec<u8>,
    origin: String,
}

impl StaticBundle {
    pub fn new(bytes: impl Into<Vec<u8>>, origin: impl Into<String>) -> Self {
        StaticBundle {
            bytes: bytes.into(),
            origin: origin.into(),
        }
    }
}

impl fmt::Debug for StaticBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticBundle")
            .field("origin", &self.origin)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl BundleSource for StaticBundle {
    fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn origin(&self) -> &str {
        &self.origin
    }
}
