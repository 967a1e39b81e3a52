// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Process exit codes.

use trustbundle_certstore::config::ConfigError as StoreConfigError;
use trustbundle_certstore::{ErrorKind, StoreError};

use crate::config::ConfigError;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_GENERAL: i32 = 1;
pub const EXIT_CONFIG: i32 = 2;
pub const EXIT_CERT: i32 = 3;

pub fn code_for_kind(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::NotInitialized | ErrorKind::AlreadyInitialized | ErrorKind::CorruptMetadata => {
            EXIT_CONFIG
        }
        ErrorKind::InvalidName | ErrorKind::InvalidFormat | ErrorKind::Expired | ErrorKind::NotFound => {
            EXIT_CERT
        }
        ErrorKind::LockTimeout | ErrorKind::Cancelled | ErrorKind::Io | ErrorKind::BundleStale => {
            EXIT_GENERAL
        }
    }
}

fn store_error(err: &anyhow::Error) -> Option<&StoreError> {
    err.chain().find_map(|cause| cause.downcast_ref::<StoreError>())
}

/// Exit code for an error returned by a command; the outermost store error decides.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(e) = store_error(err) {
        return code_for_kind(e.kind());
    }
    let config_error = err.chain().any(|cause| {
        cause.downcast_ref::<ConfigError>().is_some() || cause.downcast_ref::<StoreConfigError>().is_some()
    });
    if config_error { EXIT_CONFIG } else { EXIT_GENERAL }
}

/// What to try next, printed under the error message.
pub fn hint(err: &anyhow::Error) -> Option<&'static str> {
    match store_error(err)?.kind() {
        ErrorKind::NotInitialized => Some("run `trustbundle init` first"),
        ErrorKind::AlreadyInitialized => Some("use `trustbundle init --force` to re-create the store"),
        ErrorKind::Expired => Some("use --allow-expired to add it anyway"),
        ErrorKind::NotFound => Some("see `trustbundle cert list` for the stored names"),
        ErrorKind::CorruptMetadata => Some("run `trustbundle doctor` for details"),
        ErrorKind::BundleStale => Some("run `trustbundle rebuild` to refresh the combined bundle"),
        ErrorKind::LockTimeout => Some("another trustbundle process may be holding the store lock"),
        _ => None,
    }
}
