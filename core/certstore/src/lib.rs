// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

pub mod config;
pub mod context;
pub mod errors;
pub mod fsutil;
pub mod health;
pub mod layout;
pub mod lock;
pub mod metadata;
pub mod pem;
pub mod source;
pub mod store;
pub mod validate;

pub use config::StoreConfig;
pub use context::Context;
pub use errors::{ErrorKind, StoreError, StoreResult};
pub use store::{CertificateDetails, CertificateInput, Store};
