// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

pub mod args;
pub mod commands;
pub mod config;
pub mod exit;
pub mod output;

/// Upper bound on how long a single command may run.
pub const OPERATION_TIMEOUT: Duration = Duration::from_secs(30);
