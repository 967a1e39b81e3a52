// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::errors::{StoreError, StoreResult};

/// Cancellation signal plus optional deadline carried through every store operation.
#[derive(Clone, Debug, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    pub fn new() -> Self {
        Context::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Context {
            token: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn with_deadline(self, deadline: Instant) -> Self {
        Context {
            deadline: Some(deadline),
            ..self
        }
    }

    /// Derive a context cancelled together with this one, keeping the deadline.
    pub fn child(&self) -> Self {
        Context {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fail with `Cancelled` when the token fired or the deadline passed.
    pub fn check(&self, op: &'static str) -> StoreResult<()> {
        if self.is_cancelled() || self.is_expired() {
            return Err(StoreError::Cancelled { op });
        }
        Ok(())
    }
}
