// Copyright 2025 Locksmith Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::time::Duration;
use thiserror::Error;

/// Lock operation related error types
#[derive(Error, Debug)]
pub enum LockError {
    /// Blocking acquisition exceeded its timeout
    #[error("lock acquisition timed out for '{resource}' after {timeout:?}")]
    AcquireTimeout { resource: String, timeout: Duration },

    /// A release or renewal presented a token the store no longer holds.
    /// The lease expired and may have been reassigned to another holder.
    #[error("lock '{resource}' is no longer owned by this holder")]
    NotOwned { resource: String },

    /// The backing store could not be reached or rejected the operation
    #[error("store error: {message}")]
    Store {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration error
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl LockError {
    /// Create acquisition timeout error
    pub fn acquire_timeout(resource: impl Into<String>, timeout: Duration) -> Self {
        Self::AcquireTimeout {
            resource: resource.into(),
            timeout,
        }
    }

    /// Create not-owned error
    pub fn not_owned(resource: impl Into<String>) -> Self {
        Self::NotOwned {
            resource: resource.into(),
        }
    }

    /// Create store error without an underlying cause
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
            source: None,
        }
    }

    /// Create store error wrapping an underlying cause
    pub fn store_with(message: impl Into<String>, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Store {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Check if it is a retryable error.
    ///
    /// `NotOwned` is terminal for the token that observed it; a caller must
    /// start a fresh acquisition rather than retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AcquireTimeout { .. } | Self::Store { .. })
    }
}

/// Lock operation Result type
pub type Result<T> = std::result::Result<T, LockError>;
