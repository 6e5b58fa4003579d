// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Error types for scoring operations

use thiserror::Error;

/// Result type alias for scoring operations
pub type ScoreResult<T> = Result<T, ScoreError>;

/// Errors raised by score stores
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ScoreError {
    /// The backing store rejected a read or write
    #[error("Score store error: {message}")]
    Store { message: String },
}

impl ScoreError {
    /// Create a store error
    pub fn store<T: ToString>(message: T) -> Self {
        Self::Store {
            message: message.to_string(),
        }
    }
}
