// Copyright 2026 Quarry Dev
// SPDX-License-Identifier: Apache-2.0

//! Error types shared by all quarry crates.

use thiserror::Error;

/// A specialized `Result` type for quarry operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during quarry operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested entity does not exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Entity kind (cluster, node, device, brick, volume, operation).
        kind: &'static str,
        /// Entity identifier.
        id: String,
    },

    /// A conflicting change or in-flight operation prevents this request.
    /// Callers may retry once the conflicting operation completes.
    #[error("conflict: {0}")]
    Conflict(String),

    /// No eligible device had enough free space for the placement.
    #[error("no space")]
    NoSpace,

    /// Splitting the volume further would produce bricks below the
    /// minimum brick size.
    #[error("minimum brick size limit reached; out of space")]
    MinimumBrickSize,

    /// The volume would exceed the maximum number of bricks.
    #[error("maximum number of bricks reached")]
    MaxBricksExceeded,

    /// No device in the cluster can host a replacement brick.
    #[error("no replacement device found for brick")]
    NoReplacement,

    /// Persisted state does not match any expected shape. Cleanup of the
    /// affected operation cannot proceed automatically.
    #[error("malformed state: {0}")]
    Malformed(String),

    /// The store was opened read-only and a write was attempted.
    #[error("metadata store is read-only")]
    ReadOnlyStore,

    /// Metadata store failure.
    #[error("database error: {0}")]
    Database(String),

    /// A remote executor call failed.
    #[error("executor error: {0}")]
    Executor(String),

    /// Invalid caller-supplied input.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Creates a `NotFound` error for the given entity kind and id.
    #[must_use]
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound { kind, id: id.to_string() }
    }

    /// Creates a `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Returns true if this error indicates a placement retry may succeed
    /// with a different brick size proposal.
    #[must_use]
    pub const fn is_retryable_placement(&self) -> bool {
        matches!(self, Self::NoSpace)
    }
}
