// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the mobile core.

use thiserror::Error;

/// Errors produced by the core engine.
///
/// Most failure paths inside the pipelines degrade silently (the SDK must
/// never break the host application); these variants surface through the
/// registration API, through telemetry messages, and through `tracing`.
#[derive(Debug, Error)]
pub enum CoreError {
	/// The core builder was given no root directory.
	#[error("root directory is required")]
	MissingRootDirectory,

	/// The core builder was given no client token.
	#[error("client token is required")]
	MissingClientToken,

	/// A feature with the same name is already registered.
	#[error("feature `{name}` is already registered")]
	DuplicateFeature { name: String },

	/// The core has been torn down; no further operations are accepted.
	#[error("core has been torn down")]
	CoreTornDown,

	/// Filesystem failure while managing batch files or directories.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON failure while handling baggage or telemetry payloads.
	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	/// The installed `DataEncryption` adapter failed to encrypt.
	#[error("encryption failed: {0}")]
	Encryption(String),

	/// The installed `DataEncryption` adapter failed to decrypt.
	#[error("decryption failed: {0}")]
	Decryption(String),

	/// A batch file could not be decoded; it will be deleted unread.
	#[error("batch `{batch_id}` is corrupt: {reason}")]
	BatchCorrupt { batch_id: String, reason: String },

	/// A single event exceeded the per-object size cap and was dropped.
	#[error("event of {size} bytes exceeds the {limit} byte object limit")]
	ObjectTooLarge { size: u64, limit: u64 },

	/// The feature's request builder failed; the batch is deleted.
	#[error("request builder failed: {0}")]
	RequestBuild(String),

	/// The HTTP transport could not be constructed or used.
	#[error(transparent)]
	Transport(#[from] crate::upload::TransportError),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
