// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Encryption-at-rest for event payloads.
//!
//! When an adapter is installed every event is encrypted before it reaches
//! disk and decrypted on read; batch length prefixes cover the ciphertext.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{CoreError, Result};

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of the AES-GCM nonce in bytes.
const NONCE_SIZE: usize = 12;

/// Symmetric payload encryption. Both directions must be pure: the same
/// input always maps to an output that the other direction inverts.
/// Failures propagate as batch-level failures (the batch is deleted and
/// telemetry is emitted).
pub trait DataEncryption: Send + Sync {
	fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>>;
	fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Built-in AES-256-GCM adapter. Each payload gets a fresh random 96-bit
/// nonce, prepended to the ciphertext.
pub struct AesGcmDataEncryption {
	key: Zeroizing<[u8; KEY_SIZE]>,
}

impl AesGcmDataEncryption {
	pub fn new(key: [u8; KEY_SIZE]) -> Self {
		Self {
			key: Zeroizing::new(key),
		}
	}

	/// Generates a random key. The caller is responsible for persisting it
	/// (e.g. in the OS keychain) across process runs.
	pub fn generate() -> Self {
		let mut key = Zeroizing::new([0u8; KEY_SIZE]);
		OsRng.fill_bytes(key.as_mut());
		Self { key }
	}

	fn cipher(&self) -> Aes256Gcm {
		Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.key.as_ref()))
	}
}

impl DataEncryption for AesGcmDataEncryption {
	fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
		let mut nonce_bytes = [0u8; NONCE_SIZE];
		OsRng.fill_bytes(&mut nonce_bytes);
		let nonce = Nonce::from_slice(&nonce_bytes);

		let ciphertext = self
			.cipher()
			.encrypt(nonce, data)
			.map_err(|e| CoreError::Encryption(format!("AES-GCM encrypt failed: {e}")))?;

		let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
		out.extend_from_slice(&nonce_bytes);
		out.extend_from_slice(&ciphertext);
		Ok(out)
	}

	fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
		if data.len() < NONCE_SIZE {
			return Err(CoreError::Decryption(format!(
				"payload of {} bytes is shorter than the nonce",
				data.len()
			)));
		}
		let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
		let nonce = Nonce::from_slice(nonce_bytes);

		self
			.cipher()
			.decrypt(nonce, ciphertext)
			.map_err(|e| CoreError::Decryption(format!("AES-GCM decrypt failed: {e}")))
	}
}
