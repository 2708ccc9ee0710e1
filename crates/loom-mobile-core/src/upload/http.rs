// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The outbound HTTP contract: one request in, one response out. The
//! engine classifies responses by status code only.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// An intake request produced by a feature's request builder.
#[derive(Debug, Clone)]
pub struct HttpRequest {
	pub url: String,
	pub headers: Vec<(String, String)>,
	pub body: Vec<u8>,
}

/// The only thing the engine needs back: the status code.
#[derive(Debug, Clone, Copy)]
pub struct HttpResponse {
	pub status: u16,
}

/// A transport-level failure (DNS, TLS, timeout, connection reset).
/// Always classified retryable.
#[derive(Debug, Error)]
#[error("transport error: {0}")]
pub struct TransportError(String);

impl TransportError {
	pub fn new(message: impl Into<String>) -> Self {
		Self(message.into())
	}
}

impl From<reqwest::Error> for TransportError {
	fn from(err: reqwest::Error) -> Self {
		Self(err.to_string())
	}
}

/// Host HTTP transport. The default is [`ReqwestHttpClient`]; embedders
/// with their own networking stack substitute it.
#[async_trait]
pub trait HttpClient: Send + Sync {
	async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// How the upload loop treats a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
	/// 2xx: the batch was accepted; delete it and speed up.
	Success,
	/// 4xx other than 408/429 (and any non-retryable surprise): the intake
	/// will never accept this batch; delete it, keep the delay.
	Unrecoverable,
	/// 408, 429, 5xx or a transport failure: keep the batch, back off.
	Retryable,
}

impl UploadStatus {
	pub fn from_status_code(status: u16) -> Self {
		match status {
			200..=299 => UploadStatus::Success,
			408 | 429 => UploadStatus::Retryable,
			500..=599 => UploadStatus::Retryable,
			_ => UploadStatus::Unrecoverable,
		}
	}
}

/// Default transport backed by `reqwest`, with the standard Loom user
/// agent and a per-request timeout. Requests are POSTed as-is.
pub struct ReqwestHttpClient {
	client: reqwest::Client,
}

impl ReqwestHttpClient {
	pub fn new(timeout: Duration) -> Result<Self, TransportError> {
		let client = reqwest::Client::builder()
			.user_agent(user_agent())
			.timeout(timeout)
			.build()?;
		Ok(Self { client })
	}
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
	async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
		let mut builder = self.client.post(&request.url);
		for (name, value) in &request.headers {
			builder = builder.header(name, value);
		}
		let response = builder.body(request.body).send().await?;
		Ok(HttpResponse {
			status: response.status().as_u16(),
		})
	}
}

/// Format: `loom-mobile/{os}/{sdk version}`.
fn user_agent() -> String {
	format!(
		"loom-mobile/{}/{}",
		std::env::consts::OS,
		env!("CARGO_PKG_VERSION")
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_success_statuses() {
		for status in [200, 202, 299] {
			assert_eq!(UploadStatus::from_status_code(status), UploadStatus::Success);
		}
	}

	#[test]
	fn test_retryable_statuses() {
		for status in [408, 429, 500, 502, 503, 504, 599] {
			assert_eq!(
				UploadStatus::from_status_code(status),
				UploadStatus::Retryable,
				"status {status} should be retryable"
			);
		}
	}

	#[test]
	fn test_unrecoverable_statuses() {
		for status in [301, 400, 401, 403, 404, 413, 422] {
			assert_eq!(
				UploadStatus::from_status_code(status),
				UploadStatus::Unrecoverable,
				"status {status} should be unrecoverable"
			);
		}
	}

	#[test]
	fn test_user_agent_format() {
		let ua = user_agent();
		assert!(ua.starts_with("loom-mobile/"));
		assert_eq!(ua.split('/').count(), 3);
	}

	#[test]
	fn test_reqwest_client_builds() {
		assert!(ReqwestHttpClient::new(Duration::from_secs(30)).is_ok());
	}
}
