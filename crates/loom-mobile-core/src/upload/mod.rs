// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-feature upload pipeline: drains finalized batches from storage,
//! builds intake requests, classifies responses and adapts its pacing.

mod conditions;
mod delay;
mod http;
mod worker;

pub use conditions::{UploadBlocker, UploadConditions};
pub use http::{
	HttpClient, HttpRequest, HttpResponse, ReqwestHttpClient, TransportError, UploadStatus,
};
pub(crate) use worker::{UploadPipeline, Uploader};

use crate::context::Context;
use crate::error::Result;

/// Turns one batch of events plus the current context into an intake
/// request. Provided by every remote feature; the engine treats the result
/// as opaque. A build failure is unrecoverable for the batch.
pub trait RequestBuilder: Send + Sync {
	fn build(&self, context: &Context, events: &[Vec<u8>]) -> Result<HttpRequest>;
}
