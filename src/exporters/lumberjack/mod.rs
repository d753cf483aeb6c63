// SPDX-License-Identifier: Apache-2.0

//! Lumberjack v1 exporter: pages are compressed into window and compressed
//! frames, written to one aggregator and only passed on once acknowledged.

pub mod codec;
mod backoff;
mod errors;
mod publisher;
mod tls;

pub use backoff::Backoff;
pub use errors::ExporterError;
pub use publisher::{Publisher, PublisherConfig};
pub use tls::{TlsConfig, TlsConfigBuilder, TlsConnector, init_crypto_provider};

use std::future::Future;
use tokio::io::{AsyncRead, AsyncWrite};

/// Opens connections to an aggregator.
pub trait Connector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn connect(
        &self,
        addr: &str,
    ) -> impl Future<Output = Result<Self::Stream, ExporterError>> + Send;
}
