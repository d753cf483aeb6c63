// SPDX-License-Identifier: Apache-2.0

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExporterError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),

    #[error("invalid server name: {0}")]
    InvalidServerName(String),

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("timed out while {0}")]
    Timeout(&'static str),

    #[error("compression failed: {0}")]
    Compression(#[source] io::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
