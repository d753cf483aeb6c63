// SPDX-License-Identifier: Apache-2.0

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified};
use rustls::crypto::CryptoProvider;
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime, pem::PemObject};
use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tracing::warn;

use crate::exporters::lumberjack::{Connector, ExporterError};

pub fn init_crypto_provider() -> Result<(), ExporterError> {
    if CryptoProvider::get_default().is_none() {
        return match rustls::crypto::aws_lc_rs::default_provider().install_default() {
            Ok(_) => Ok(()),
            Err(e) => Err(ExporterError::Tls(format!(
                "failed to initialize crypto library: {:?}",
                e
            ))),
        };
    }
    Ok(())
}

#[derive(Default)]
pub struct TlsConfig {
    ca_certificates: Vec<CertificateDer<'static>>, // if empty, server certificates are not verified
    identity: Option<ClientIdentity>,
}

struct ClientIdentity(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>);

#[derive(Clone, Debug, Default)]
pub struct TlsConfigBuilder {
    ca: Option<PathBuf>,
    cert: Option<PathBuf>,
    key: Option<PathBuf>,
}

impl TlsConfig {
    pub fn builder() -> TlsConfigBuilder {
        Default::default()
    }

    pub fn verifies_server(&self) -> bool {
        !self.ca_certificates.is_empty()
    }

    pub fn into_client_config(self) -> Result<ClientConfig, ExporterError> {
        let builder = if self.ca_certificates.is_empty() {
            warn!("No ssl ca configured, server certificates will not be verified");
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(SkipServerVerification::new())
        } else {
            let mut root_store = RootCertStore::empty();
            for cert in self.ca_certificates {
                root_store
                    .add(cert)
                    .map_err(|e| ExporterError::Tls(format!("invalid ssl ca: {}", e)))?;
            }
            ClientConfig::builder().with_root_certificates(root_store)
        };

        match self.identity {
            Some(ClientIdentity(chain, key)) => builder
                .with_client_auth_cert(chain, key)
                .map_err(|e| ExporterError::Tls(format!("invalid client certificate: {}", e))),
            None => Ok(builder.with_no_client_auth()),
        }
    }
}

impl TlsConfigBuilder {
    pub fn with_ca_file(mut self, ca_file: impl Into<PathBuf>) -> Self {
        self.ca = Some(ca_file.into());
        self
    }

    pub fn with_cert_file(mut self, cert_file: impl Into<PathBuf>) -> Self {
        self.cert = Some(cert_file.into());
        self
    }

    pub fn with_key_file(mut self, key_file: impl Into<PathBuf>) -> Self {
        self.key = Some(key_file.into());
        self
    }

    pub fn build(self) -> Result<TlsConfig, ExporterError> {
        let ca_certificates = match &self.ca {
            Some(path) => load_certs(path)?,
            None => Vec::new(),
        };

        let identity = match (self.cert, self.key) {
            (Some(cert), Some(key)) => Some(ClientIdentity(load_certs(&cert)?, load_key(&key)?)),
            (None, None) => None,
            _ => {
                return Err(ExporterError::Tls(
                    "either both or neither of ssl certificate and ssl key must be provided"
                        .to_string(),
                ));
            }
        };

        Ok(TlsConfig {
            ca_certificates,
            identity,
        })
    }
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ExporterError> {
    let certs = CertificateDer::pem_file_iter(path)
        .and_then(|iter| iter.collect::<Result<Vec<_>, _>>())
        .map_err(|e| ExporterError::Tls(format!("unable to load {:?}: {}", path, e)))?;
    if certs.is_empty() {
        return Err(ExporterError::Tls(format!(
            "no certificates found in {:?}",
            path
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, ExporterError> {
    PrivateKeyDer::from_pem_file(path)
        .map_err(|e| ExporterError::Tls(format!("unable to load {:?}: {}", path, e)))
}

/// Dials TCP and performs a TLS handshake.
#[derive(Clone)]
pub struct TlsConnector {
    inner: tokio_rustls::TlsConnector,
}

impl TlsConnector {
    pub fn new(config: TlsConfig) -> Result<Self, ExporterError> {
        let client_config = config.into_client_config()?;
        Ok(Self {
            inner: tokio_rustls::TlsConnector::from(Arc::new(client_config)),
        })
    }
}

impl Connector for TlsConnector {
    type Stream = TlsStream<TcpStream>;

    async fn connect(&self, addr: &str) -> Result<Self::Stream, ExporterError> {
        let server_name = server_name(addr)?;
        let tcp = TcpStream::connect(addr)
            .await
            .map_err(|source| ExporterError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        let _ = tcp.set_nodelay(true);

        self.inner
            .connect(server_name, tcp)
            .await
            .map_err(ExporterError::Handshake)
    }
}

/// The host part of a `host:port` address, as a TLS server name.
fn server_name(addr: &str) -> Result<ServerName<'static>, ExporterError> {
    let host = match addr.rsplit_once(':') {
        Some((host, _port)) => host,
        None => addr,
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');

    ServerName::try_from(host.to_string())
        .map_err(|_| ExporterError::InvalidServerName(addr.to_string()))
}

// Accepts any server certificate. Only used when no ssl ca is configured,
// which is how lumberjack deployments with self-signed certificates run.
struct SkipServerVerification(Arc<CryptoProvider>);

impl SkipServerVerification {
    fn new() -> Arc<Self> {
        let provider = CryptoProvider::get_default()
            .cloned()
            .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()));
        Arc::new(Self(provider))
    }
}

impl Debug for SkipServerVerification {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SkipServerVerification")
    }
}

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
