//! TLS connector for establishing encrypted connections.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector as TokioTlsConnector;
use tokio_rustls::client::TlsStream;

use crate::config::{TlsConfig, TlsVersion};
use crate::error::TlsError;

/// A certificate verifier that accepts any server certificate.
///
/// **WARNING:** Exposes the connection to man-in-the-middle attacks.
#[derive(Debug)]
struct SkipServerVerification;

impl ServerCertVerifier for SkipServerVerification {
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
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

/// Read every certificate of a PEM file.
pub fn load_pem_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|e| {
        TlsError::InvalidCertificate(format!("cannot open {}: {e}", path.display()))
    })?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::InvalidCertificate(format!("{}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(TlsError::InvalidCertificate(format!(
            "no certificates in {}",
            path.display()
        )));
    }
    Ok(certs)
}

/// TLS connector for HDB connections.
///
/// The handshake runs right after the TCP connect, before the prolog.
pub struct TlsConnector {
    config: TlsConfig,
    inner: TokioTlsConnector,
}

impl TlsConnector {
    /// Create a new TLS connector, loading any configured CA files.
    pub fn new(config: TlsConfig) -> Result<Self, TlsError> {
        let client_config = Self::build_client_config(&config)?;
        let inner = TokioTlsConnector::from(Arc::new(client_config));
        Ok(Self { config, inner })
    }

    fn build_client_config(config: &TlsConfig) -> Result<ClientConfig, TlsError> {
        let versions = Self::select_versions(config);

        if config.insecure_skip_verify {
            tracing::warn!(
                "TLS certificate verification is disabled; connections are open to \
                 man-in-the-middle attacks"
            );
            return Ok(Self::builder(&versions)?
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
                .with_no_client_auth());
        }

        let root_store = Self::build_root_store(config)?;
        Ok(Self::builder(&versions)?
            .with_root_certificates(root_store)
            .with_no_client_auth())
    }

    fn builder(
        versions: &[&'static rustls::SupportedProtocolVersion],
    ) -> Result<rustls::ConfigBuilder<ClientConfig, rustls::WantsVerifier>, TlsError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        Ok(ClientConfig::builder_with_provider(provider).with_protocol_versions(versions)?)
    }

    fn build_root_store(config: &TlsConfig) -> Result<RootCertStore, TlsError> {
        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        for cert in &config.root_certificates {
            root_store
                .add(cert.clone())
                .map_err(|e| TlsError::InvalidCertificate(e.to_string()))?;
        }
        for path in &config.root_ca_files {
            for cert in load_pem_certificates(path)? {
                root_store
                    .add(cert)
                    .map_err(|e| TlsError::InvalidCertificate(e.to_string()))?;
            }
            tracing::debug!(path = %path.display(), "loaded root CA file");
        }
        Ok(root_store)
    }

    fn select_versions(config: &TlsConfig) -> Vec<&'static rustls::SupportedProtocolVersion> {
        let versions: Vec<_> = [TlsVersion::Tls12, TlsVersion::Tls13]
            .into_iter()
            .filter(|v| (config.min_protocol_version..=config.max_protocol_version).contains(v))
            .map(|v| v.to_rustls())
            .collect();
        if versions.is_empty() {
            vec![&rustls::version::TLS12]
        } else {
            versions
        }
    }

    /// Perform the TLS handshake over `stream`.
    ///
    /// `host` is used for SNI and verification unless a server name is
    /// configured.
    pub async fn connect<S>(&self, stream: S, host: &str) -> Result<TlsStream<S>, TlsError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let server_name = self.config.server_name.as_deref().unwrap_or(host);
        let dns_name = ServerName::try_from(server_name.to_string()).map_err(|_| {
            TlsError::HostnameVerification {
                expected: server_name.to_string(),
                actual: "invalid DNS name".to_string(),
            }
        })?;

        tracing::debug!(server_name = %server_name, "performing TLS handshake");
        let tls_stream = self
            .inner
            .connect(dns_name, stream)
            .await
            .map_err(|e| TlsError::HandshakeFailed(e.to_string()))?;
        tracing::debug!("TLS handshake completed");
        Ok(tls_stream)
    }

    /// Get the underlying configuration.
    #[must_use]
    pub fn config(&self) -> &TlsConfig {
        &self.config
    }
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn setup_crypto_provider() {
        let _ = rustls::crypto::ring::default_provider().install_default();
    }

    #[test]
    fn test_default_config() {
        setup_crypto_provider();
        assert!(TlsConnector::new(TlsConfig::default()).is_ok());
    }

    #[test]
    fn test_insecure_skip_verify() {
        setup_crypto_provider();
        let connector = TlsConnector::new(TlsConfig::new().insecure_skip_verify(true)).unwrap();
        assert!(connector.config().insecure_skip_verify);
    }

    #[test]
    fn test_missing_ca_file() {
        setup_crypto_provider();
        let config = TlsConfig::new().add_root_ca_file("/nonexistent/ca.pem");
        assert!(matches!(
            TlsConnector::new(config),
            Err(TlsError::InvalidCertificate(_))
        ));
    }

    #[test]
    fn test_ca_file_without_certificates() {
        setup_crypto_provider();
        let path = std::env::temp_dir().join(format!("hdb-tls-empty-{}.pem", std::process::id()));
        std::fs::write(&path, "not a certificate\n").unwrap();
        let result = TlsConnector::new(TlsConfig::new().add_root_ca_file(&path));
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(result, Err(TlsError::InvalidCertificate(_))));
    }

    #[test]
    fn test_version_selection() {
        let only13 = TlsConfig::new().min_protocol_version(TlsVersion::Tls13);
        assert_eq!(TlsConnector::select_versions(&only13).len(), 1);
        let inverted = TlsConfig::new()
            .min_protocol_version(TlsVersion::Tls13)
            .max_protocol_version(TlsVersion::Tls12);
        assert_eq!(TlsConnector::select_versions(&inverted).len(), 1);
    }
}
