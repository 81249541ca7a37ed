//! TLS client configuration for Redis servers and sentinels
//!
//! Builds a `rustls` client config from a [`TransportSecurity`]: custom CA
//! or the webpki roots, an optional client certificate, and optionally no
//! server verification at all when the operator asked for it.

use crate::core::TransportSecurity;
use crate::error::TransportError;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// Ready-to-use TLS settings for one side of a connection
#[derive(Clone)]
pub struct TlsSettings {
    client_config: Arc<ClientConfig>,
    server_name_override: Option<String>,
}

impl std::fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSettings")
            .field("server_name_override", &self.server_name_override)
            .finish()
    }
}

impl TlsSettings {
    /// Build settings from a descriptor's transport security
    pub fn from_security(
        security: &TransportSecurity,
        skip_verification: bool,
    ) -> Result<Self, TransportError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| TransportError::tls(format!("protocol versions: {e}")))?;

        let options = security.options();

        let builder = if skip_verification {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(danger::NoVerifier(provider)))
        } else {
            let mut roots = RootCertStore::empty();
            match options.and_then(|o| o.ca.as_deref()) {
                Some(ca) => {
                    for cert in parse_certificates(ca, "CA")? {
                        roots
                            .add(cert)
                            .map_err(|e| TransportError::tls(format!("invalid CA certificate: {e}")))?;
                    }
                }
                None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
            }
            builder.with_root_certificates(roots)
        };

        let cert = options.and_then(|o| o.cert.as_deref());
        let key = options.and_then(|o| o.key.as_deref());
        let config = match (cert, key) {
            (Some(cert), Some(key)) => builder
                .with_client_auth_cert(parse_certificates(cert, "client")?, parse_private_key(key)?)
                .map_err(|e| TransportError::tls(format!("client certificate: {e}")))?,
            (None, None) => builder.with_no_client_auth(),
            _ => {
                return Err(TransportError::tls(
                    "client certificate and private key must be given together",
                ))
            }
        };

        Ok(Self {
            client_config: Arc::new(config),
            server_name_override: options.and_then(|o| o.server_name.clone()),
        })
    }

    /// Name checked against the server certificate
    pub fn server_name_for(&self, host: &str) -> String {
        self.server_name_override
            .clone()
            .unwrap_or_else(|| host.to_string())
    }

    /// Run the TLS handshake over an established TCP stream
    pub async fn handshake(
        &self,
        host: &str,
        stream: TcpStream,
    ) -> Result<TlsStream<TcpStream>, TransportError> {
        let name = self.server_name_for(host);
        let server_name = ServerName::try_from(name.clone())
            .map_err(|e| TransportError::tls(format!("invalid server name '{name}': {e}")))?;

        TlsConnector::from(Arc::clone(&self.client_config))
            .connect(server_name, stream)
            .await
            .map_err(|e| TransportError::tls(format!("handshake with {host} failed: {e}")))
    }
}

fn parse_certificates(pem: &str, what: &str) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let certs = rustls_pemfile::certs(&mut pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TransportError::tls(format!("unreadable {what} certificate: {e}")))?;
    if certs.is_empty() {
        return Err(TransportError::tls(format!("no PEM certificate found in {what} field")));
    }
    Ok(certs)
}

fn parse_private_key(pem: &str) -> Result<PrivateKeyDer<'static>, TransportError> {
    rustls_pemfile::private_key(&mut pem.as_bytes())
        .map_err(|e| TransportError::tls(format!("unreadable private key: {e}")))?
        .ok_or_else(|| TransportError::tls("no PEM private key found"))
}

mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error, SignatureScheme};
    use std::sync::Arc;

    /// Accepts any server certificate; signatures are still checked
    #[derive(Debug)]
    pub struct NoVerifier(pub Arc<CryptoProvider>);

    impl ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.0.signature_verification_algorithms.supported_schemes()
        }
    }
}
