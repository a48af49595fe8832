//! TLS settings for explicit FTPS sessions.

use std::fmt;
use std::sync::Arc;

use log::warn;

// Verifier for servers with self-signed certificates
mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::DigitallySignedStruct;

    #[derive(Debug)]
    pub struct AcceptAnyServerCert;

    impl ServerCertVerifier for AcceptAnyServerCert {
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

        fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
            rustls::crypto::ring::default_provider()
                .signature_verification_algorithms
                .supported_schemes()
        }
    }
}

/// Secure channel configuration for a session
///
/// Holds the rustls client configuration shared by the control connection
/// and every data connection of the session, so TLS sessions can be resumed
/// on the data channel. `common_name` overrides the host name used for SNI
/// and certificate verification.
#[derive(Clone)]
pub struct SecureConfig {
    common_name: Option<String>,
    client_config: Arc<rustls::ClientConfig>,
}

impl SecureConfig {
    /// Builds a configuration on the ring provider
    ///
    /// Trusts the platform root store, or any certificate at all when
    /// `insecure_skip_verify` is set.
    pub fn new(
        common_name: Option<String>,
        insecure_skip_verify: bool,
    ) -> Result<Self, rustls::Error> {
        let provider = rustls::crypto::ring::default_provider();
        let builder = rustls::ClientConfig::builder_with_provider(Arc::new(provider))
            .with_safe_default_protocol_versions()?;

        let client_config = if insecure_skip_verify {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(danger::AcceptAnyServerCert))
                .with_no_client_auth()
        } else {
            let mut root_store = rustls::RootCertStore::empty();
            let native = rustls_native_certs::load_native_certs();
            let (added, ignored) = root_store.add_parsable_certificates(native.certs);
            if !native.errors.is_empty() || ignored > 0 {
                warn!(
                    "loaded {} native certificates, {} unusable, errors: {:?}",
                    added, ignored, native.errors
                );
            }
            builder
                .with_root_certificates(root_store)
                .with_no_client_auth()
        };

        Ok(SecureConfig {
            common_name,
            client_config: Arc::new(client_config),
        })
    }

    /// Wraps a caller-built rustls configuration, e.g. one with a private CA.
    pub fn with_client_config(
        common_name: Option<String>,
        client_config: Arc<rustls::ClientConfig>,
    ) -> Self {
        SecureConfig {
            common_name,
            client_config,
        }
    }

    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    /// Name presented to the server: the common name when set, else `host`.
    pub fn server_name<'a>(&'a self, host: &'a str) -> &'a str {
        self.common_name().unwrap_or(host)
    }

    pub fn client_config(&self) -> Arc<rustls::ClientConfig> {
        Arc::clone(&self.client_config)
    }
}

impl fmt::Debug for SecureConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureConfig")
            .field("common_name", &self.common_name)
            .finish_non_exhaustive()
    }
}
