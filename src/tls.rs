//! Shared TLS client configuration.
//!
//! One root store (webpki-roots), built once and reused by every secure
//! transport. The skip-verify policy swaps in a verifier that accepts any
//! presented chain; it still advertises the provider's signature schemes so
//! the handshake itself proceeds normally.

use rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::sync::{Arc, LazyLock};

/// Certificate verification policy captured at construction time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyPolicy {
    /// Validate the chain against the webpki root store.
    Enforce,
    /// Accept any certificate. Intended for testing against self-signed
    /// resolvers only.
    SkipVerify,
}

static ROOT_STORE: LazyLock<Arc<RootCertStore>> = LazyLock::new(|| {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Arc::new(roots)
});

/// Build a rustls client config for the given policy, advertising `alpn`
/// protocols when non-empty.
pub(crate) fn client_config(verify: VerifyPolicy, alpn: &[&[u8]]) -> rustls::ClientConfig {
    // Both aws-lc-rs and ring end up in the dependency graph, so rustls
    // cannot pick a process-level provider on its own.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let mut config = match verify {
        VerifyPolicy::Enforce => rustls::ClientConfig::builder()
            .with_root_certificates(Arc::clone(&ROOT_STORE))
            .with_no_client_auth(),
        VerifyPolicy::SkipVerify => rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert::new()))
            .with_no_client_auth(),
    };

    if !alpn.is_empty() {
        config.alpn_protocols = alpn.iter().map(|proto| proto.to_vec()).collect();
    }

    config
}

/// Verifier behind [`VerifyPolicy::SkipVerify`]: every chain is accepted.
#[derive(Debug)]
struct AcceptAnyServerCert {
    schemes: Vec<SignatureScheme>,
}

impl AcceptAnyServerCert {
    fn new() -> Self {
        Self {
            schemes: rustls::crypto::aws_lc_rs::default_provider()
                .signature_verification_algorithms
                .supported_schemes(),
        }
    }
}

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

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.schemes.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enforce_config_builds() {
        let config = client_config(VerifyPolicy::Enforce, &[]);
        assert!(config.alpn_protocols.is_empty());
    }

    #[test]
    fn skip_verify_config_builds_with_alpn() {
        let config = client_config(VerifyPolicy::SkipVerify, &[b"doq"]);
        assert_eq!(config.alpn_protocols, vec![b"doq".to_vec()]);
    }
}
