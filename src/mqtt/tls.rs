//! Transport selection for the broker connection

use crate::config::MqttConfig;
use log::warn;
use rumqttc::tokio_rustls::rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rumqttc::tokio_rustls::rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rumqttc::tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rumqttc::tokio_rustls::rustls::{ClientConfig, DigitallySignedStruct, Error, SignatureScheme};
use rumqttc::{TlsConfiguration, Transport};
use std::sync::Arc;

/// Accepts every server certificate. Handshake signatures are still checked
/// so the session keys belong to the presented certificate.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
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

fn insecure_client_config() -> ClientConfig {
    let builder = ClientConfig::builder();
    let provider = builder.crypto_provider().clone();
    builder
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
        .with_no_client_auth()
}

/// Plain TCP, TLS against the system roots, or TLS without certificate checks
pub fn transport(config: &MqttConfig) -> Transport {
    if !config.tls {
        if config.tls_insecure {
            warn!("tls_insecure has no effect without tls");
        }
        return Transport::Tcp;
    }

    if config.tls_insecure {
        warn!("TLS certificate verification for {} is disabled", config.host);
        return Transport::tls_with_config(TlsConfiguration::Rustls(Arc::new(insecure_client_config())));
    }
    Transport::tls_with_default_config()
}
